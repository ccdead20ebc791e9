use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::types::{
    Contribution, ContributionTarget, Frequency, Household, PensionMethod, StudentLoanPlan,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersonOverride {
    pub person_id: String,
    pub name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub planned_retirement_age: Option<u32>,
    pub pension_access_age: Option<u32>,
    pub state_pension_age: Option<u32>,
    pub ni_qualifying_years: Option<u32>,
    pub student_loan_plan: Option<StudentLoanPlan>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IncomeOverride {
    pub person_id: String,
    pub gross_salary: Option<f64>,
    pub employer_pension_contribution: Option<f64>,
    pub employee_pension_contribution: Option<f64>,
    pub pension_method: Option<PensionMethod>,
    pub salary_growth_rate: Option<f64>,
    pub bonus_growth_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContributionOverride {
    pub person_id: String,
    pub isa: f64,
    pub pension: f64,
    pub gia: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetirementOverride {
    pub target_annual_income: Option<f64>,
    pub withdrawal_rate: Option<f64>,
    pub include_state_pension: Option<bool>,
    pub growth_rate: Option<f64>,
    pub end_age: Option<u32>,
}

/// A what-if layered on a base household. `market_shock_pct` is in percent
/// (`-20.0` knocks a fifth off every account); `account_values` sets absolute
/// values by account id and wins over the shock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioOverrides {
    pub persons: Vec<PersonOverride>,
    pub income: Vec<IncomeOverride>,
    pub contributions: Vec<ContributionOverride>,
    pub retirement: Option<RetirementOverride>,
    pub market_shock_pct: Option<f64>,
    pub account_values: BTreeMap<String, f64>,
}

fn apply_person_overrides(mut household: Household, overrides: &[PersonOverride]) -> Household {
    for o in overrides {
        let Some(person) = household.persons.iter_mut().find(|p| p.id == o.person_id) else {
            continue;
        };
        if let Some(name) = &o.name {
            person.name = name.clone();
        }
        if let Some(dob) = o.date_of_birth {
            person.date_of_birth = dob;
        }
        if let Some(age) = o.planned_retirement_age {
            person.planned_retirement_age = age;
        }
        if let Some(age) = o.pension_access_age {
            person.pension_access_age = age;
        }
        if let Some(age) = o.state_pension_age {
            person.state_pension_age = age;
        }
        if let Some(years) = o.ni_qualifying_years {
            person.ni_qualifying_years = years;
        }
        if let Some(plan) = o.student_loan_plan {
            person.student_loan_plan = plan;
        }
    }
    household
}

/// Merges into existing income records only; an override for a person with
/// no income record is ignored.
fn apply_income_overrides(mut household: Household, overrides: &[IncomeOverride]) -> Household {
    for o in overrides {
        let Some(income) = household
            .income
            .iter_mut()
            .find(|i| i.person_id == o.person_id)
        else {
            continue;
        };
        if let Some(v) = o.gross_salary {
            income.gross_salary = v;
        }
        if let Some(v) = o.employer_pension_contribution {
            income.employer_pension_contribution = v;
        }
        if let Some(v) = o.employee_pension_contribution {
            income.employee_pension_contribution = v;
        }
        if let Some(v) = o.pension_method {
            income.pension_method = v;
        }
        if let Some(v) = o.salary_growth_rate {
            income.salary_growth_rate = v;
        }
        if let Some(v) = o.bonus_growth_rate {
            income.bonus_growth_rate = v;
        }
    }
    household
}

fn synthetic_contributions(o: &ContributionOverride) -> Vec<Contribution> {
    [
        (ContributionTarget::Isa, "isa", o.isa),
        (ContributionTarget::Pension, "pension", o.pension),
        (ContributionTarget::Gia, "gia", o.gia),
    ]
    .into_iter()
    .filter(|(_, _, amount)| *amount > 0.0)
    .map(|(target, key, amount)| Contribution {
        id: format!("scenario-{}-{key}", o.person_id),
        person_id: o.person_id.clone(),
        label: format!("Scenario {key} contribution"),
        target,
        amount,
        frequency: Frequency::Annually,
    })
    .collect()
}

fn apply_contribution_overrides(
    mut household: Household,
    overrides: &[ContributionOverride],
) -> Household {
    if overrides.is_empty() {
        return household;
    }
    household
        .contributions
        .retain(|c| !overrides.iter().any(|o| o.person_id == c.person_id));
    household
        .contributions
        .extend(overrides.iter().flat_map(synthetic_contributions));
    household
}

fn apply_retirement_override(
    mut household: Household,
    retirement: Option<&RetirementOverride>,
) -> Household {
    let Some(o) = retirement else {
        return household;
    };
    let config = &mut household.retirement;
    if let Some(v) = o.target_annual_income {
        config.target_annual_income = v;
    }
    if let Some(v) = o.withdrawal_rate {
        config.withdrawal_rate = v;
    }
    if let Some(v) = o.include_state_pension {
        config.include_state_pension = v;
    }
    if let Some(v) = o.growth_rate {
        config.growth_rate = v;
    }
    if let Some(v) = o.end_age {
        config.end_age = v;
    }
    household
}

fn apply_account_overrides(
    mut household: Household,
    market_shock_pct: Option<f64>,
    account_values: &BTreeMap<String, f64>,
) -> Household {
    if let Some(pct) = market_shock_pct.filter(|p| p.is_finite()) {
        let factor = 1.0 + pct / 100.0;
        for account in &mut household.accounts {
            account.current_value = (account.current_value * factor).max(0.0);
        }
    }
    for account in &mut household.accounts {
        if let Some(value) = account_values.get(&account.id) {
            account.current_value = *value;
        }
    }
    household
}

/// Applies persons, income, contributions, retirement, then account values.
pub fn apply_scenario_overrides(base: &Household, overrides: &ScenarioOverrides) -> Household {
    tracing::debug!(
        persons = overrides.persons.len(),
        income = overrides.income.len(),
        contributions = overrides.contributions.len(),
        accounts = overrides.account_values.len(),
        "applying scenario overrides"
    );
    let household = apply_person_overrides(base.clone(), &overrides.persons);
    let household = apply_income_overrides(household, &overrides.income);
    let household = apply_contribution_overrides(household, &overrides.contributions);
    let household = apply_retirement_override(household, overrides.retirement.as_ref());
    apply_account_overrides(household, overrides.market_shock_pct, &overrides.account_values)
}
