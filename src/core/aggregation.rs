use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::dates::months_between;
use super::outgoings::{annual_committed_spend, effective_outgoings};
use super::types::{AccountType, ContributionTarget, Household, Property, TaxWrapper};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonNetWorth {
    pub person_id: String,
    pub accounts: f64,
    pub property_equity: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrapperTotal {
    pub wrapper: TaxWrapper,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountTypeTotal {
    pub account_type: AccountType,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetWorthSummary {
    pub total: f64,
    pub accounts_total: f64,
    pub property_equity_total: f64,
    pub by_person: Vec<PersonNetWorth>,
    pub by_wrapper: Vec<WrapperTotal>,
    pub by_account_type: Vec<AccountTypeTotal>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionTotals {
    pub isa: f64,
    pub pension: f64,
    pub gia: f64,
}

impl ContributionTotals {
    pub fn total(self) -> f64 {
        self.isa + self.pension + self.gia
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyFundStatus {
    pub target: f64,
    pub current: f64,
    pub shortfall: f64,
    pub months_covered: Option<f64>,
}

pub fn property_equity(property: &Property) -> f64 {
    property.estimated_value - property.mortgage_balance
}

pub fn property_equity_shares<'a>(
    household: &'a Household,
    property: &'a Property,
) -> Vec<(&'a str, f64)> {
    let owners: Vec<&str> = property
        .owner_person_ids
        .iter()
        .map(String::as_str)
        .filter(|id| household.has_person(id))
        .collect();
    if owners.is_empty() {
        return Vec::new();
    }
    let share = property_equity(property) / owners.len() as f64;
    owners.into_iter().map(|id| (id, share)).collect()
}

/// Properties with no existing owner contribute nothing.
pub fn total_property_equity(household: &Household) -> f64 {
    household
        .properties
        .iter()
        .flat_map(|p| property_equity_shares(household, p))
        .map(|(_, share)| share)
        .sum()
}

pub fn person_wrapper_total(
    household: &Household,
    person_id: &str,
    include: impl Fn(TaxWrapper) -> bool,
) -> f64 {
    household
        .accounts_for(person_id)
        .filter(|a| include(a.wrapper()))
        .map(|a| a.current_value.max(0.0))
        .sum()
}

pub fn net_worth_by_person(household: &Household) -> Vec<PersonNetWorth> {
    household
        .persons
        .iter()
        .map(|person| {
            let accounts = person_wrapper_total(household, &person.id, |_| true);
            let property_equity: f64 = household
                .properties
                .iter()
                .flat_map(|p| property_equity_shares(household, p))
                .filter(|(owner, _)| *owner == person.id)
                .map(|(_, share)| share)
                .sum();
            PersonNetWorth {
                person_id: person.id.clone(),
                accounts,
                property_equity,
                total: accounts + property_equity,
            }
        })
        .collect()
}

pub fn net_worth_by_wrapper(household: &Household) -> Vec<WrapperTotal> {
    let mut totals: BTreeMap<TaxWrapper, f64> = BTreeMap::new();
    for account in household.owned_accounts() {
        *totals.entry(account.wrapper()).or_default() += account.current_value.max(0.0);
    }
    totals
        .into_iter()
        .map(|(wrapper, total)| WrapperTotal { wrapper, total })
        .collect()
}

pub fn net_worth_by_account_type(household: &Household) -> Vec<AccountTypeTotal> {
    let mut totals: BTreeMap<AccountType, f64> = BTreeMap::new();
    for account in household.owned_accounts() {
        *totals.entry(account.account_type).or_default() += account.current_value.max(0.0);
    }
    totals
        .into_iter()
        .map(|(account_type, total)| AccountTypeTotal {
            account_type,
            total,
        })
        .collect()
}

pub fn summarise_net_worth(household: &Household) -> NetWorthSummary {
    let accounts_total: f64 = household
        .owned_accounts()
        .map(|a| a.current_value.max(0.0))
        .sum();
    let property_equity_total = total_property_equity(household);
    NetWorthSummary {
        total: accounts_total + property_equity_total,
        accounts_total,
        property_equity_total,
        by_person: net_worth_by_person(household),
        by_wrapper: net_worth_by_wrapper(household),
        by_account_type: net_worth_by_account_type(household),
    }
}

pub fn annual_contributions_by_target(household: &Household) -> ContributionTotals {
    let mut totals = ContributionTotals::default();
    for contribution in household
        .contributions
        .iter()
        .filter(|c| household.has_person(&c.person_id))
    {
        let annual = contribution.annual_amount();
        match contribution.target {
            ContributionTarget::Isa => totals.isa += annual,
            ContributionTarget::Pension => totals.pension += annual,
            ContributionTarget::Gia => totals.gia += annual,
        }
    }
    totals
}

struct MortgageTerms {
    balance: f64,
    monthly_rate: f64,
    remaining_months: i64,
}

fn mortgage_terms(property: &Property, now: NaiveDate) -> Option<MortgageTerms> {
    let rate = property.mortgage_rate?;
    let term_years = property.mortgage_term_years?;
    let start = property.mortgage_start_date?;
    let end = NaiveDate::from_ymd_opt(start.year() + term_years as i32, start.month(), 1)?;
    Some(MortgageTerms {
        balance: property.mortgage_balance.max(0.0),
        monthly_rate: rate / 12.0,
        remaining_months: months_between(now, end).max(0),
    })
}

/// Level repayment for the remaining term, or `None` when the mortgage lacks
/// rate, term, or start date.
pub fn monthly_mortgage_payment(property: &Property, now: NaiveDate) -> Option<f64> {
    let terms = mortgage_terms(property, now)?;
    Some(level_payment(&terms))
}

fn level_payment(terms: &MortgageTerms) -> f64 {
    if terms.remaining_months == 0 {
        return terms.balance;
    }
    let n = terms.remaining_months as f64;
    if terms.monthly_rate.abs() < 1e-12 {
        return terms.balance / n;
    }
    let r = terms.monthly_rate;
    terms.balance * r / (1.0 - (1.0 + r).powf(-n))
}

/// Outstanding balance at `at` assuming level repayments from `now`. Without
/// amortisation details the balance is held flat.
pub fn projected_mortgage_balance(property: &Property, now: NaiveDate, at: NaiveDate) -> f64 {
    let Some(terms) = mortgage_terms(property, now) else {
        return property.mortgage_balance.max(0.0);
    };
    let elapsed = months_between(now, at).clamp(0, terms.remaining_months);
    if elapsed >= terms.remaining_months {
        return 0.0;
    }
    let payment = level_payment(&terms);
    let m = elapsed as f64;
    let r = terms.monthly_rate;
    let balance = if r.abs() < 1e-12 {
        terms.balance - payment * m
    } else {
        let growth = (1.0 + r).powf(m);
        terms.balance * growth - payment * (growth - 1.0) / r
    };
    balance.max(0.0)
}

pub fn emergency_fund_status(household: &Household, now: NaiveDate) -> EmergencyFundStatus {
    let config = &household.emergency_fund;
    let monthly_need = if config.monthly_essential_expenses > 0.0 {
        config.monthly_essential_expenses
    } else {
        let outgoings = effective_outgoings(household);
        annual_committed_spend(&outgoings, now.year(), now.year()) / 12.0
    };
    let target = config.target_months.max(0.0) * monthly_need;
    let current: f64 = household
        .owned_accounts()
        .filter(|a| matches!(a.wrapper(), TaxWrapper::Cash | TaxWrapper::PremiumBonds))
        .map(|a| a.current_value.max(0.0))
        .sum();
    EmergencyFundStatus {
        target,
        current,
        shortfall: (target - current).max(0.0),
        months_covered: (monthly_need > 0.0).then(|| current / monthly_need),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{
        Account, Contribution, EmergencyFundConfig, Frequency, Person, StudentLoanPlan,
    };

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn person(id: &str) -> Person {
        Person {
            id: id.to_string(),
            name: String::new(),
            date_of_birth: date(1985, 1, 1),
            planned_retirement_age: 60,
            pension_access_age: 57,
            state_pension_age: 67,
            ni_qualifying_years: 35,
            student_loan_plan: StudentLoanPlan::None,
        }
    }

    fn account(id: &str, person_id: &str, account_type: AccountType, value: f64) -> Account {
        Account {
            id: id.to_string(),
            person_id: person_id.to_string(),
            name: String::new(),
            account_type,
            current_value: value,
        }
    }

    fn property(owners: &[&str]) -> Property {
        Property {
            id: "home".to_string(),
            label: "Home".to_string(),
            estimated_value: 500_000.0,
            mortgage_balance: 200_000.0,
            owner_person_ids: owners.iter().map(|o| o.to_string()).collect(),
            mortgage_rate: None,
            mortgage_term_years: None,
            mortgage_start_date: None,
        }
    }

    fn household() -> Household {
        Household {
            persons: vec![person("a"), person("b")],
            accounts: vec![
                account("a-pen", "a", AccountType::Sipp, 100_000.0),
                account("a-isa", "a", AccountType::StocksAndSharesIsa, 50_000.0),
                account("b-cash", "b", AccountType::CashSavings, 20_000.0),
                account("ghost", "nobody", AccountType::Gia, 999_999.0),
            ],
            properties: vec![property(&["a", "b"])],
            ..Household::default()
        }
    }

    #[test]
    fn person_roll_up_splits_equity_and_ignores_orphans() {
        let rows = net_worth_by_person(&household());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].accounts, 150_000.0);
        assert_eq!(rows[0].property_equity, 150_000.0);
        assert_eq!(rows[1].total, 170_000.0);
    }

    #[test]
    fn equity_goes_only_to_existing_owners() {
        let h = household();
        let p = property(&["a", "missing"]);
        let shares = property_equity_shares(&h, &p);
        assert_eq!(shares, vec![("a", 300_000.0)]);
    }

    #[test]
    fn wrapper_roll_up_excludes_orphaned_accounts() {
        let totals = net_worth_by_wrapper(&household());
        assert_eq!(
            totals,
            vec![
                WrapperTotal {
                    wrapper: TaxWrapper::Pension,
                    total: 100_000.0
                },
                WrapperTotal {
                    wrapper: TaxWrapper::Isa,
                    total: 50_000.0
                },
                WrapperTotal {
                    wrapper: TaxWrapper::Cash,
                    total: 20_000.0
                },
            ]
        );
    }

    #[test]
    fn summary_totals_add_up() {
        let summary = summarise_net_worth(&household());
        assert_eq!(summary.accounts_total, 170_000.0);
        assert_eq!(summary.property_equity_total, 300_000.0);
        assert_eq!(summary.total, 470_000.0);
        assert_eq!(summary.by_account_type.len(), 3);
    }

    #[test]
    fn orphan_owned_property_is_left_out_of_totals() {
        let mut h = household();
        h.properties.push(Property {
            id: "ghost-flat".to_string(),
            estimated_value: 900_000.0,
            mortgage_balance: 0.0,
            ..property(&["nobody"])
        });
        let summary = summarise_net_worth(&h);
        assert_eq!(summary.property_equity_total, 300_000.0);
        let by_person: f64 = summary.by_person.iter().map(|p| p.total).sum();
        assert_eq!(summary.total, by_person);
        assert_eq!(total_property_equity(&h), 300_000.0);
    }

    #[test]
    fn contribution_totals_annualise_and_skip_orphans() {
        let mut h = household();
        h.contributions = vec![
            Contribution {
                id: "c1".to_string(),
                person_id: "a".to_string(),
                label: String::new(),
                target: ContributionTarget::Isa,
                amount: 500.0,
                frequency: Frequency::Monthly,
            },
            Contribution {
                id: "c2".to_string(),
                person_id: "nobody".to_string(),
                label: String::new(),
                target: ContributionTarget::Pension,
                amount: 500.0,
                frequency: Frequency::Monthly,
            },
        ];
        let totals = annual_contributions_by_target(&h);
        assert_eq!(totals.isa, 6_000.0);
        assert_eq!(totals.pension, 0.0);
        assert_eq!(totals.total(), 6_000.0);
    }

    #[test]
    fn mortgage_without_terms_is_held_flat() {
        let p = property(&["a"]);
        let now = date(2024, 1, 1);
        assert_eq!(monthly_mortgage_payment(&p, now), None);
        assert_eq!(projected_mortgage_balance(&p, now, date(2034, 1, 1)), 200_000.0);
    }

    #[test]
    fn mortgage_amortises_to_zero_at_term_end() {
        let mut p = property(&["a"]);
        p.mortgage_rate = Some(0.0);
        p.mortgage_term_years = Some(25);
        p.mortgage_start_date = Some(date(2019, 1, 1));
        let now = date(2024, 1, 1);
        let payment = monthly_mortgage_payment(&p, now).expect("payment");
        assert!((payment - 200_000.0 / 240.0).abs() < 1e-9);
        let halfway = projected_mortgage_balance(&p, now, date(2034, 1, 1));
        assert!((halfway - 100_000.0).abs() < 1e-6);
        assert_eq!(projected_mortgage_balance(&p, now, date(2045, 1, 1)), 0.0);
    }

    #[test]
    fn mortgage_with_interest_declines_monotonically() {
        let mut p = property(&["a"]);
        p.mortgage_rate = Some(0.05);
        p.mortgage_term_years = Some(25);
        p.mortgage_start_date = Some(date(2019, 1, 1));
        let now = date(2024, 1, 1);
        let mut previous = p.mortgage_balance;
        for year in 2025..2044 {
            let balance = projected_mortgage_balance(&p, now, date(year, 1, 1));
            assert!(balance < previous, "{year}: {balance} >= {previous}");
            previous = balance;
        }
    }

    #[test]
    fn emergency_fund_uses_cash_wrappers() {
        let mut h = household();
        h.emergency_fund = EmergencyFundConfig {
            target_months: 6.0,
            monthly_essential_expenses: 2_000.0,
            monthly_lifestyle_spending: 0.0,
        };
        let status = emergency_fund_status(&h, date(2024, 1, 1));
        assert_eq!(status.target, 12_000.0);
        assert_eq!(status.current, 20_000.0);
        assert_eq!(status.shortfall, 0.0);
        assert_eq!(status.months_covered, Some(10.0));
    }
}
