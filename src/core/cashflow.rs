use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};

use super::aggregation::ContributionTotals;
use super::constants::TaxConstants;
use super::growth::calculate_pro_rata_state_pension;
use super::outgoings::{annual_committed_spend, effective_outgoings};
use super::tax::TaxEngine;
use super::types::{
    BonusStructure, CashFlowEvent, CommittedOutgoing, ContributionTarget, Household,
    LifetimeCashFlow, LifetimeCashFlowYear, PensionMethod, Person, PersonIncome,
    PersonYearSnapshot,
};

pub const GENERAL_INFLATION: f64 = 0.02;
const GROSS_UP_ITERATIONS: usize = 50;
const GROSS_UP_TOLERANCE: f64 = 0.01;
const DRAW_ROUNDS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct PersonState {
    pension_pot: f64,
    accessible_wealth: f64,
}

impl PersonState {
    fn contribute(self, pension: f64, accessible: f64) -> Self {
        Self {
            pension_pot: self.pension_pot + pension.max(0.0),
            accessible_wealth: self.accessible_wealth + accessible.max(0.0),
        }
    }

    fn withdraw_pension(self, gross: f64) -> Self {
        Self {
            pension_pot: (self.pension_pot - gross).max(0.0),
            ..self
        }
    }

    fn withdraw_accessible(self, amount: f64) -> Self {
        Self {
            accessible_wealth: (self.accessible_wealth - amount).max(0.0),
            ..self
        }
    }

    fn grow(self, rate: f64) -> Self {
        Self {
            pension_pot: (self.pension_pot * (1.0 + rate)).max(0.0),
            accessible_wealth: (self.accessible_wealth * (1.0 + rate)).max(0.0),
        }
    }
}

struct PersonPlan<'a> {
    person: &'a Person,
    start_age: u32,
    income: Option<&'a PersonIncome>,
    bonus: Option<&'a BonusStructure>,
    discretionary: ContributionTotals,
    state_pension: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct PersonYearFlows {
    age: u32,
    employment_income: f64,
    state_pension_gross: f64,
    state_pension_net: f64,
    salary_pension_contribution: f64,
    discretionary: ContributionTotals,
}

#[derive(Debug, Clone, Copy, Default)]
struct PensionDraw {
    gross: f64,
    net: f64,
}

impl<'a> PersonPlan<'a> {
    fn new(
        household: &'a Household,
        person: &'a Person,
        constants: &TaxConstants,
        now: NaiveDate,
    ) -> Self {
        let mut discretionary = ContributionTotals::default();
        for contribution in household.contributions_for(&person.id) {
            let annual = contribution.annual_amount();
            match contribution.target {
                ContributionTarget::Isa => discretionary.isa += annual,
                ContributionTarget::Pension => discretionary.pension += annual,
                ContributionTarget::Gia => discretionary.gia += annual,
            }
        }
        Self {
            person,
            start_age: person.age(now),
            income: household.income_for(&person.id),
            bonus: household.bonus_for(&person.id),
            discretionary,
            state_pension: calculate_pro_rata_state_pension(
                person.qualifying_years(),
                &constants.state_pension,
            ),
        }
    }

    fn flows(&self, year_index: u32, tax: &dyn TaxEngine) -> PersonYearFlows {
        let age = self.start_age + year_index;
        let mut flows = PersonYearFlows {
            age,
            ..PersonYearFlows::default()
        };

        if age < self.person.planned_retirement_age {
            let salary_growth = self
                .income
                .map(|i| (1.0 + i.salary_growth_rate).powi(year_index as i32))
                .unwrap_or(1.0);
            let bonus_growth_rate = self.income.map(|i| i.bonus_growth_rate).unwrap_or(0.0);
            let bonus_pay = self
                .bonus
                .map(|b| bonus_paid_in_year(b, bonus_growth_rate, year_index))
                .unwrap_or(0.0);

            let grown = PersonIncome {
                person_id: self.person.id.clone(),
                gross_salary: self.income.map(|i| i.gross_salary).unwrap_or(0.0) * salary_growth
                    + bonus_pay,
                employer_pension_contribution: self
                    .income
                    .map(|i| i.employer_pension_contribution)
                    .unwrap_or(0.0)
                    * salary_growth,
                employee_pension_contribution: self
                    .income
                    .map(|i| i.employee_pension_contribution)
                    .unwrap_or(0.0)
                    * salary_growth,
                pension_method: self
                    .income
                    .map(|i| i.pension_method)
                    .unwrap_or(PensionMethod::NetPay),
                salary_growth_rate: 0.0,
                bonus_growth_rate: 0.0,
            };

            if grown.gross_salary > 0.0 {
                flows.employment_income = tax
                    .take_home_pay_with_student_loan(&grown, self.person.student_loan_plan)
                    .take_home;
            }
            flows.salary_pension_contribution = grown.total_pension_contribution();
            flows.discretionary = self.discretionary;
        }

        if age >= self.person.state_pension_age && self.state_pension > 0.0 {
            flows.state_pension_gross = self.state_pension;
            flows.state_pension_net =
                (self.state_pension - tax.income_tax(self.state_pension).tax).max(0.0);
        }

        flows
    }
}

/// Cash bonus plus deferred tranches vesting in `year_index`, assuming the
/// same deferral has been granted every year so vesting is already in steady
/// state. Grants compound at `bonus_growth_rate`; each tranche grows at the
/// plan's estimated return until it vests.
fn bonus_paid_in_year(bonus: &BonusStructure, bonus_growth_rate: f64, year_index: u32) -> f64 {
    let growth = |offset: i32| (1.0 + bonus_growth_rate).powi(offset);
    let cash = bonus.cash_bonus_annual.max(0.0) * growth(year_index as i32);
    let deferred = bonus.deferred_annual();
    if deferred <= 0.0 {
        return cash;
    }
    if bonus.vesting_years == 0 {
        return cash + deferred * growth(year_index as i32);
    }

    let tranche = deferred / bonus.vesting_years as f64;
    let vesting: f64 = (1..=bonus.vesting_years)
        .map(|k| {
            let held = (bonus.vesting_gap_years + k) as i32;
            let grant_year = year_index as i32 - held;
            tranche * growth(grant_year) * (1.0 + bonus.estimated_return).powi(held)
        })
        .sum();
    cash + vesting
}

fn proportional_shares(amount: f64, balances: &[f64]) -> Vec<f64> {
    let total: f64 = balances.iter().map(|b| b.max(0.0)).sum();
    if total <= 0.0 || amount <= 0.0 {
        return vec![0.0; balances.len()];
    }
    balances
        .iter()
        .map(|b| amount * b.max(0.0) / total)
        .collect()
}

fn net_from_additional_pension_gross(
    additional_gross: f64,
    already_gross: f64,
    other_taxable_income: f64,
    tax_free_fraction: f64,
    tax: &dyn TaxEngine,
) -> f64 {
    if additional_gross <= 0.0 {
        return 0.0;
    }
    let taxable_share = 1.0 - tax_free_fraction.clamp(0.0, 1.0);
    let before_income = other_taxable_income + already_gross * taxable_share;
    let after_income = before_income + additional_gross * taxable_share;
    let incremental_tax =
        (tax.income_tax(after_income).tax - tax.income_tax(before_income).tax).max(0.0);
    (additional_gross - incremental_tax).max(0.0)
}

/// Gross pension withdrawal delivering `target_net` after tax, found by a
/// bounded bisection over `[0, available]`.
fn gross_up_pension_withdrawal(
    target_net: f64,
    available: f64,
    already_gross: f64,
    other_taxable_income: f64,
    tax_free_fraction: f64,
    tax: &dyn TaxEngine,
) -> PensionDraw {
    if target_net <= 0.0 || available <= 0.0 {
        return PensionDraw::default();
    }
    let net_for = |gross: f64| {
        net_from_additional_pension_gross(
            gross,
            already_gross,
            other_taxable_income,
            tax_free_fraction,
            tax,
        )
    };

    let max_net = net_for(available);
    if max_net <= target_net {
        return PensionDraw {
            gross: available,
            net: max_net,
        };
    }

    let mut lo = 0.0;
    let mut hi = available;
    for _ in 0..GROSS_UP_ITERATIONS {
        let mid = (lo + hi) * 0.5;
        let net_mid = net_for(mid);
        if (net_mid - target_net).abs() <= GROSS_UP_TOLERANCE {
            return PensionDraw {
                gross: mid,
                net: net_mid,
            };
        }
        if net_mid < target_net {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    PensionDraw {
        gross: hi,
        net: net_for(hi),
    }
}

/// Draws `target_net` from the pension pots of eligible persons, split by
/// pot size. Capacity left unused by one person is re-offered to the others
/// for a few rounds.
fn draw_from_pensions(
    states: &[PersonState],
    flows: &[PersonYearFlows],
    eligible: &[bool],
    target_net: f64,
    tax_free_fraction: f64,
    tax: &dyn TaxEngine,
) -> (Vec<PersonState>, Vec<PensionDraw>) {
    let mut draws = vec![PensionDraw::default(); states.len()];
    let mut remaining = target_net;

    for _ in 0..DRAW_ROUNDS {
        if remaining <= GROSS_UP_TOLERANCE {
            break;
        }
        let balances: Vec<f64> = states
            .iter()
            .zip(&draws)
            .zip(eligible)
            .map(|((s, d), ok)| if *ok { (s.pension_pot - d.gross).max(0.0) } else { 0.0 })
            .collect();
        let targets = proportional_shares(remaining, &balances);

        let mut round_net = 0.0;
        for (index, share) in targets.into_iter().enumerate() {
            if share <= 0.0 {
                continue;
            }
            let draw = gross_up_pension_withdrawal(
                share,
                balances[index],
                draws[index].gross,
                flows[index].state_pension_gross,
                tax_free_fraction,
                tax,
            );
            draws[index].gross += draw.gross;
            draws[index].net += draw.net;
            round_net += draw.net;
        }

        remaining -= round_net;
        if round_net <= GROSS_UP_TOLERANCE {
            break;
        }
    }

    let next = states
        .iter()
        .zip(&draws)
        .map(|(s, d)| s.withdraw_pension(d.gross))
        .collect();
    (next, draws)
}

fn draw_from_accessible(states: &[PersonState], amount: f64) -> (Vec<PersonState>, Vec<f64>) {
    let balances: Vec<f64> = states.iter().map(|s| s.accessible_wealth).collect();
    let available: f64 = balances.iter().map(|b| b.max(0.0)).sum();
    let draws = proportional_shares(amount.min(available), &balances);
    let next = states
        .iter()
        .zip(&draws)
        .map(|(s, d)| s.withdraw_accessible(*d))
        .collect();
    (next, draws)
}

fn reinvest_surplus(states: &[PersonState], surplus: f64) -> Vec<PersonState> {
    if surplus <= 0.0 || states.is_empty() {
        return states.to_vec();
    }
    let balances: Vec<f64> = states.iter().map(|s| s.accessible_wealth).collect();
    let shares = if balances.iter().any(|b| *b > 0.0) {
        proportional_shares(surplus, &balances)
    } else {
        vec![surplus / states.len() as f64; states.len()]
    };
    states
        .iter()
        .zip(shares)
        .map(|(s, share)| s.contribute(0.0, share))
        .collect()
}

fn initial_state(household: &Household, person: &Person) -> PersonState {
    household
        .accounts_for(&person.id)
        .fold(PersonState::default(), |state, account| {
            let value = account.current_value.max(0.0);
            if account.wrapper().is_accessible() {
                state.contribute(0.0, value)
            } else {
                state.contribute(value, 0.0)
            }
        })
}

/// Year-by-year household projection from `now` until the primary person
/// reaches `end_age`. Contributions and draws land before that year's growth;
/// any surplus is reinvested after it.
pub fn generate_lifetime_cash_flow(
    household: &Household,
    tax: &dyn TaxEngine,
    constants: &TaxConstants,
    growth_rate: f64,
    end_age: u32,
    now: NaiveDate,
) -> LifetimeCashFlow {
    let Some(primary) = household.primary_person() else {
        return LifetimeCashFlow::default();
    };
    let primary_age = primary.age(now);
    let Some(horizon) = end_age.checked_sub(primary_age) else {
        return LifetimeCashFlow::default();
    };
    let growth_rate = if growth_rate.is_finite() { growth_rate } else { 0.0 };

    let plans: Vec<PersonPlan> = household
        .persons
        .iter()
        .map(|p| PersonPlan::new(household, p, constants, now))
        .collect();
    let outgoings = effective_outgoings(household);
    let annual_lifestyle = household.emergency_fund.monthly_lifestyle_spending.max(0.0) * 12.0;
    let tax_free_fraction = constants.pension_allowance.tax_free_fraction;

    let mut states: Vec<PersonState> = household
        .persons
        .iter()
        .map(|p| initial_state(household, p))
        .collect();
    let mut years = Vec::with_capacity(horizon as usize + 1);

    for year_index in 0..=horizon {
        let year = now.year() + year_index as i32;
        let flows: Vec<PersonYearFlows> = plans.iter().map(|p| p.flows(year_index, tax)).collect();

        let committed = annual_committed_spend(&outgoings, year, now.year()).round();
        let lifestyle =
            (annual_lifestyle * (1.0 + GENERAL_INFLATION).powi(year_index as i32)).round();
        let total_expenditure = committed + lifestyle;

        let employment_income: f64 = flows.iter().map(|f| f.employment_income.round()).sum();
        let state_pension_income: f64 = flows.iter().map(|f| f.state_pension_net.round()).sum();

        // Discretionary contributions come out of what is left after spending.
        let discretionary_due: f64 = flows.iter().map(|f| f.discretionary.total()).sum();
        let spare = (employment_income + state_pension_income - total_expenditure).max(0.0);
        let funded_share = if discretionary_due > 0.0 {
            (spare / discretionary_due).min(1.0)
        } else {
            0.0
        };
        let contributed: Vec<PersonState> = states
            .iter()
            .zip(&flows)
            .map(|(s, f)| {
                s.contribute(
                    f.salary_pension_contribution + f.discretionary.pension * funded_share,
                    (f.discretionary.isa + f.discretionary.gia) * funded_share,
                )
            })
            .collect();

        let shortfall = (total_expenditure - employment_income - state_pension_income).max(0.0);
        let eligible: Vec<bool> = plans
            .iter()
            .zip(&flows)
            .map(|(p, f)| f.age >= p.person.pension_access_age)
            .collect();
        let (after_pension, pension_draws) = draw_from_pensions(
            &contributed,
            &flows,
            &eligible,
            shortfall,
            tax_free_fraction,
            tax,
        );
        let pension_net: f64 = pension_draws.iter().map(|d| d.net).sum();
        let (after_accessible, accessible_draws) =
            draw_from_accessible(&after_pension, (shortfall - pension_net).max(0.0));
        let accessible_net: f64 = accessible_draws.iter().sum();

        let person_pension_drawdown: Vec<f64> =
            pension_draws.iter().map(|d| d.net.round()).collect();
        let person_investment_drawdown: Vec<f64> =
            accessible_draws.iter().map(|d| d.round()).collect();
        let pension_drawdown: f64 = person_pension_drawdown.iter().sum();
        let investment_drawdown: f64 = person_investment_drawdown.iter().sum();
        let unfunded_shortfall = if (shortfall - pension_net - accessible_net).round() > 0.0 {
            (shortfall - pension_drawdown - investment_drawdown).max(0.0)
        } else {
            0.0
        };

        let total_income =
            employment_income + state_pension_income + pension_drawdown + investment_drawdown;
        let surplus = total_income - total_expenditure;

        let grown: Vec<PersonState> = after_accessible.iter().map(|s| s.grow(growth_rate)).collect();
        let discretionary_paid = discretionary_due * funded_share;
        states = reinvest_surplus(&grown, (surplus - discretionary_paid).max(0.0));

        let persons: Vec<PersonYearSnapshot> = plans
            .iter()
            .zip(&flows)
            .zip(&states)
            .enumerate()
            .map(|(index, ((plan, f), s))| PersonYearSnapshot {
                person_id: plan.person.id.clone(),
                age: f.age,
                employment_income: f.employment_income.round(),
                state_pension_income: f.state_pension_net.round(),
                pension_drawdown: person_pension_drawdown[index],
                investment_drawdown: person_investment_drawdown[index],
                pension_pot: s.pension_pot.round(),
                accessible_wealth: s.accessible_wealth.round(),
            })
            .collect();

        let pension_balance: f64 = persons.iter().map(|p| p.pension_pot).sum();
        let accessible_wealth: f64 = persons.iter().map(|p| p.accessible_wealth).sum();

        years.push(LifetimeCashFlowYear {
            year,
            age: primary_age + year_index,
            employment_income,
            state_pension_income,
            pension_drawdown,
            investment_drawdown,
            total_income,
            total_expenditure,
            surplus,
            unfunded_shortfall,
            pension_balance,
            accessible_wealth,
            total_wealth: pension_balance + accessible_wealth,
            persons,
        });
    }

    let events = cash_flow_events(household, &outgoings, primary_age, end_age, now);
    tracing::debug!(
        years = years.len(),
        events = events.len(),
        persons = plans.len(),
        "generated lifetime cash flow"
    );
    LifetimeCashFlow { years, events }
}

fn cash_flow_events(
    household: &Household,
    outgoings: &[CommittedOutgoing],
    primary_age: u32,
    end_age: u32,
    now: NaiveDate,
) -> Vec<CashFlowEvent> {
    let in_range = |age: i64| age >= primary_age as i64 && age <= end_age as i64;
    let mut seen: BTreeSet<(u32, String)> = BTreeSet::new();

    for person in &household.persons {
        let offset = primary_age as i64 - person.age(now) as i64;
        let name = person.display_name();
        let milestones = [
            (person.planned_retirement_age, format!("{name} retires")),
            (person.pension_access_age, format!("{name} pension access")),
            (person.state_pension_age, format!("{name} state pension starts")),
        ];
        for (age, label) in milestones {
            let on_axis = age as i64 + offset;
            if in_range(on_axis) {
                seen.insert((on_axis as u32, label));
            }
        }
    }

    for outgoing in outgoings {
        let Some(end) = outgoing.end_date else {
            continue;
        };
        let on_axis = primary_age as i64 + (end.year() - now.year()) as i64;
        if in_range(on_axis) {
            let label = if outgoing.label.is_empty() {
                &outgoing.id
            } else {
                &outgoing.label
            };
            seen.insert((on_axis as u32, format!("{label} ends")));
        }
    }

    seen.into_iter()
        .map(|(age, label)| CashFlowEvent { age, label })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tax::UkTaxEngine;
    use crate::core::types::{Account, AccountType, Contribution, Frequency, StudentLoanPlan};
    use proptest::prelude::{prop_assert, proptest};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn now() -> NaiveDate {
        date(2024, 6, 1)
    }

    fn person(id: &str, born: i32, retire: u32) -> Person {
        Person {
            id: id.to_string(),
            name: id.to_uppercase(),
            date_of_birth: date(born, 1, 1),
            planned_retirement_age: retire,
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

    fn rent(monthly: f64) -> CommittedOutgoing {
        CommittedOutgoing {
            id: "rent".to_string(),
            label: "Rent".to_string(),
            amount: monthly,
            frequency: Frequency::Monthly,
            start_date: None,
            end_date: None,
            inflation_rate: None,
            linked_child_id: None,
        }
    }

    fn income(person_id: &str, gross: f64) -> PersonIncome {
        PersonIncome {
            person_id: person_id.to_string(),
            gross_salary: gross,
            employer_pension_contribution: 0.0,
            employee_pension_contribution: 0.0,
            pension_method: PensionMethod::NetPay,
            salary_growth_rate: 0.0,
            bonus_growth_rate: 0.0,
        }
    }

    fn run(household: &Household, growth_rate: f64, end_age: u32) -> LifetimeCashFlow {
        let constants = TaxConstants::default();
        let engine = UkTaxEngine::new(constants.clone());
        generate_lifetime_cash_flow(household, &engine, &constants, growth_rate, end_age, now())
    }

    #[test]
    fn empty_household_projects_nothing() {
        let flow = run(&Household::default(), 0.05, 95);
        assert!(flow.years.is_empty());
        assert!(flow.events.is_empty());
    }

    #[test]
    fn end_age_before_current_age_projects_nothing() {
        let household = Household {
            persons: vec![person("a", 1950, 65)],
            ..Household::default()
        };
        assert!(run(&household, 0.05, 70).years.is_empty());
    }

    #[test]
    fn retiree_receives_state_pension_every_year_and_no_salary() {
        let household = Household {
            persons: vec![person("a", 1954, 65)],
            income: vec![income("a", 40_000.0)],
            committed_outgoings: vec![rent(1_000.0)],
            ..Household::default()
        };
        let flow = run(&household, 0.04, 95);
        assert_eq!(flow.years.len(), 95 - 70 + 1);
        for row in &flow.years {
            assert!(row.state_pension_income > 0.0, "year {}", row.year);
            assert_eq!(row.employment_income, 0.0);
        }
    }

    #[test]
    fn totals_are_derived_from_rounded_components() {
        let household = Household {
            persons: vec![person("a", 1980, 60)],
            income: vec![income("a", 55_555.55)],
            accounts: vec![account("isa", "a", AccountType::StocksAndSharesIsa, 10_000.0)],
            committed_outgoings: vec![rent(1_234.56)],
            ..Household::default()
        };
        for row in run(&household, 0.05, 90).years {
            assert_eq!(
                row.total_income,
                row.employment_income
                    + row.state_pension_income
                    + row.pension_drawdown
                    + row.investment_drawdown
            );
            assert_eq!(row.surplus, row.total_income - row.total_expenditure);
            assert_eq!(row.total_income.fract(), 0.0);
        }
    }

    #[test]
    fn household_totals_match_per_person_rows() {
        let mut household = Household {
            persons: vec![
                person("a", 1960, 60),
                person("b", 1959, 60),
                person("c", 1961, 60),
            ],
            accounts: vec![
                account("a-sipp", "a", AccountType::Sipp, 123_456.7),
                account("b-sipp", "b", AccountType::Sipp, 54_321.3),
                account("c-sipp", "c", AccountType::Sipp, 9_876.5),
                account("a-gia", "a", AccountType::Gia, 33_333.3),
                account("c-gia", "c", AccountType::Gia, 7_777.7),
            ],
            ..Household::default()
        };
        for step in 0..40 {
            household.committed_outgoings = vec![rent(700.0 + step as f64 * 137.3)];
            for row in run(&household, 0.03, 80).years {
                let sum =
                    |f: fn(&PersonYearSnapshot) -> f64| row.persons.iter().map(f).sum::<f64>();
                assert_eq!(row.pension_drawdown, sum(|p| p.pension_drawdown));
                assert_eq!(row.investment_drawdown, sum(|p| p.investment_drawdown));
                assert_eq!(row.employment_income, sum(|p| p.employment_income));
                assert_eq!(row.pension_balance, sum(|p| p.pension_pot));
                assert_eq!(
                    row.total_income,
                    row.employment_income
                        + row.state_pension_income
                        + row.pension_drawdown
                        + row.investment_drawdown
                );
                if row.unfunded_shortfall > 0.0 {
                    assert_eq!(row.total_income + row.unfunded_shortfall, row.total_expenditure);
                }
            }
        }
    }

    fn retired(state_pension_gross: f64) -> PersonYearFlows {
        PersonYearFlows {
            age: 70,
            state_pension_gross,
            ..PersonYearFlows::default()
        }
    }

    fn pots(balances: &[f64]) -> Vec<PersonState> {
        balances
            .iter()
            .map(|b| PersonState {
                pension_pot: *b,
                accessible_wealth: 0.0,
            })
            .collect()
    }

    #[test]
    fn pension_draw_is_split_by_pot_size() {
        let engine = UkTaxEngine::default();
        let states = pots(&[300_000.0, 100_000.0]);
        let flows = [retired(0.0), retired(0.0)];
        // both draws stay inside the personal allowance, so gross equals net
        let (next, draws) =
            draw_from_pensions(&states, &flows, &[true, true], 20_000.0, 0.25, &engine);
        assert!((draws[0].gross - 15_000.0).abs() < 0.05, "{draws:?}");
        assert!((draws[1].gross - 5_000.0).abs() < 0.05, "{draws:?}");
        assert!((next[0].pension_pot - (300_000.0 - draws[0].gross)).abs() < 1e-9);
    }

    #[test]
    fn pension_draw_skips_persons_below_access_age() {
        let engine = UkTaxEngine::default();
        let states = pots(&[300_000.0, 100_000.0]);
        let flows = [retired(0.0), retired(0.0)];
        let (next, draws) =
            draw_from_pensions(&states, &flows, &[true, false], 20_000.0, 0.25, &engine);
        assert!((draws[0].net - 20_000.0).abs() < 0.05, "{draws:?}");
        assert_eq!(draws[1].gross, 0.0);
        assert_eq!(next[1].pension_pot, 100_000.0);
    }

    #[test]
    fn exhausted_pot_shortfall_is_redrawn_from_others() {
        let engine = UkTaxEngine::default();
        let states = pots(&[100_000.0, 100_000.0]);
        // the second person's state pension pushes their draw into higher bands
        let flows = [retired(0.0), retired(60_000.0)];
        let (next, draws) =
            draw_from_pensions(&states, &flows, &[true, true], 140_000.0, 0.25, &engine);
        assert_eq!(draws[1].gross, 100_000.0);
        assert_eq!(next[1].pension_pot, 0.0);
        assert!(draws[1].net < 70_000.0);
        assert!(draws[0].gross > 85_000.0 && draws[0].gross < 100_000.0, "{draws:?}");
        let total_net = draws[0].net + draws[1].net;
        assert!((total_net - 140_000.0).abs() < 0.05, "{total_net}");
    }

    #[test]
    fn unfunded_contributions_are_not_credited() {
        let mut household = Household {
            persons: vec![person("a", 1990, 60)],
            accounts: vec![account("isa", "a", AccountType::StocksAndSharesIsa, 50_000.0)],
            ..Household::default()
        };
        household.contributions = vec![Contribution {
            id: "isa-topup".to_string(),
            person_id: "a".to_string(),
            label: String::new(),
            target: ContributionTarget::Isa,
            amount: 20_000.0,
            frequency: Frequency::Annually,
        }];
        let years = run(&household, 0.05, 40).years;
        assert_eq!(years[0].accessible_wealth, 52_500.0);
        assert_eq!(years[1].accessible_wealth, 55_125.0);
    }

    #[test]
    fn contributions_are_capped_at_spare_income() {
        let mut household = Household {
            persons: vec![person("a", 1990, 60)],
            income: vec![income("a", 30_000.0)],
            committed_outgoings: vec![rent(2_000.0)],
            ..Household::default()
        };
        household.contributions = vec![Contribution {
            id: "isa-topup".to_string(),
            person_id: "a".to_string(),
            label: String::new(),
            target: ContributionTarget::Isa,
            amount: 20_000.0,
            frequency: Frequency::Annually,
        }];
        let first = run(&household, 0.0, 40).years.remove(0);
        // take-home less £24k rent is all that can be saved
        assert_eq!(first.accessible_wealth, first.surplus);
        assert!(first.accessible_wealth < 20_000.0);
    }

    #[test]
    fn accessible_draw_is_proportional_to_balances() {
        let states = [
            PersonState {
                pension_pot: 0.0,
                accessible_wealth: 30_000.0,
            },
            PersonState {
                pension_pot: 0.0,
                accessible_wealth: 10_000.0,
            },
        ];
        let (next, draws) = draw_from_accessible(&states, 8_000.0);
        assert_eq!(draws, vec![6_000.0, 2_000.0]);
        assert_eq!(next[0].accessible_wealth, 24_000.0);
        assert_eq!(next[1].accessible_wealth, 8_000.0);
    }

    #[test]
    fn accessible_draw_never_exceeds_holdings() {
        let states = [PersonState {
            pension_pot: 0.0,
            accessible_wealth: 5_000.0,
        }];
        let (next, draws) = draw_from_accessible(&states, 8_000.0);
        assert_eq!(draws, vec![5_000.0]);
        assert_eq!(next[0].accessible_wealth, 0.0);
    }

    #[test]
    fn surplus_is_split_evenly_when_nobody_holds_anything() {
        let states = [PersonState::default(), PersonState::default()];
        let next = reinvest_surplus(&states, 1_000.0);
        assert_eq!(next[0].accessible_wealth, 500.0);
        assert_eq!(next[1].accessible_wealth, 500.0);
    }

    #[test]
    fn pension_gross_up_covers_tax_on_taxable_share() {
        let engine = UkTaxEngine::default();
        // state pension already uses most of the personal allowance
        let draw = gross_up_pension_withdrawal(18_000.0, 500_000.0, 0.0, 11_502.4, 0.25, &engine);
        assert!((draw.net - 18_000.0).abs() <= GROSS_UP_TOLERANCE, "{draw:?}");
        assert!(draw.gross > draw.net);
        let recomputed = net_from_additional_pension_gross(draw.gross, 0.0, 11_502.4, 0.25, &engine);
        assert!((recomputed - draw.net).abs() < 1e-9);
    }

    #[test]
    fn pension_gross_up_takes_whole_pot_when_short() {
        let engine = UkTaxEngine::default();
        let draw = gross_up_pension_withdrawal(50_000.0, 10_000.0, 0.0, 0.0, 0.25, &engine);
        assert_eq!(draw.gross, 10_000.0);
        assert_eq!(draw.net, 10_000.0);
    }

    #[test]
    fn pension_is_drawn_before_accessible_wealth() {
        let household = Household {
            persons: vec![person("a", 1964, 60)],
            accounts: vec![
                account("sipp", "a", AccountType::Sipp, 400_000.0),
                account("isa", "a", AccountType::StocksAndSharesIsa, 100_000.0),
            ],
            committed_outgoings: vec![rent(1_500.0)],
            ..Household::default()
        };
        let first = run(&household, 0.0, 61).years.remove(0);
        assert_eq!(first.age, 60);
        assert!(first.pension_drawdown > 0.0);
        assert_eq!(first.investment_drawdown, 0.0);
        assert_eq!(first.unfunded_shortfall, 0.0);
        assert_eq!(first.accessible_wealth, 100_000.0);
    }

    #[test]
    fn pension_is_locked_before_access_age() {
        let household = Household {
            persons: vec![person("a", 1974, 50)],
            accounts: vec![
                account("sipp", "a", AccountType::Sipp, 400_000.0),
                account("isa", "a", AccountType::StocksAndSharesIsa, 5_000.0),
            ],
            committed_outgoings: vec![rent(1_000.0)],
            ..Household::default()
        };
        let first = run(&household, 0.0, 51).years.remove(0);
        assert_eq!(first.pension_drawdown, 0.0);
        assert_eq!(first.investment_drawdown, 5_000.0);
        assert_eq!(first.unfunded_shortfall, 7_000.0);
        assert_eq!(first.pension_balance, 400_000.0);
    }

    #[test]
    fn contributions_land_before_growth() {
        let mut household = Household {
            persons: vec![person("a", 1990, 60)],
            income: vec![income("a", 30_000.0)],
            accounts: vec![account("sipp", "a", AccountType::Sipp, 10_000.0)],
            ..Household::default()
        };
        household.contributions = vec![Contribution {
            id: "c".to_string(),
            person_id: "a".to_string(),
            label: String::new(),
            target: ContributionTarget::Pension,
            amount: 1_000.0,
            frequency: Frequency::Annually,
        }];
        let first = run(&household, 0.10, 40).years.remove(0);
        assert_eq!(first.pension_balance, 12_100.0);
    }

    #[test]
    fn bonus_without_vesting_schedule_is_paid_in_full() {
        let bonus = BonusStructure {
            person_id: "a".to_string(),
            total_bonus_annual: 10_000.0,
            cash_bonus_annual: 4_000.0,
            vesting_years: 0,
            vesting_gap_years: 0,
            estimated_return: 0.0,
        };
        assert_eq!(bonus_paid_in_year(&bonus, 0.0, 3), 10_000.0);
    }

    #[test]
    fn deferred_tranches_grow_until_vesting() {
        let bonus = BonusStructure {
            person_id: "a".to_string(),
            total_bonus_annual: 9_000.0,
            cash_bonus_annual: 3_000.0,
            vesting_years: 3,
            vesting_gap_years: 1,
            estimated_return: 0.10,
        };
        let expected = 3_000.0 + 2_000.0 * (1.1_f64.powi(2) + 1.1_f64.powi(3) + 1.1_f64.powi(4));
        assert!((bonus_paid_in_year(&bonus, 0.0, 0) - expected).abs() < 1e-6);
    }

    #[test]
    fn events_follow_primary_age_axis_and_are_deduplicated() {
        let mut b = person("b", 1982, 60);
        b.name = "A".to_string();
        let household = Household {
            persons: vec![person("a", 1980, 60), b],
            committed_outgoings: vec![CommittedOutgoing {
                end_date: Some(date(2030, 12, 31)),
                ..rent(100.0)
            }],
            ..Household::default()
        };
        let flow = run(&household, 0.0, 95);
        let events: Vec<(u32, &str)> = flow
            .events
            .iter()
            .map(|e| (e.age, e.label.as_str()))
            .collect();
        assert!(events.contains(&(50, "Rent ends")));
        assert!(events.contains(&(60, "A retires")));
        assert!(events.contains(&(62, "A retires")));
        assert!(events.contains(&(57, "A pension access")));
        let mut sorted = events.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(events, sorted);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_balances_stay_finite_and_non_negative(
            born in 1950i32..2000,
            salary in 0u32..150_000,
            pension in 0u32..1_000_000,
            isa in 0u32..500_000,
            monthly_spend in 0u32..8_000,
            rate_bp in -300i32..1_000
        ) {
            let household = Household {
                persons: vec![person("a", born, 60)],
                income: vec![income("a", salary as f64)],
                accounts: vec![
                    account("sipp", "a", AccountType::Sipp, pension as f64),
                    account("isa", "a", AccountType::StocksAndSharesIsa, isa as f64),
                ],
                committed_outgoings: vec![rent(monthly_spend as f64)],
                ..Household::default()
            };
            for row in run(&household, rate_bp as f64 / 10_000.0, 95).years {
                prop_assert!(row.pension_balance.is_finite() && row.pension_balance >= 0.0);
                prop_assert!(row.accessible_wealth.is_finite() && row.accessible_wealth >= 0.0);
                prop_assert!(row.unfunded_shortfall >= 0.0);
                prop_assert!(row.total_income + row.unfunded_shortfall + 2.0 >= row.total_expenditure);
            }
        }
    }
}
