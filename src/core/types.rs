use std::collections::HashSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::dates::calculate_age;

pub const MAX_QUALIFYING_YEARS: u32 = 50;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TaxWrapper {
    Pension,
    Isa,
    Gia,
    Cash,
    PremiumBonds,
}

impl TaxWrapper {
    pub fn is_accessible(self) -> bool {
        self != TaxWrapper::Pension
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    WorkplacePension,
    Sipp,
    StocksAndSharesIsa,
    CashIsa,
    LifetimeIsa,
    Gia,
    CashSavings,
    CurrentAccount,
    PremiumBonds,
}

impl AccountType {
    pub fn wrapper(self) -> TaxWrapper {
        match self {
            AccountType::WorkplacePension | AccountType::Sipp => TaxWrapper::Pension,
            AccountType::StocksAndSharesIsa | AccountType::CashIsa | AccountType::LifetimeIsa => {
                TaxWrapper::Isa
            }
            AccountType::Gia => TaxWrapper::Gia,
            AccountType::CashSavings | AccountType::CurrentAccount => TaxWrapper::Cash,
            AccountType::PremiumBonds => TaxWrapper::PremiumBonds,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StudentLoanPlan {
    #[default]
    None,
    Plan1,
    Plan2,
    Plan4,
    Plan5,
    Postgraduate,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PensionMethod {
    SalarySacrifice,
    #[default]
    NetPay,
    ReliefAtSource,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Weekly,
    Monthly,
    Quarterly,
    Annually,
    Termly,
}

impl Frequency {
    pub fn annual_multiplier(self) -> f64 {
        match self {
            Frequency::Weekly => 52.14,
            Frequency::Monthly => 12.0,
            Frequency::Quarterly => 4.0,
            Frequency::Annually => 1.0,
            Frequency::Termly => 3.0,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionTarget {
    Isa,
    Pension,
    Gia,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub planned_retirement_age: u32,
    pub pension_access_age: u32,
    pub state_pension_age: u32,
    #[serde(default)]
    pub ni_qualifying_years: u32,
    #[serde(default)]
    pub student_loan_plan: StudentLoanPlan,
}

impl Person {
    pub fn age(&self, now: NaiveDate) -> u32 {
        calculate_age(self.date_of_birth, now)
    }

    pub fn qualifying_years(&self) -> u32 {
        self.ni_qualifying_years.min(MAX_QUALIFYING_YEARS)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub person_id: String,
    #[serde(default)]
    pub name: String,
    pub account_type: AccountType,
    pub current_value: f64,
}

impl Account {
    pub fn wrapper(&self) -> TaxWrapper {
        self.account_type.wrapper()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonIncome {
    pub person_id: String,
    pub gross_salary: f64,
    #[serde(default)]
    pub employer_pension_contribution: f64,
    #[serde(default)]
    pub employee_pension_contribution: f64,
    #[serde(default)]
    pub pension_method: PensionMethod,
    #[serde(default)]
    pub salary_growth_rate: f64,
    #[serde(default)]
    pub bonus_growth_rate: f64,
}

impl PersonIncome {
    pub fn total_pension_contribution(&self) -> f64 {
        self.employer_pension_contribution.max(0.0) + self.employee_pension_contribution.max(0.0)
    }
}

/// Annual bonus: `cash_bonus_annual` is paid immediately, the remainder of
/// `total_bonus_annual` is granted as equal tranches that vest one per year
/// after `vesting_gap_years`, growing at `estimated_return` until they vest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BonusStructure {
    pub person_id: String,
    pub total_bonus_annual: f64,
    #[serde(default)]
    pub cash_bonus_annual: f64,
    #[serde(default)]
    pub vesting_years: u32,
    #[serde(default)]
    pub vesting_gap_years: u32,
    #[serde(default)]
    pub estimated_return: f64,
}

impl BonusStructure {
    pub fn deferred_annual(&self) -> f64 {
        (self.total_bonus_annual - self.cash_bonus_annual.max(0.0)).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub id: String,
    pub person_id: String,
    #[serde(default)]
    pub label: String,
    pub target: ContributionTarget,
    pub amount: f64,
    pub frequency: Frequency,
}

impl Contribution {
    pub fn annual_amount(&self) -> f64 {
        self.amount.max(0.0) * self.frequency.annual_multiplier()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub estimated_value: f64,
    #[serde(default)]
    pub mortgage_balance: f64,
    #[serde(default)]
    pub owner_person_ids: Vec<String>,
    #[serde(default)]
    pub mortgage_rate: Option<f64>,
    #[serde(default)]
    pub mortgage_term_years: Option<u32>,
    #[serde(default)]
    pub mortgage_start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommittedOutgoing {
    pub id: String,
    #[serde(default)]
    pub label: String,
    pub amount: f64,
    pub frequency: Frequency,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub inflation_rate: Option<f64>,
    #[serde(default)]
    pub linked_child_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub date_of_birth: NaiveDate,
    pub annual_school_fee: f64,
    #[serde(default)]
    pub fee_inflation_rate: f64,
    #[serde(default = "default_school_start_age")]
    pub school_start_age: u32,
    #[serde(default = "default_school_end_age")]
    pub school_end_age: u32,
}

fn default_school_start_age() -> u32 {
    4
}

fn default_school_end_age() -> u32 {
    18
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetirementConfig {
    pub target_annual_income: f64,
    pub withdrawal_rate: f64,
    pub include_state_pension: bool,
    pub growth_rate: f64,
    pub end_age: u32,
}

impl Default for RetirementConfig {
    fn default() -> Self {
        Self {
            target_annual_income: 0.0,
            withdrawal_rate: 0.04,
            include_state_pension: true,
            growth_rate: 0.05,
            end_age: 95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmergencyFundConfig {
    pub target_months: f64,
    pub monthly_essential_expenses: f64,
    pub monthly_lifestyle_spending: f64,
}

impl Default for EmergencyFundConfig {
    fn default() -> Self {
        Self {
            target_months: 6.0,
            monthly_essential_expenses: 0.0,
            monthly_lifestyle_spending: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gift {
    pub id: String,
    pub date: NaiveDate,
    pub amount: f64,
    #[serde(default)]
    pub recipient: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IhtConfig {
    pub passing_to_direct_descendants: bool,
    pub include_pensions: bool,
    pub gifts: Vec<Gift>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Household {
    pub persons: Vec<Person>,
    pub accounts: Vec<Account>,
    pub income: Vec<PersonIncome>,
    pub bonus_structures: Vec<BonusStructure>,
    pub contributions: Vec<Contribution>,
    pub properties: Vec<Property>,
    pub committed_outgoings: Vec<CommittedOutgoing>,
    pub children: Vec<Child>,
    pub retirement: RetirementConfig,
    pub emergency_fund: EmergencyFundConfig,
    pub iht: IhtConfig,
}

impl Household {
    pub fn primary_person(&self) -> Option<&Person> {
        self.persons.first()
    }

    pub fn person(&self, id: &str) -> Option<&Person> {
        self.persons.iter().find(|p| p.id == id)
    }

    pub fn has_person(&self, id: &str) -> bool {
        self.person(id).is_some()
    }

    pub fn income_for(&self, person_id: &str) -> Option<&PersonIncome> {
        self.income.iter().find(|i| i.person_id == person_id)
    }

    pub fn bonus_for(&self, person_id: &str) -> Option<&BonusStructure> {
        self.bonus_structures
            .iter()
            .find(|b| b.person_id == person_id)
    }

    pub fn owned_accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter().filter(|a| self.has_person(&a.person_id))
    }

    pub fn accounts_for<'a>(&'a self, person_id: &'a str) -> impl Iterator<Item = &'a Account> {
        self.accounts.iter().filter(move |a| a.person_id == person_id)
    }

    pub fn contributions_for<'a>(
        &'a self,
        person_id: &'a str,
    ) -> impl Iterator<Item = &'a Contribution> {
        self.contributions
            .iter()
            .filter(move |c| c.person_id == person_id)
    }

    /// Structural checks. Dangling references are tolerated and filtered
    /// downstream, so they are not reported here.
    pub fn validate(&self) -> EngineResult<()> {
        let mut seen = HashSet::new();
        for person in &self.persons {
            if !seen.insert(person.id.as_str()) {
                return Err(EngineError::InvalidHousehold(format!(
                    "duplicate person id '{}'",
                    person.id
                )));
            }
            if person.planned_retirement_age > 120
                || person.pension_access_age > 120
                || person.state_pension_age > 120
            {
                return Err(EngineError::InvalidHousehold(format!(
                    "person '{}' has an age setting above 120",
                    person.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.id.as_str()) {
                return Err(EngineError::InvalidHousehold(format!(
                    "duplicate account id '{}'",
                    account.id
                )));
            }
            if !account.current_value.is_finite() || account.current_value < 0.0 {
                return Err(EngineError::InvalidHousehold(format!(
                    "account '{}' must have a finite, non-negative value",
                    account.id
                )));
            }
        }

        for income in &self.income {
            if !income.gross_salary.is_finite() || income.gross_salary < 0.0 {
                return Err(EngineError::InvalidHousehold(format!(
                    "income for '{}' must have a finite, non-negative salary",
                    income.person_id
                )));
            }
        }

        for property in &self.properties {
            if property.estimated_value < 0.0 || property.mortgage_balance < 0.0 {
                return Err(EngineError::InvalidHousehold(format!(
                    "property '{}' must have non-negative value and mortgage",
                    property.id
                )));
            }
        }

        let rate = self.retirement.withdrawal_rate;
        if !rate.is_finite() || !self.retirement.growth_rate.is_finite() {
            return Err(EngineError::InvalidHousehold(
                "retirement rates must be finite".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyProjection {
    pub year: u32,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetirementCountdown {
    pub years: u32,
    pub months: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionBridge {
    pub bridge_years: u32,
    pub required_amount: f64,
    pub shortfall: f64,
    pub sufficient: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorYearAllowance {
    pub allowance: f64,
    pub contributions: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CarryForward {
    pub current_allowance: f64,
    pub carried_forward: f64,
    pub total_available: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonYearSnapshot {
    pub person_id: String,
    pub age: u32,
    pub employment_income: f64,
    pub state_pension_income: f64,
    pub pension_drawdown: f64,
    pub investment_drawdown: f64,
    pub pension_pot: f64,
    pub accessible_wealth: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeCashFlowYear {
    pub year: i32,
    pub age: u32,
    pub employment_income: f64,
    pub state_pension_income: f64,
    pub pension_drawdown: f64,
    pub investment_drawdown: f64,
    pub total_income: f64,
    pub total_expenditure: f64,
    pub surplus: f64,
    pub unfunded_shortfall: f64,
    pub pension_balance: f64,
    pub accessible_wealth: f64,
    pub total_wealth: f64,
    pub persons: Vec<PersonYearSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CashFlowEvent {
    pub age: u32,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeCashFlow {
    pub years: Vec<LifetimeCashFlowYear>,
    pub events: Vec<CashFlowEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileValue {
    pub percentile: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloYear {
    pub year: u32,
    pub percentiles: Vec<PercentileValue>,
    pub mean: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloResult {
    pub simulations: u32,
    pub years: Vec<MonteCarloYear>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IhtResult {
    pub estate_value: f64,
    pub effective_nil_rate_band: f64,
    pub effective_residence_nil_rate_band: f64,
    pub rnrb_taper_reduction: f64,
    pub combined_threshold: f64,
    pub taxable_amount: f64,
    pub liability: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SensitivityInput {
    CurrentPot,
    AnnualContributions,
    GrowthRate,
    RetirementAge,
    Salary,
    WithdrawalRate,
    TargetIncome,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityImpact {
    pub input: SensitivityInput,
    pub impact: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityResult {
    pub baseline_projected_pot: f64,
    pub baseline_required_pot: f64,
    pub impacts: Vec<SensitivityImpact>,
}
