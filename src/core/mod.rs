pub mod aggregation;
pub mod cashflow;
pub mod constants;
pub mod dates;
pub mod growth;
pub mod iht;
pub mod monte_carlo;
pub mod outgoings;
pub mod scenario;
pub mod sensitivity;
pub mod tax;
pub mod types;

pub use cashflow::generate_lifetime_cash_flow;
pub use constants::TaxConstants;
pub use iht::{calculate_iht, household_iht};
pub use monte_carlo::{MonteCarloConfig, compute_success_probability, run_monte_carlo};
pub use scenario::{ScenarioOverrides, apply_scenario_overrides};
pub use sensitivity::analyse_sensitivity;
pub use tax::{TaxEngine, UkTaxEngine};
pub use types::{Household, LifetimeCashFlow, MonteCarloResult, SensitivityResult};
