use chrono::NaiveDate;

use super::aggregation::annual_contributions_by_target;
use super::constants::TaxConstants;
use super::growth::{
    calculate_adjusted_required_pot, calculate_pro_rata_state_pension, project_final_value,
};
use super::types::{Household, SensitivityImpact, SensitivityInput, SensitivityResult};

const POT_BUMP: f64 = 0.10;
const CONTRIBUTION_BUMP: f64 = 0.10;
const GROWTH_RATE_BUMP: f64 = 0.01;
const SALARY_BUMP: f64 = 0.10;
const WITHDRAWAL_RATE_CUT: f64 = 0.005;
pub const TARGET_INCOME_BUMP: f64 = 5_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Baseline {
    pot: f64,
    annual_contributions: f64,
    salary_linked_contributions: f64,
    growth_rate: f64,
    years_to_retirement: u32,
    target_income: f64,
    withdrawal_rate: f64,
    state_pension: f64,
    include_state_pension: bool,
}

impl Baseline {
    fn from_household(
        household: &Household,
        now: NaiveDate,
        constants: &TaxConstants,
    ) -> Option<Self> {
        let primary = household.primary_person()?;
        let pot = household
            .owned_accounts()
            .map(|a| a.current_value.max(0.0))
            .sum();
        let salary_linked_contributions: f64 = household
            .income
            .iter()
            .filter(|i| household.has_person(&i.person_id))
            .map(|i| i.total_pension_contribution())
            .sum();
        let discretionary = annual_contributions_by_target(household).total();
        let retirement = &household.retirement;

        Some(Self {
            pot,
            annual_contributions: discretionary + salary_linked_contributions,
            salary_linked_contributions,
            growth_rate: retirement.growth_rate,
            years_to_retirement: primary
                .planned_retirement_age
                .saturating_sub(primary.age(now)),
            target_income: retirement.target_annual_income,
            withdrawal_rate: retirement.withdrawal_rate,
            state_pension: calculate_pro_rata_state_pension(
                primary.qualifying_years(),
                &constants.state_pension,
            ),
            include_state_pension: retirement.include_state_pension,
        })
    }

    fn projected_pot(&self) -> f64 {
        project_final_value(
            self.pot,
            self.annual_contributions / 12.0,
            self.growth_rate,
            self.years_to_retirement,
        )
    }

    fn required_pot(&self) -> f64 {
        calculate_adjusted_required_pot(
            self.target_income,
            self.withdrawal_rate,
            self.state_pension,
            self.include_state_pension,
        )
    }
}

/// Change in the projected pot at retirement for each single-input nudge,
/// plus the change in the required pot (sign flipped, so a bigger number is
/// always better) for the withdrawal-rate and target-income nudges. Sorted by
/// size of impact.
pub fn analyse_sensitivity(
    household: &Household,
    now: NaiveDate,
    constants: &TaxConstants,
) -> SensitivityResult {
    let Some(baseline) = Baseline::from_household(household, now, constants) else {
        return SensitivityResult::default();
    };
    let projected = baseline.projected_pot();
    let required = baseline.required_pot();

    let projection_nudges = [
        (
            SensitivityInput::CurrentPot,
            Baseline {
                pot: baseline.pot * (1.0 + POT_BUMP),
                ..baseline
            },
        ),
        (
            SensitivityInput::AnnualContributions,
            Baseline {
                annual_contributions: baseline.annual_contributions * (1.0 + CONTRIBUTION_BUMP),
                ..baseline
            },
        ),
        (
            SensitivityInput::GrowthRate,
            Baseline {
                growth_rate: baseline.growth_rate + GROWTH_RATE_BUMP,
                ..baseline
            },
        ),
        (
            SensitivityInput::RetirementAge,
            Baseline {
                years_to_retirement: baseline.years_to_retirement + 1,
                ..baseline
            },
        ),
        (
            SensitivityInput::Salary,
            Baseline {
                annual_contributions: baseline.annual_contributions
                    + baseline.salary_linked_contributions * SALARY_BUMP,
                ..baseline
            },
        ),
    ];
    let requirement_nudges = [
        (
            SensitivityInput::WithdrawalRate,
            Baseline {
                withdrawal_rate: baseline.withdrawal_rate - WITHDRAWAL_RATE_CUT,
                ..baseline
            },
        ),
        (
            SensitivityInput::TargetIncome,
            Baseline {
                target_income: baseline.target_income + TARGET_INCOME_BUMP,
                ..baseline
            },
        ),
    ];

    let mut impacts: Vec<SensitivityImpact> = projection_nudges
        .iter()
        .map(|(input, nudged)| (*input, nudged.projected_pot() - projected))
        .chain(
            requirement_nudges
                .iter()
                .map(|(input, nudged)| (*input, required - nudged.required_pot())),
        )
        .filter_map(|(input, impact)| {
            if impact.is_finite() {
                Some(SensitivityImpact { input, impact })
            } else {
                tracing::warn!(?input, "skipping non-finite sensitivity impact");
                None
            }
        })
        .collect();
    impacts.sort_by(|a, b| b.impact.abs().total_cmp(&a.impact.abs()));

    SensitivityResult {
        baseline_projected_pot: projected,
        baseline_required_pot: if required.is_finite() { required } else { 0.0 },
        impacts,
    }
}
