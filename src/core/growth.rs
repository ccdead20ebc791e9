use chrono::NaiveDate;

use super::constants::{PensionAllowance, StatePension};
use super::dates::DAYS_PER_YEAR;
use super::types::{
    CarryForward, PensionBridge, PriorYearAllowance, RetirementCountdown, YearlyProjection,
};

pub const MAX_COUNTDOWN_MONTHS: u32 = 1_200;

pub fn round_to_minor_unit(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

fn compound_monthly_step(value: f64, monthly_rate: f64, monthly_contribution: f64) -> f64 {
    value * (1.0 + monthly_rate) + monthly_contribution
}

/// Monthly compounding at `annual_rate / 12`, contribution added after each
/// month's growth. One entry per elapsed year.
pub fn project_compound_growth(
    value: f64,
    monthly_contribution: f64,
    annual_rate: f64,
    years: u32,
) -> Vec<YearlyProjection> {
    let monthly_rate = finite_or_zero(annual_rate) / 12.0;
    let monthly_contribution = finite_or_zero(monthly_contribution);
    let mut current = finite_or_zero(value);

    let mut projections = Vec::with_capacity(years as usize);
    for year in 1..=years {
        for _ in 0..12 {
            current = compound_monthly_step(current, monthly_rate, monthly_contribution);
        }
        projections.push(YearlyProjection {
            year,
            value: round_to_minor_unit(current),
        });
    }
    projections
}

pub fn project_final_value(
    value: f64,
    monthly_contribution: f64,
    annual_rate: f64,
    years: u32,
) -> f64 {
    project_compound_growth(value, monthly_contribution, annual_rate, years)
        .last()
        .map(|p| p.value)
        .unwrap_or_else(|| round_to_minor_unit(finite_or_zero(value)))
}

/// Annual compounding with a contribution that grows geometrically each year.
/// Once `contribution_years` have passed nothing further is added.
pub fn project_compound_growth_with_growing_contributions(
    value: f64,
    annual_contribution: f64,
    annual_rate: f64,
    contribution_growth_rate: f64,
    years: u32,
    contribution_years: Option<u32>,
) -> Vec<YearlyProjection> {
    let rate = finite_or_zero(annual_rate);
    let growth = finite_or_zero(contribution_growth_rate);
    let base_contribution = finite_or_zero(annual_contribution);
    let mut current = finite_or_zero(value);

    let mut projections = Vec::with_capacity(years as usize);
    for year in 1..=years {
        let contributing = contribution_years.is_none_or(|limit| year <= limit);
        let contribution = if contributing {
            base_contribution * (1.0 + growth).powi(year as i32 - 1)
        } else {
            0.0
        };
        current = current * (1.0 + rate) + contribution;
        projections.push(YearlyProjection {
            year,
            value: round_to_minor_unit(current),
        });
    }
    projections
}

/// Months until `pot` reaches `target`, simulated monthly and capped at 100
/// years. A capped result means "never" and is reported as 100 years.
pub fn calculate_retirement_countdown(
    pot: f64,
    annual_contribution: f64,
    target: f64,
    annual_rate: f64,
) -> RetirementCountdown {
    if pot >= target {
        return RetirementCountdown {
            years: 0,
            months: 0,
        };
    }

    let monthly_rate = finite_or_zero(annual_rate) / 12.0;
    let monthly_contribution = finite_or_zero(annual_contribution) / 12.0;
    let mut current = finite_or_zero(pot);
    let mut months = 0;
    while current < target && months < MAX_COUNTDOWN_MONTHS {
        current = compound_monthly_step(current, monthly_rate, monthly_contribution);
        months += 1;
    }

    RetirementCountdown {
        years: months / 12,
        months: months % 12,
    }
}

impl RetirementCountdown {
    pub fn is_capped(&self) -> bool {
        self.years * 12 + self.months >= MAX_COUNTDOWN_MONTHS
    }
}

pub fn calculate_coast_fire(
    pot: f64,
    target: f64,
    target_age: u32,
    current_age: u32,
    annual_rate: f64,
) -> bool {
    if target_age <= current_age {
        return pot >= target;
    }
    let years = (target_age - current_age) as i32;
    pot * (1.0 + finite_or_zero(annual_rate)).powi(years) >= target
}

pub fn calculate_required_savings(target: f64, pot: f64, years: i32, annual_rate: f64) -> f64 {
    let shortfall = (target - pot).max(0.0);
    if years <= 0 {
        return round_to_minor_unit(shortfall);
    }

    let months = years as f64 * 12.0;
    let monthly_rate = finite_or_zero(annual_rate) / 12.0;

    if monthly_rate.abs() < 1e-9 {
        return round_to_minor_unit(shortfall / months);
    }

    let growth = (1.0 + monthly_rate).powf(months);
    let remaining = target - pot * growth;
    if remaining <= 0.0 {
        return 0.0;
    }

    let monthly = remaining * monthly_rate / (growth - 1.0);
    if monthly.is_finite() && monthly >= 0.0 {
        round_to_minor_unit(monthly)
    } else {
        round_to_minor_unit(shortfall / months)
    }
}

pub fn calculate_pension_bridge(
    retirement_age: u32,
    pension_access_age: u32,
    annual_spend: f64,
    accessible_wealth: f64,
) -> PensionBridge {
    let bridge_years = pension_access_age.saturating_sub(retirement_age);
    let required_amount = bridge_years as f64 * finite_or_zero(annual_spend).max(0.0);
    let shortfall = (required_amount - finite_or_zero(accessible_wealth)).max(0.0);
    PensionBridge {
        bridge_years,
        required_amount,
        shortfall,
        sufficient: shortfall <= 0.0,
    }
}

pub fn calculate_swr(pot: f64, withdrawal_rate: f64) -> f64 {
    if !withdrawal_rate.is_finite() || withdrawal_rate <= 0.0 {
        return 0.0;
    }
    finite_or_zero(pot).max(0.0) * withdrawal_rate
}

/// Pot needed to fund `annual_income` at `withdrawal_rate`.
///
/// A zero or negative rate can never sustain an income, so it yields
/// `f64::INFINITY`. Callers that sum the result must check `is_finite()`.
pub fn calculate_required_pot(annual_income: f64, withdrawal_rate: f64) -> f64 {
    if !annual_income.is_finite() || annual_income <= 0.0 {
        return 0.0;
    }
    if !withdrawal_rate.is_finite() || withdrawal_rate <= 0.0 {
        return f64::INFINITY;
    }
    annual_income / withdrawal_rate
}

pub fn calculate_adjusted_required_pot(
    target_income: f64,
    withdrawal_rate: f64,
    state_pension_income: f64,
    include_state_pension: bool,
) -> f64 {
    let offset = if include_state_pension {
        finite_or_zero(state_pension_income).max(0.0)
    } else {
        0.0
    };
    calculate_required_pot((target_income - offset).max(0.0), withdrawal_rate)
}

pub fn calculate_pro_rata_state_pension(qualifying_years: u32, state_pension: &StatePension) -> f64 {
    if qualifying_years < state_pension.minimum_qualifying_years {
        return 0.0;
    }
    if qualifying_years >= state_pension.full_qualifying_years {
        return state_pension.full_annual_amount;
    }
    round_to_minor_unit(
        state_pension.full_annual_amount * qualifying_years as f64
            / state_pension.full_qualifying_years.max(1) as f64,
    )
}

/// Annual allowance after the high-income taper: £1 lost per £2 of adjusted
/// income over the limit, never below the statutory minimum.
pub fn calculate_tapered_annual_allowance(
    threshold_income: f64,
    adjusted_income: f64,
    allowance: &PensionAllowance,
) -> f64 {
    if threshold_income <= allowance.taper_threshold_income
        || adjusted_income <= allowance.taper_adjusted_income
    {
        return allowance.annual_allowance;
    }
    let reduction = ((adjusted_income - allowance.taper_adjusted_income) / 2.0).floor();
    (allowance.annual_allowance - reduction).max(allowance.minimum_tapered_allowance)
}

/// `prior_years` is ordered most recent first; only the carry-forward window
/// is considered.
pub fn calculate_pension_carry_forward(
    current_allowance: f64,
    prior_years: &[PriorYearAllowance],
    allowance: &PensionAllowance,
) -> CarryForward {
    let carried_forward: f64 = prior_years
        .iter()
        .take(allowance.carry_forward_years)
        .map(|year| (year.allowance - year.contributions).max(0.0))
        .sum();
    let current_allowance = current_allowance.max(0.0);
    CarryForward {
        current_allowance,
        carried_forward,
        total_available: current_allowance + carried_forward,
    }
}

pub fn project_deferred_bonus_value(
    amount: f64,
    grant_date: NaiveDate,
    vest_date: NaiveDate,
    annual_rate: f64,
) -> f64 {
    let days = (vest_date - grant_date).num_days();
    if days <= 0 {
        return amount;
    }
    let years = days as f64 / DAYS_PER_YEAR;
    round_to_minor_unit(amount * (1.0 + finite_or_zero(annual_rate)).powf(years))
}
