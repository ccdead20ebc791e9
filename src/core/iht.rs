use chrono::NaiveDate;

use super::aggregation::total_property_equity;
use super::constants::{InheritanceTax, TaxConstants};
use super::dates::years_since;
use super::growth::round_to_minor_unit;
use super::types::{Gift, Household, IhtResult, TaxWrapper};

pub const MAX_IHT_PROJECTION_YEARS: u32 = 100;

fn band_holders(persons: u32) -> f64 {
    persons.clamp(1, 2) as f64
}

/// Gifts made inside the rolling window before `now`. Future-dated gifts are
/// not counted.
pub fn gifts_within_window<'a>(
    gifts: &'a [Gift],
    now: NaiveDate,
    iht: &InheritanceTax,
) -> impl Iterator<Item = &'a Gift> + 'a {
    let window = iht.gift_window_years;
    gifts.iter().filter(move |g| {
        let elapsed = years_since(g.date, now);
        (0.0..window).contains(&elapsed)
    })
}

pub fn calculate_effective_nrb(persons: u32, gifts_in_window: f64, iht: &InheritanceTax) -> f64 {
    (iht.nil_rate_band * band_holders(persons) - gifts_in_window.max(0.0)).max(0.0)
}

/// £1 off the residence band for every £2 the estate exceeds the taper
/// threshold, in whole pounds.
pub fn calculate_rnrb_taper_reduction(estate_value: f64, iht: &InheritanceTax) -> f64 {
    if estate_value <= iht.rnrb_taper_threshold {
        return 0.0;
    }
    ((estate_value - iht.rnrb_taper_threshold) / 2.0).floor()
}

pub fn calculate_effective_rnrb(
    estate_value: f64,
    persons: u32,
    passing_to_direct_descendants: bool,
    iht: &InheritanceTax,
) -> f64 {
    if !passing_to_direct_descendants {
        return 0.0;
    }
    let band = iht.residence_nil_rate_band * band_holders(persons);
    (band - calculate_rnrb_taper_reduction(estate_value, iht)).max(0.0)
}

pub fn calculate_iht(
    estate_value: f64,
    persons: u32,
    gifts_in_window: f64,
    passing_to_direct_descendants: bool,
    iht: &InheritanceTax,
) -> IhtResult {
    let estate_value = if estate_value.is_finite() { estate_value.max(0.0) } else { 0.0 };
    let effective_nil_rate_band = calculate_effective_nrb(persons, gifts_in_window, iht);
    let rnrb_taper_reduction = if passing_to_direct_descendants {
        calculate_rnrb_taper_reduction(estate_value, iht)
    } else {
        0.0
    };
    let effective_residence_nil_rate_band =
        calculate_effective_rnrb(estate_value, persons, passing_to_direct_descendants, iht);
    let combined_threshold = effective_nil_rate_band + effective_residence_nil_rate_band;
    let taxable_amount = (estate_value - combined_threshold).max(0.0);

    IhtResult {
        estate_value,
        effective_nil_rate_band,
        effective_residence_nil_rate_band,
        rnrb_taper_reduction,
        combined_threshold,
        taxable_amount,
        liability: round_to_minor_unit(taxable_amount * iht.rate),
    }
}

/// Years until the estate reaches `threshold`: `Some(0)` when already there,
/// `None` when it does not get there within the projection cap.
///
/// With `property_growth` and `property_base_value`, the property share of
/// the estate is taken out of the compounding pot and valued by the function
/// instead (called with the elapsed year).
pub fn calculate_years_until_iht_exceeded(
    estate_value: f64,
    threshold: f64,
    annual_savings: f64,
    growth_rate: f64,
    property_growth: Option<&dyn Fn(u32) -> f64>,
    property_base_value: Option<f64>,
) -> Option<u32> {
    if estate_value >= threshold {
        return Some(0);
    }
    let growth_rate = if growth_rate.is_finite() { growth_rate } else { 0.0 };
    let annual_savings = if annual_savings.is_finite() { annual_savings } else { 0.0 };

    let property = property_growth.zip(property_base_value);
    let mut other_assets = match property {
        Some((_, base)) => estate_value - base,
        None => estate_value,
    };

    for year in 1..=MAX_IHT_PROJECTION_YEARS {
        other_assets = other_assets * (1.0 + growth_rate) + annual_savings;
        let estate = match property {
            Some((value_at, _)) => other_assets + value_at(year),
            None => other_assets,
        };
        if estate >= threshold {
            return Some(year);
        }
    }
    None
}

/// Owned accounts (pensions only when configured) plus the equity of
/// properties with an existing owner.
pub fn household_estate_value(household: &Household) -> f64 {
    let include_pensions = household.iht.include_pensions;
    let accounts: f64 = household
        .owned_accounts()
        .filter(|a| include_pensions || a.wrapper() != TaxWrapper::Pension)
        .map(|a| a.current_value.max(0.0))
        .sum();
    accounts + total_property_equity(household)
}

pub fn household_iht(household: &Household, now: NaiveDate, constants: &TaxConstants) -> IhtResult {
    let iht = &constants.inheritance_tax;
    let persons = household.persons.len().min(2) as u32;
    let gifts: f64 = gifts_within_window(&household.iht.gifts, now, iht)
        .map(|g| g.amount.max(0.0))
        .sum();
    calculate_iht(
        household_estate_value(household),
        persons,
        gifts,
        household.iht.passing_to_direct_descendants,
        iht,
    )
}
