use chrono::Datelike;

use super::dates::{school_end_date, school_start_date};
use super::types::{Child, CommittedOutgoing, Frequency, Household};

pub fn annualise(amount: f64, frequency: Frequency) -> f64 {
    amount * frequency.annual_multiplier()
}

impl CommittedOutgoing {
    pub fn annual_amount(&self) -> f64 {
        annualise(self.amount.max(0.0), self.frequency)
    }

    /// Share of calendar `year` (in whole months) inside the outgoing's
    /// start/end bounds.
    pub fn active_fraction(&self, year: i32) -> f64 {
        let first_month = match self.start_date {
            Some(start) if start.year() > year => return 0.0,
            Some(start) if start.year() == year => start.month(),
            _ => 1,
        };
        let last_month = match self.end_date {
            Some(end) if end.year() < year => return 0.0,
            Some(end) if end.year() == year => end.month(),
            _ => 12,
        };
        if last_month < first_month {
            return 0.0;
        }
        (last_month - first_month + 1) as f64 / 12.0
    }

    /// Annual amount in `year`, inflated from `base_year` at the outgoing's own
    /// rate. Without a rate the amount is fixed in nominal terms, as for a
    /// fixed-rate mortgage payment.
    pub fn inflated_annual_amount(&self, year: i32, base_year: i32) -> f64 {
        let elapsed = (year - base_year).max(0);
        let rate = self.inflation_rate.unwrap_or(0.0);
        self.annual_amount() * (1.0 + rate).powi(elapsed)
    }
}

pub fn school_fee_outgoing(child: &Child) -> Option<CommittedOutgoing> {
    if child.annual_school_fee <= 0.0 {
        return None;
    }
    let start_date = school_start_date(child.date_of_birth, child.school_start_age)?;
    let end_date = school_end_date(child.date_of_birth, child.school_end_age)?;
    let name = if child.name.is_empty() {
        child.id.as_str()
    } else {
        child.name.as_str()
    };
    Some(CommittedOutgoing {
        id: format!("school-fees-{}", child.id),
        label: format!("School fees ({name})"),
        amount: child.annual_school_fee / Frequency::Termly.annual_multiplier(),
        frequency: Frequency::Termly,
        start_date: Some(start_date),
        end_date: Some(end_date),
        inflation_rate: Some(child.fee_inflation_rate),
        linked_child_id: Some(child.id.clone()),
    })
}

pub fn generate_school_fee_outgoings(children: &[Child]) -> Vec<CommittedOutgoing> {
    children.iter().filter_map(school_fee_outgoing).collect()
}

/// Hand-entered outgoings plus freshly generated child-linked ones. Stored
/// child-linked rows are always regenerated from the child record, and rows
/// pointing at a missing child are dropped.
pub fn effective_outgoings(household: &Household) -> Vec<CommittedOutgoing> {
    let mut outgoings: Vec<CommittedOutgoing> = household
        .committed_outgoings
        .iter()
        .filter(|o| o.linked_child_id.is_none())
        .cloned()
        .collect();
    outgoings.extend(generate_school_fee_outgoings(&household.children));
    outgoings
}

pub fn annual_committed_spend(outgoings: &[CommittedOutgoing], year: i32, base_year: i32) -> f64 {
    outgoings
        .iter()
        .map(|o| o.inflated_annual_amount(year, base_year) * o.active_fraction(year))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn outgoing(amount: f64, frequency: Frequency) -> CommittedOutgoing {
        CommittedOutgoing {
            id: "o1".to_string(),
            label: "Mortgage".to_string(),
            amount,
            frequency,
            start_date: None,
            end_date: None,
            inflation_rate: None,
            linked_child_id: None,
        }
    }

    fn child() -> Child {
        Child {
            id: "c1".to_string(),
            name: "Ada".to_string(),
            date_of_birth: date(2020, 5, 1),
            annual_school_fee: 18_000.0,
            fee_inflation_rate: 0.05,
            school_start_age: 4,
            school_end_age: 18,
        }
    }

    #[test]
    fn annualise_uses_fixed_table() {
        assert!((annualise(100.0, Frequency::Weekly) - 5_214.0).abs() < 1e-9);
        assert_eq!(annualise(100.0, Frequency::Monthly), 1_200.0);
        assert_eq!(annualise(100.0, Frequency::Quarterly), 400.0);
        assert_eq!(annualise(100.0, Frequency::Annually), 100.0);
        assert_eq!(annualise(100.0, Frequency::Termly), 300.0);
    }

    #[test]
    fn active_fraction_respects_bounds() {
        let mut o = outgoing(100.0, Frequency::Monthly);
        assert_eq!(o.active_fraction(2030), 1.0);

        o.start_date = Some(date(2025, 10, 15));
        o.end_date = Some(date(2027, 3, 1));
        assert_eq!(o.active_fraction(2024), 0.0);
        assert_eq!(o.active_fraction(2025), 3.0 / 12.0);
        assert_eq!(o.active_fraction(2026), 1.0);
        assert_eq!(o.active_fraction(2027), 3.0 / 12.0);
        assert_eq!(o.active_fraction(2028), 0.0);
    }

    #[test]
    fn inflation_compounds_from_base_year() {
        let mut o = outgoing(1_000.0, Frequency::Annually);
        o.inflation_rate = Some(0.10);
        assert!((o.inflated_annual_amount(2026, 2024) - 1_210.0).abs() < 1e-9);
        assert_eq!(o.inflated_annual_amount(2023, 2024), 1_000.0);
    }

    #[test]
    fn outgoing_without_rate_stays_flat_in_nominal_terms() {
        let o = outgoing(1_000.0, Frequency::Annually);
        assert_eq!(o.inflated_annual_amount(2054, 2024), 1_000.0);
    }

    #[test]
    fn school_fees_run_from_september_to_july() {
        let fees = school_fee_outgoing(&child()).expect("fees generated");
        assert_eq!(fees.start_date, Some(date(2024, 9, 1)));
        assert_eq!(fees.end_date, Some(date(2038, 7, 31)));
        assert_eq!(fees.frequency, Frequency::Termly);
        assert_eq!(fees.annual_amount(), 18_000.0);
        assert_eq!(fees.linked_child_id.as_deref(), Some("c1"));
    }

    #[test]
    fn child_without_fee_generates_nothing() {
        let mut c = child();
        c.annual_school_fee = 0.0;
        assert!(generate_school_fee_outgoings(&[c]).is_empty());
    }

    #[test]
    fn effective_outgoings_regenerate_linked_rows_and_drop_orphans() {
        let mut stale = outgoing(1.0, Frequency::Termly);
        stale.id = "stale".to_string();
        stale.linked_child_id = Some("c1".to_string());
        let mut orphan = outgoing(1.0, Frequency::Termly);
        orphan.id = "orphan".to_string();
        orphan.linked_child_id = Some("missing".to_string());

        let household = Household {
            committed_outgoings: vec![outgoing(500.0, Frequency::Monthly), stale, orphan],
            children: vec![child()],
            ..Household::default()
        };

        let effective = effective_outgoings(&household);
        let ids: Vec<&str> = effective.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["o1", "school-fees-c1"]);
    }

    #[test]
    fn annual_committed_spend_combines_fraction_and_inflation() {
        let mut fees = outgoing(1_000.0, Frequency::Termly);
        fees.start_date = Some(date(2024, 9, 1));
        fees.inflation_rate = Some(0.0);
        let rent = outgoing(1_000.0, Frequency::Monthly);
        let spend = annual_committed_spend(&[fees, rent], 2024, 2024);
        assert!((spend - (3_000.0 * 4.0 / 12.0 + 12_000.0)).abs() < 1e-9);
    }
}
