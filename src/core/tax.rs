use serde::Serialize;

use super::constants::{IncomeTaxBands, NationalInsurance, RepaymentTerms, TaxConstants};
use super::types::{PensionMethod, PersonIncome, StudentLoanPlan};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTax {
    pub tax: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TakeHomePay {
    pub take_home: f64,
    pub income_tax: f64,
    pub ni: f64,
    pub student_loan: f64,
    pub monthly_take_home: f64,
}

/// Tax collaborator consumed by the projection engine. Implementations must
/// be pure functions of their inputs and a fixed rate table.
pub trait TaxEngine {
    fn income_tax(&self, gross_income: f64) -> IncomeTax;

    fn take_home_pay(&self, income: &PersonIncome) -> TakeHomePay {
        self.take_home_pay_with_student_loan(income, StudentLoanPlan::None)
    }

    fn take_home_pay_with_student_loan(
        &self,
        income: &PersonIncome,
        plan: StudentLoanPlan,
    ) -> TakeHomePay;
}

#[derive(Debug, Clone, Default)]
pub struct UkTaxEngine {
    constants: TaxConstants,
}

impl UkTaxEngine {
    pub fn new(constants: TaxConstants) -> Self {
        Self { constants }
    }

    pub fn constants(&self) -> &TaxConstants {
        &self.constants
    }
}

impl TaxEngine for UkTaxEngine {
    fn income_tax(&self, gross_income: f64) -> IncomeTax {
        IncomeTax {
            tax: uk_income_tax(gross_income, &self.constants.income_tax),
        }
    }

    fn take_home_pay_with_student_loan(
        &self,
        income: &PersonIncome,
        plan: StudentLoanPlan,
    ) -> TakeHomePay {
        let gross = finite_non_negative(income.gross_salary);
        let employee = finite_non_negative(income.employee_pension_contribution).min(gross);
        let bands = &self.constants.income_tax;

        let (taxable_pay, ni_pay, net_deduction) = match income.pension_method {
            PensionMethod::SalarySacrifice => (gross - employee, gross - employee, 0.0),
            PensionMethod::NetPay => (gross - employee, gross, employee),
            PensionMethod::ReliefAtSource => {
                (gross, gross, employee * (1.0 - bands.basic_rate.clamp(0.0, 1.0)))
            }
        };
        let cash_pay = match income.pension_method {
            PensionMethod::SalarySacrifice => gross - employee,
            _ => gross,
        };

        let income_tax = uk_income_tax(taxable_pay, bands);
        let ni = employee_ni(ni_pay, &self.constants.national_insurance);
        let student_loan = self
            .constants
            .student_loans
            .for_plan(plan)
            .map(|terms| student_loan_repayment(ni_pay, terms))
            .unwrap_or(0.0);

        let take_home = (cash_pay - net_deduction - income_tax - ni - student_loan).max(0.0);
        TakeHomePay {
            take_home,
            income_tax,
            ni,
            student_loan,
            monthly_take_home: take_home / 12.0,
        }
    }
}

fn finite_non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

fn uk_income_tax(gross_income: f64, bands: &IncomeTaxBands) -> f64 {
    let gross = finite_non_negative(gross_income);

    let mut allowance = bands.personal_allowance.max(0.0);
    if gross > bands.allowance_taper_start {
        let reduction = (gross - bands.allowance_taper_start) / 2.0;
        allowance = (allowance - reduction).max(0.0);
    }

    let taxable_income = (gross - allowance).max(0.0);

    // Band widths are fixed in taxable-income terms; losing the allowance does
    // not widen the basic band.
    let basic_band_width = (bands.basic_rate_limit - bands.personal_allowance).max(0.0);
    let higher_threshold = bands.higher_rate_limit.max(basic_band_width);

    let basic_taxable = taxable_income.min(basic_band_width);
    let higher_taxable = (taxable_income.min(higher_threshold) - basic_taxable).max(0.0);
    let additional_taxable = (taxable_income - higher_threshold).max(0.0);

    basic_taxable * bands.basic_rate.clamp(0.0, 1.0)
        + higher_taxable * bands.higher_rate.clamp(0.0, 1.0)
        + additional_taxable * bands.additional_rate.clamp(0.0, 1.0)
}

fn employee_ni(pay: f64, ni: &NationalInsurance) -> f64 {
    let main_band = (pay.min(ni.upper_earnings_limit) - ni.primary_threshold).max(0.0);
    let upper_band = (pay - ni.upper_earnings_limit).max(0.0);
    main_band * ni.main_rate + upper_band * ni.upper_rate
}

fn student_loan_repayment(pay: f64, terms: RepaymentTerms) -> f64 {
    (pay - terms.threshold).max(0.0) * terms.rate
}
