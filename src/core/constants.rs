use serde::{Deserialize, Serialize};

use super::types::StudentLoanPlan;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeTaxBands {
    pub personal_allowance: f64,
    pub allowance_taper_start: f64,
    pub basic_rate_limit: f64,
    pub higher_rate_limit: f64,
    pub basic_rate: f64,
    pub higher_rate: f64,
    pub additional_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NationalInsurance {
    pub primary_threshold: f64,
    pub upper_earnings_limit: f64,
    pub main_rate: f64,
    pub upper_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepaymentTerms {
    pub threshold: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLoanTerms {
    pub plan1: RepaymentTerms,
    pub plan2: RepaymentTerms,
    pub plan4: RepaymentTerms,
    pub plan5: RepaymentTerms,
    pub postgraduate: RepaymentTerms,
}

impl StudentLoanTerms {
    pub fn for_plan(&self, plan: StudentLoanPlan) -> Option<RepaymentTerms> {
        match plan {
            StudentLoanPlan::None => None,
            StudentLoanPlan::Plan1 => Some(self.plan1),
            StudentLoanPlan::Plan2 => Some(self.plan2),
            StudentLoanPlan::Plan4 => Some(self.plan4),
            StudentLoanPlan::Plan5 => Some(self.plan5),
            StudentLoanPlan::Postgraduate => Some(self.postgraduate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePension {
    pub full_annual_amount: f64,
    pub minimum_qualifying_years: u32,
    pub full_qualifying_years: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PensionAllowance {
    pub annual_allowance: f64,
    pub taper_threshold_income: f64,
    pub taper_adjusted_income: f64,
    pub minimum_tapered_allowance: f64,
    pub carry_forward_years: usize,
    pub tax_free_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritanceTax {
    pub nil_rate_band: f64,
    pub residence_nil_rate_band: f64,
    pub rnrb_taper_threshold: f64,
    pub rate: f64,
    pub gift_window_years: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxConstants {
    pub version: String,
    pub income_tax: IncomeTaxBands,
    pub national_insurance: NationalInsurance,
    pub student_loans: StudentLoanTerms,
    pub state_pension: StatePension,
    pub pension_allowance: PensionAllowance,
    pub inheritance_tax: InheritanceTax,
}

impl TaxConstants {
    pub fn uk_2024_25() -> Self {
        Self {
            version: "uk-2024-25".to_string(),
            income_tax: IncomeTaxBands {
                personal_allowance: 12_570.0,
                allowance_taper_start: 100_000.0,
                basic_rate_limit: 50_270.0,
                higher_rate_limit: 125_140.0,
                basic_rate: 0.20,
                higher_rate: 0.40,
                additional_rate: 0.45,
            },
            national_insurance: NationalInsurance {
                primary_threshold: 12_570.0,
                upper_earnings_limit: 50_270.0,
                main_rate: 0.08,
                upper_rate: 0.02,
            },
            student_loans: StudentLoanTerms {
                plan1: RepaymentTerms {
                    threshold: 24_990.0,
                    rate: 0.09,
                },
                plan2: RepaymentTerms {
                    threshold: 27_295.0,
                    rate: 0.09,
                },
                plan4: RepaymentTerms {
                    threshold: 31_395.0,
                    rate: 0.09,
                },
                plan5: RepaymentTerms {
                    threshold: 25_000.0,
                    rate: 0.09,
                },
                postgraduate: RepaymentTerms {
                    threshold: 21_000.0,
                    rate: 0.06,
                },
            },
            state_pension: StatePension {
                full_annual_amount: 11_502.40,
                minimum_qualifying_years: 10,
                full_qualifying_years: 35,
            },
            pension_allowance: PensionAllowance {
                annual_allowance: 60_000.0,
                taper_threshold_income: 200_000.0,
                taper_adjusted_income: 260_000.0,
                minimum_tapered_allowance: 10_000.0,
                carry_forward_years: 3,
                tax_free_fraction: 0.25,
            },
            inheritance_tax: InheritanceTax {
                nil_rate_band: 325_000.0,
                residence_nil_rate_band: 175_000.0,
                rnrb_taper_threshold: 2_000_000.0,
                rate: 0.40,
                gift_window_years: 7.0,
            },
        }
    }
}

impl Default for TaxConstants {
    fn default() -> Self {
        Self::uk_2024_25()
    }
}
