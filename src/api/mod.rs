use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    Router,
    extract::Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{Days, NaiveDate};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::core::aggregation::{
    ContributionTotals, EmergencyFundStatus, NetWorthSummary, annual_contributions_by_target,
    emergency_fund_status, monthly_mortgage_payment, person_wrapper_total,
    projected_mortgage_balance, summarise_net_worth, total_property_equity,
};
use crate::core::growth::{
    calculate_adjusted_required_pot, calculate_coast_fire, calculate_pension_bridge,
    calculate_pension_carry_forward, calculate_pro_rata_state_pension,
    calculate_required_savings, calculate_retirement_countdown, calculate_swr,
    calculate_tapered_annual_allowance, project_compound_growth_with_growing_contributions,
    project_deferred_bonus_value, project_final_value,
};
use crate::core::iht::{calculate_years_until_iht_exceeded, household_estate_value};
use crate::core::tax::TakeHomePay;
use crate::core::types::{
    CarryForward, IhtResult, PensionBridge, PriorYearAllowance, RetirementCountdown, TaxWrapper,
    YearlyProjection,
};
use crate::core::{
    Household, LifetimeCashFlow, MonteCarloConfig, MonteCarloResult, ScenarioOverrides,
    SensitivityResult, TaxConstants, TaxEngine, UkTaxEngine, analyse_sensitivity,
    apply_scenario_overrides, compute_success_probability, generate_lifetime_cash_flow,
    household_iht, run_monte_carlo,
};
use crate::error::{EngineError, EngineResult};

#[derive(Parser, Debug)]
#[command(
    name = "nestegg",
    about = "UK household financial projections: cash flow, Monte Carlo, IHT and what-ifs"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "NESTEGG_LOG",
        default_value = "nestegg=info",
        help = "tracing filter used when RUST_LOG is unset"
    )]
    pub log_filter: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the JSON HTTP API.
    Serve {
        #[arg(long, env = "NESTEGG_PORT", default_value_t = 8080)]
        port: u16,
    },
    /// Print the lifetime cash-flow projection for a household file as JSON.
    Project(ProjectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[arg(long, help = "Household snapshot (camelCase JSON)")]
    pub household: PathBuf,
    #[arg(long, help = "Reference date, YYYY-MM-DD; defaults to today")]
    pub now: Option<NaiveDate>,
    #[arg(
        long,
        help = "Annual growth rate in percent, e.g. 5; defaults to the household's retirement config"
    )]
    pub growth_rate: Option<f64>,
    #[arg(long, help = "Primary person's age to project to")]
    pub end_age: Option<u32>,
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn validated(household: Household) -> EngineResult<Household> {
    household.validate()?;
    Ok(household)
}

/// Projection settings with the household's retirement config as fallback.
/// `growth_rate` is a fraction here.
fn resolve_projection(
    household: &Household,
    growth_rate: Option<f64>,
    end_age: Option<u32>,
) -> EngineResult<(f64, u32)> {
    let growth_rate = growth_rate.unwrap_or(household.retirement.growth_rate);
    if !growth_rate.is_finite() || growth_rate <= -1.0 {
        return Err(EngineError::InvalidInput(
            "growth rate must be finite and above -100%".to_string(),
        ));
    }
    let end_age = end_age.unwrap_or(household.retirement.end_age);
    if end_age > 120 {
        return Err(EngineError::InvalidInput(
            "end age must be 120 or below".to_string(),
        ));
    }
    Ok((growth_rate, end_age))
}

fn project(
    household: &Household,
    growth_rate: Option<f64>,
    end_age: Option<u32>,
    now: NaiveDate,
) -> EngineResult<LifetimeCashFlow> {
    let (growth_rate, end_age) = resolve_projection(household, growth_rate, end_age)?;
    let constants = TaxConstants::default();
    let engine = UkTaxEngine::new(constants.clone());
    Ok(generate_lifetime_cash_flow(
        household,
        &engine,
        &constants,
        growth_rate,
        end_age,
        now,
    ))
}

pub fn run_project(args: &ProjectArgs) -> EngineResult<String> {
    let raw = std::fs::read_to_string(&args.household)?;
    let household = validated(serde_json::from_str::<Household>(&raw)?)?;
    let cash_flow = project(
        &household,
        args.growth_rate.map(|pct| pct / 100.0),
        args.end_age,
        args.now.unwrap_or_else(today),
    )?;
    Ok(serde_json::to_string_pretty(&cash_flow)?)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CashflowRequest {
    household: Household,
    #[serde(default)]
    now: Option<NaiveDate>,
    #[serde(default)]
    growth_rate: Option<f64>,
    #[serde(default)]
    end_age: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MonteCarloRequest {
    #[serde(flatten)]
    config: MonteCarloConfig,
    #[serde(default)]
    target: Option<f64>,
    #[serde(default)]
    at_year: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonteCarloResponse {
    #[serde(flatten)]
    result: MonteCarloResult,
    success_probability: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IhtRequest {
    household: Household,
    #[serde(default)]
    now: Option<NaiveDate>,
    #[serde(default)]
    annual_savings: f64,
    #[serde(default)]
    growth_rate: Option<f64>,
    #[serde(default)]
    property_growth_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IhtResponse {
    #[serde(flatten)]
    result: IhtResult,
    years_until_exceeded: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HouseholdRequest {
    household: Household,
    #[serde(default)]
    now: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioRequest {
    household: Household,
    #[serde(default)]
    overrides: ScenarioOverrides,
    #[serde(default)]
    now: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioResponse {
    household: Household,
    cash_flow: LifetimeCashFlow,
    sensitivity: SensitivityResult,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRequest {
    household: Household,
    #[serde(default)]
    now: Option<NaiveDate>,
    /// Unused allowance history per person id, most recent year first.
    #[serde(default)]
    prior_pension_years: HashMap<String, Vec<PriorYearAllowance>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PersonSummary {
    person_id: String,
    age: u32,
    take_home: Option<TakeHomePay>,
    annual_allowance: f64,
    carry_forward: CarryForward,
    state_pension: f64,
    pension_bridge: PensionBridge,
    deferred_bonus_at_first_vest: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetirementSummary {
    years_to_retirement: u32,
    projected_pot: f64,
    /// `None` when the withdrawal rate cannot sustain the target income.
    required_pot: Option<f64>,
    sustainable_income: f64,
    countdown: Option<RetirementCountdown>,
    coast_fire: bool,
    required_monthly_savings: Option<f64>,
    pension_projection: Vec<YearlyProjection>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MortgageSummary {
    property_id: String,
    monthly_payment: f64,
    balance_in_five_years: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    net_worth: NetWorthSummary,
    contributions: ContributionTotals,
    emergency_fund: EmergencyFundStatus,
    iht: IhtResult,
    persons: Vec<PersonSummary>,
    retirement: Option<RetirementSummary>,
    mortgages: Vec<MortgageSummary>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn cashflow_response(request: CashflowRequest) -> EngineResult<LifetimeCashFlow> {
    let household = validated(request.household)?;
    project(
        &household,
        request.growth_rate,
        request.end_age,
        request.now.unwrap_or_else(today),
    )
}

fn monte_carlo_response(request: MonteCarloRequest) -> EngineResult<MonteCarloResponse> {
    request.config.validate()?;
    let success_probability = request
        .target
        .map(|target| compute_success_probability(&request.config, target, request.at_year));
    Ok(MonteCarloResponse {
        result: run_monte_carlo(&request.config),
        success_probability,
    })
}

fn iht_response(request: IhtRequest) -> EngineResult<IhtResponse> {
    let household = validated(request.household)?;
    let constants = TaxConstants::default();
    let result = household_iht(&household, request.now.unwrap_or_else(today), &constants);

    let growth_rate = request.growth_rate.unwrap_or(household.retirement.growth_rate);
    let years_until_exceeded = match request.property_growth_rate {
        Some(rate) => {
            let property_base = total_property_equity(&household);
            let property_value: &dyn Fn(u32) -> f64 =
                &move |year| property_base * (1.0 + rate).powi(year as i32);
            calculate_years_until_iht_exceeded(
                household_estate_value(&household),
                result.combined_threshold,
                request.annual_savings,
                growth_rate,
                Some(property_value),
                Some(property_base),
            )
        }
        None => calculate_years_until_iht_exceeded(
            household_estate_value(&household),
            result.combined_threshold,
            request.annual_savings,
            growth_rate,
            None,
            None,
        ),
    };

    Ok(IhtResponse {
        result,
        years_until_exceeded,
    })
}

fn sensitivity_response(request: HouseholdRequest) -> EngineResult<SensitivityResult> {
    let household = validated(request.household)?;
    Ok(analyse_sensitivity(
        &household,
        request.now.unwrap_or_else(today),
        &TaxConstants::default(),
    ))
}

fn scenario_response(request: ScenarioRequest) -> EngineResult<ScenarioResponse> {
    let base = validated(request.household)?;
    let household = validated(apply_scenario_overrides(&base, &request.overrides))?;
    let now = request.now.unwrap_or_else(today);
    let cash_flow = project(&household, None, None, now)?;
    let sensitivity = analyse_sensitivity(&household, now, &TaxConstants::default());
    Ok(ScenarioResponse {
        household,
        cash_flow,
        sensitivity,
    })
}

fn person_summaries(
    household: &Household,
    now: NaiveDate,
    constants: &TaxConstants,
    prior_pension_years: &HashMap<String, Vec<PriorYearAllowance>>,
) -> Vec<PersonSummary> {
    let engine = UkTaxEngine::new(constants.clone());
    let annual_spend = household.emergency_fund.monthly_essential_expenses * 12.0
        + household.emergency_fund.monthly_lifestyle_spending * 12.0;

    household
        .persons
        .iter()
        .map(|person| {
            let income = household.income_for(&person.id);
            let take_home = income
                .map(|i| engine.take_home_pay_with_student_loan(i, person.student_loan_plan));
            let (threshold_income, adjusted_income) = income
                .map(|i| {
                    let threshold = i.gross_salary - i.employee_pension_contribution.max(0.0);
                    (threshold, i.gross_salary + i.employer_pension_contribution.max(0.0))
                })
                .unwrap_or((0.0, 0.0));
            let annual_allowance = calculate_tapered_annual_allowance(
                threshold_income,
                adjusted_income,
                &constants.pension_allowance,
            );
            let carry_forward = calculate_pension_carry_forward(
                annual_allowance,
                prior_pension_years
                    .get(&person.id)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]),
                &constants.pension_allowance,
            );
            let accessible = person_wrapper_total(household, &person.id, TaxWrapper::is_accessible);
            let deferred_bonus_at_first_vest = household.bonus_for(&person.id).and_then(|b| {
                let tranche = b.deferred_annual() / b.vesting_years.max(1) as f64;
                let vest = now.checked_add_days(Days::new(
                    365 * u64::from(b.vesting_gap_years + 1),
                ))?;
                (tranche > 0.0)
                    .then(|| project_deferred_bonus_value(tranche, now, vest, b.estimated_return))
            });

            PersonSummary {
                person_id: person.id.clone(),
                age: person.age(now),
                take_home,
                annual_allowance,
                carry_forward,
                state_pension: calculate_pro_rata_state_pension(
                    person.qualifying_years(),
                    &constants.state_pension,
                ),
                pension_bridge: calculate_pension_bridge(
                    person.planned_retirement_age,
                    person.pension_access_age,
                    annual_spend,
                    accessible,
                ),
                deferred_bonus_at_first_vest,
            }
        })
        .collect()
}

fn retirement_summary(
    household: &Household,
    now: NaiveDate,
    constants: &TaxConstants,
) -> Option<RetirementSummary> {
    let primary = household.primary_person()?;
    let age = primary.age(now);
    let retirement = &household.retirement;
    let years_to_retirement = primary.planned_retirement_age.saturating_sub(age);

    let pot: f64 = household
        .owned_accounts()
        .map(|a| a.current_value.max(0.0))
        .sum();
    let salary_linked: f64 = household
        .income
        .iter()
        .filter(|i| household.has_person(&i.person_id))
        .map(|i| i.total_pension_contribution())
        .sum();
    let annual_contribution = annual_contributions_by_target(household).total() + salary_linked;

    let projected_pot = project_final_value(
        pot,
        annual_contribution / 12.0,
        retirement.growth_rate,
        years_to_retirement,
    );
    let state_pension =
        calculate_pro_rata_state_pension(primary.qualifying_years(), &constants.state_pension);
    let required = calculate_adjusted_required_pot(
        retirement.target_annual_income,
        retirement.withdrawal_rate,
        state_pension,
        retirement.include_state_pension,
    );
    let required_pot = required.is_finite().then_some(required);

    let pension_pot = person_wrapper_total(household, &primary.id, |w| w == TaxWrapper::Pension);
    let salary_growth = household
        .income_for(&primary.id)
        .map(|i| i.salary_growth_rate)
        .unwrap_or(0.0);

    Some(RetirementSummary {
        years_to_retirement,
        projected_pot,
        required_pot,
        sustainable_income: calculate_swr(projected_pot, retirement.withdrawal_rate),
        countdown: required_pot.map(|target| {
            calculate_retirement_countdown(pot, annual_contribution, target, retirement.growth_rate)
        }),
        coast_fire: required_pot.is_some_and(|target| {
            calculate_coast_fire(
                pot,
                target,
                primary.planned_retirement_age,
                age,
                retirement.growth_rate,
            )
        }),
        required_monthly_savings: required_pot.map(|target| {
            calculate_required_savings(
                target,
                pot,
                years_to_retirement as i32,
                retirement.growth_rate,
            )
        }),
        pension_projection: project_compound_growth_with_growing_contributions(
            pension_pot,
            salary_linked,
            retirement.growth_rate,
            salary_growth,
            retirement.end_age.saturating_sub(age),
            Some(years_to_retirement),
        ),
    })
}

fn summary_response(request: SummaryRequest) -> EngineResult<SummaryResponse> {
    let household = validated(request.household)?;
    let now = request.now.unwrap_or_else(today);
    let constants = TaxConstants::default();
    let in_five_years = now
        .checked_add_months(chrono::Months::new(60))
        .unwrap_or(now);

    let mortgages = household
        .properties
        .iter()
        .filter_map(|p| {
            Some(MortgageSummary {
                property_id: p.id.clone(),
                monthly_payment: monthly_mortgage_payment(p, now)?,
                balance_in_five_years: projected_mortgage_balance(p, now, in_five_years),
            })
        })
        .collect();

    Ok(SummaryResponse {
        net_worth: summarise_net_worth(&household),
        contributions: annual_contributions_by_target(&household),
        emergency_fund: emergency_fund_status(&household, now),
        iht: household_iht(&household, now, &constants),
        persons: person_summaries(&household, now, &constants, &request.prior_pension_years),
        retirement: retirement_summary(&household, now, &constants),
        mortgages,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/cashflow", post(cashflow_handler))
        .route("/api/monte-carlo", post(monte_carlo_handler))
        .route("/api/iht", post(iht_handler))
        .route("/api/sensitivity", post(sensitivity_handler))
        .route("/api/scenario", post(scenario_handler))
        .route("/api/summary", post(summary_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "nestegg HTTP API listening");

    axum::serve(listener, app).await
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn cashflow_handler(Json(request): Json<CashflowRequest>) -> Response {
    respond(cashflow_response(request))
}

async fn monte_carlo_handler(Json(request): Json<MonteCarloRequest>) -> Response {
    // CPU-bound; keep it off the async workers.
    match tokio::task::spawn_blocking(move || monte_carlo_response(request)).await {
        Ok(result) => respond(result),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn iht_handler(Json(request): Json<IhtRequest>) -> Response {
    respond(iht_response(request))
}

async fn sensitivity_handler(Json(request): Json<HouseholdRequest>) -> Response {
    respond(sensitivity_response(request))
}

async fn scenario_handler(Json(request): Json<ScenarioRequest>) -> Response {
    respond(scenario_response(request))
}

async fn summary_handler(Json(request): Json<SummaryRequest>) -> Response {
    respond(summary_response(request))
}

fn respond<T: Serialize>(result: EngineResult<T>) -> Response {
    match result {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            tracing::debug!(error = %e, "rejected request");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}
