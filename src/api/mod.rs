use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    BucketId, DebtFacility, ExpenseTier, IncomeStream, IncomeTax, Mortgage, Projection, Property,
    ScenarioConfig, YearRow, run_projection,
};
use crate::import::{ImportField, parse_scenario_text};

const INDEX_HTML: &str = "<!doctype html>\
<html><head><title>glidepath</title></head><body>\
<h1>glidepath</h1>\
<p>Deterministic retirement cash-flow projection.</p>\
<ul>\
<li><code>GET/POST /api/project</code> — run a projection from JSON or query parameters</li>\
<li><code>POST /api/import</code> — paste free-text key/value rows, project whatever maps</li>\
</ul>\
</body></html>";

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliBucket {
    Cash,
    Brokerage,
    Retirement,
    HomeProceeds,
}

impl From<CliBucket> for BucketId {
    fn from(value: CliBucket) -> Self {
        match value {
            CliBucket::Cash => BucketId::Cash,
            CliBucket::Brokerage => BucketId::Brokerage,
            CliBucket::Retirement => BucketId::Retirement,
            CliBucket::HomeProceeds => BucketId::HomeProceeds,
        }
    }
}

/// Named depletion-priority presets; the JSON API additionally accepts an
/// explicit permutation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliWithdrawalOrder {
    CashFirst,
    BrokerageFirst,
    RetirementFirst,
}

impl CliWithdrawalOrder {
    fn sequence(self) -> Vec<BucketId> {
        match self {
            CliWithdrawalOrder::CashFirst => vec![
                BucketId::Cash,
                BucketId::Brokerage,
                BucketId::HomeProceeds,
                BucketId::Retirement,
            ],
            CliWithdrawalOrder::BrokerageFirst => vec![
                BucketId::Brokerage,
                BucketId::Cash,
                BucketId::HomeProceeds,
                BucketId::Retirement,
            ],
            CliWithdrawalOrder::RetirementFirst => vec![
                BucketId::Retirement,
                BucketId::Cash,
                BucketId::Brokerage,
                BucketId::HomeProceeds,
            ],
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
enum ApiBucketId {
    Cash,
    Brokerage,
    Retirement,
    #[serde(alias = "homeProceeds", alias = "home_proceeds", alias = "proceeds")]
    HomeProceeds,
}

impl From<ApiBucketId> for BucketId {
    fn from(value: ApiBucketId) -> Self {
        match value {
            ApiBucketId::Cash => BucketId::Cash,
            ApiBucketId::Brokerage => BucketId::Brokerage,
            ApiBucketId::Retirement => BucketId::Retirement,
            ApiBucketId::HomeProceeds => BucketId::HomeProceeds,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiIncomeStream {
    annual: f64,
    start_age: Option<u32>,
    end_age: Option<u32>,
    tax_exempt: bool,
}

impl Default for ApiIncomeStream {
    fn default() -> Self {
        Self {
            annual: 0.0,
            start_age: None,
            end_age: None,
            tax_exempt: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiExpenseTier {
    label: Option<String>,
    years: u32,
    annual_cost: f64,
    inflation: f64,
}

impl Default for ApiExpenseTier {
    fn default() -> Self {
        Self {
            label: None,
            years: 1,
            annual_cost: 0.0,
            inflation: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ApiProperty {
    value: f64,
    appreciation: f64,
    cost_basis: f64,
    improvements: f64,
    exclusion: f64,
    sale_cost_pct: f64,
    cap_gains_rate: f64,
    carrying_cost: f64,
    sale_age: Option<u32>,
    mortgage_balance: f64,
    mortgage_rate: f64,
    mortgage_term_years: u32,
}

impl Default for ApiProperty {
    fn default() -> Self {
        Self {
            value: 0.0,
            appreciation: 3.0,
            cost_basis: 0.0,
            improvements: 0.0,
            exclusion: 0.0,
            sale_cost_pct: 6.0,
            cap_gains_rate: 15.0,
            carrying_cost: 0.0,
            sale_age: None,
            mortgage_balance: 0.0,
            mortgage_rate: 0.0,
            mortgage_term_years: 0,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProjectPayload {
    start_age: Option<u32>,
    end_age: Option<u32>,
    avg_tax_rate: Option<f64>,
    cap_gains_rate: Option<f64>,

    cash_start: Option<f64>,
    cash_growth: Option<f64>,
    brokerage_start: Option<f64>,
    brokerage_basis_start: Option<f64>,
    brokerage_growth: Option<f64>,
    retirement_start: Option<f64>,
    retirement_growth: Option<f64>,
    home_proceeds_growth: Option<f64>,

    income_annual: Option<f64>,
    income_end_age: Option<u32>,
    income_tax_exempt: Option<bool>,
    expense_annual: Option<f64>,
    expense_inflation: Option<f64>,

    home_value: Option<f64>,
    home_appreciation: Option<f64>,
    home_basis: Option<f64>,
    home_improvements: Option<f64>,
    home_exclusion: Option<f64>,
    home_sale_cost_pct: Option<f64>,
    home_cap_gains_rate: Option<f64>,
    home_carrying_cost: Option<f64>,
    home_sale_age: Option<u32>,
    mortgage_balance: Option<f64>,
    mortgage_rate: Option<f64>,
    mortgage_term_years: Option<u32>,

    debt_start: Option<f64>,
    debt_rate: Option<f64>,

    surplus_bucket: Option<ApiBucketId>,
    sale_proceeds_bucket: Option<ApiBucketId>,
    withdrawal_order: Option<Vec<ApiBucketId>>,

    income_streams: Option<Vec<ApiIncomeStream>>,
    expense_tiers: Option<Vec<ApiExpenseTier>>,
    properties: Option<Vec<ApiProperty>>,
}

#[derive(Parser, Debug)]
#[command(
    name = "glidepath",
    about = "Deterministic retirement cash-flow projection (buckets + property + tiered withdrawals)"
)]
struct Cli {
    #[arg(long, default_value_t = 70)]
    start_age: u32,
    #[arg(long, default_value_t = 100, help = "Last simulated age, inclusive")]
    end_age: u32,
    #[arg(
        long,
        default_value_t = 25.0,
        help = "Average income tax rate in percent"
    )]
    avg_tax_rate: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Capital gains tax rate on bucket withdrawals in percent"
    )]
    cap_gains_rate: f64,
    #[arg(long, default_value_t = 200_000.0)]
    cash_start: f64,
    #[arg(long, default_value_t = 1.0, help = "Cash bucket growth in percent")]
    cash_growth: f64,
    #[arg(long, default_value_t = 600_000.0)]
    brokerage_start: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Brokerage cost basis at start; defaults to brokerage-start"
    )]
    brokerage_basis_start: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Brokerage bucket growth in percent"
    )]
    brokerage_growth: f64,
    #[arg(long, default_value_t = 0.0)]
    retirement_start: f64,
    #[arg(
        long,
        default_value_t = 5.0,
        help = "Retirement bucket growth in percent"
    )]
    retirement_growth: f64,
    #[arg(
        long,
        default_value_t = 1.0,
        help = "Growth of realized home proceeds in percent"
    )]
    home_proceeds_growth: f64,
    #[arg(long, default_value_t = 0.0, help = "Annual gross income")]
    income_annual: f64,
    #[arg(long, help = "Last age the income is paid, inclusive")]
    income_end_age: Option<u32>,
    #[arg(long, default_value_t = false)]
    income_tax_exempt: bool,
    #[arg(long, default_value_t = 65_000.0, help = "Annual living expenses")]
    expense_annual: f64,
    #[arg(
        long,
        default_value_t = 2.5,
        help = "Annual expense inflation in percent"
    )]
    expense_inflation: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Current home value; 0 means no property is modeled"
    )]
    home_value: f64,
    #[arg(long, default_value_t = 3.0, help = "Home appreciation in percent")]
    home_appreciation: f64,
    #[arg(long, default_value_t = 0.0)]
    home_basis: f64,
    #[arg(long, default_value_t = 0.0)]
    home_improvements: f64,
    #[arg(long, default_value_t = 0.0, help = "Capital gains exclusion amount")]
    home_exclusion: f64,
    #[arg(long, default_value_t = 6.0, help = "Selling cost in percent of price")]
    home_sale_cost_pct: f64,
    #[arg(
        long,
        default_value_t = 15.0,
        help = "Capital gains rate on the home sale in percent"
    )]
    home_cap_gains_rate: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        help = "Annual property tax/insurance/HOA while the home is owned"
    )]
    home_carrying_cost: f64,
    #[arg(long, help = "Age at which the home is sold; omitted means never")]
    home_sale_age: Option<u32>,
    #[arg(long, default_value_t = 0.0)]
    mortgage_balance: f64,
    #[arg(long, default_value_t = 0.0, help = "Mortgage rate in percent")]
    mortgage_rate: f64,
    #[arg(long, default_value_t = 0)]
    mortgage_term_years: u32,
    #[arg(long, default_value_t = 0.0, help = "Outstanding debt at start")]
    debt_start: f64,
    #[arg(
        long,
        help = "Interest rate in percent for last-resort borrowing; omitted disables the debt facility"
    )]
    debt_rate: Option<f64>,
    #[arg(long, value_enum, default_value_t = CliBucket::Cash)]
    surplus_bucket: CliBucket,
    #[arg(long, value_enum, default_value_t = CliBucket::HomeProceeds)]
    sale_proceeds_bucket: CliBucket,
    #[arg(long, value_enum, default_value_t = CliWithdrawalOrder::CashFirst)]
    withdrawal_order: CliWithdrawalOrder,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    starting_net_worth: f64,
    peak_net_worth: f64,
    ending_net_worth: f64,
    rows: Vec<YearRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportResponse {
    matched_fields: usize,
    skipped_lines: usize,
    starting_net_worth: f64,
    peak_net_worth: f64,
    ending_net_worth: f64,
    rows: Vec<YearRow>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_config(cli: Cli) -> Result<ScenarioConfig, String> {
    if cli.end_age < cli.start_age {
        return Err("--end-age must be >= --start-age".to_string());
    }

    for (name, pct) in [
        ("--avg-tax-rate", cli.avg_tax_rate),
        ("--cap-gains-rate", cli.cap_gains_rate),
        ("--home-sale-cost-pct", cli.home_sale_cost_pct),
        ("--home-cap-gains-rate", cli.home_cap_gains_rate),
    ] {
        if !(0.0..=100.0).contains(&pct) {
            return Err(format!("{name} must be between 0 and 100"));
        }
    }

    for (name, amount) in [
        ("--cash-start", cli.cash_start),
        ("--brokerage-start", cli.brokerage_start),
        ("--retirement-start", cli.retirement_start),
        ("--income-annual", cli.income_annual),
        ("--expense-annual", cli.expense_annual),
        ("--home-value", cli.home_value),
        ("--home-basis", cli.home_basis),
        ("--home-improvements", cli.home_improvements),
        ("--home-exclusion", cli.home_exclusion),
        ("--home-carrying-cost", cli.home_carrying_cost),
        ("--mortgage-balance", cli.mortgage_balance),
        ("--debt-start", cli.debt_start),
    ] {
        if !amount.is_finite() || amount < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    if cli.brokerage_basis_start < 0.0 || cli.brokerage_basis_start > cli.brokerage_start {
        return Err("--brokerage-basis-start must be between 0 and brokerage-start".to_string());
    }

    for (name, rate) in [
        ("--cash-growth", cli.cash_growth),
        ("--brokerage-growth", cli.brokerage_growth),
        ("--retirement-growth", cli.retirement_growth),
        ("--home-proceeds-growth", cli.home_proceeds_growth),
        ("--home-appreciation", cli.home_appreciation),
        ("--expense-inflation", cli.expense_inflation),
    ] {
        if !rate.is_finite() || rate <= -100.0 {
            return Err(format!("{name} must be > -100"));
        }
    }

    if cli.mortgage_balance > 0.0 {
        if cli.home_value <= 0.0 {
            return Err("--mortgage-balance requires --home-value > 0".to_string());
        }
        if cli.mortgage_term_years == 0 {
            return Err(
                "--mortgage-term-years must be > 0 when --mortgage-balance > 0".to_string(),
            );
        }
        if !cli.mortgage_rate.is_finite() || cli.mortgage_rate < 0.0 {
            return Err("--mortgage-rate must be >= 0".to_string());
        }
    }

    if let Some(sale_age) = cli.home_sale_age {
        if cli.home_value <= 0.0 {
            return Err("--home-sale-age requires --home-value > 0".to_string());
        }
        if sale_age < cli.start_age || sale_age > cli.end_age {
            return Err("--home-sale-age must fall within the simulated age range".to_string());
        }
    }

    if cli.debt_start > 0.0 && cli.debt_rate.is_none() {
        return Err("--debt-rate is required when --debt-start > 0".to_string());
    }
    if let Some(rate) = cli.debt_rate {
        if !(0.0..=100.0).contains(&rate) {
            return Err("--debt-rate must be between 0 and 100".to_string());
        }
    }

    let income_streams = if cli.income_annual > 0.0 {
        vec![IncomeStream {
            annual_gross: cli.income_annual,
            start_age: None,
            end_age: cli.income_end_age,
            tax: if cli.income_tax_exempt {
                IncomeTax::Exempt
            } else {
                IncomeTax::AverageRate
            },
        }]
    } else {
        Vec::new()
    };

    let expense_tiers = vec![ExpenseTier {
        label: "living".to_string(),
        duration_years: cli.end_age - cli.start_age + 1,
        annual_cost: cli.expense_annual,
        inflation_rate: cli.expense_inflation / 100.0,
    }];

    let properties = if cli.home_value > 0.0 {
        vec![Property {
            value: cli.home_value,
            appreciation_rate: cli.home_appreciation / 100.0,
            cost_basis: cli.home_basis,
            improvements: cli.home_improvements,
            exclusion: cli.home_exclusion,
            sale_cost_pct: cli.home_sale_cost_pct / 100.0,
            cap_gains_rate: cli.home_cap_gains_rate / 100.0,
            annual_carrying_cost: cli.home_carrying_cost,
            sale_offset: cli.home_sale_age.map(|age| age - cli.start_age),
            mortgage: (cli.mortgage_balance > 0.0).then_some(Mortgage {
                balance: cli.mortgage_balance,
                annual_rate: cli.mortgage_rate / 100.0,
                term_years: cli.mortgage_term_years,
            }),
        }]
    } else {
        Vec::new()
    };

    Ok(ScenarioConfig {
        start_age: cli.start_age,
        end_age: cli.end_age,
        avg_tax_rate: cli.avg_tax_rate / 100.0,
        cap_gains_rate: cli.cap_gains_rate / 100.0,
        cash_start: cli.cash_start,
        cash_growth_rate: cli.cash_growth / 100.0,
        brokerage_start: cli.brokerage_start,
        brokerage_cost_basis_start: if cli.brokerage_basis_start == 0.0
            && cli.brokerage_start > 0.0
        {
            cli.brokerage_start
        } else {
            cli.brokerage_basis_start
        },
        brokerage_growth_rate: cli.brokerage_growth / 100.0,
        retirement_start: cli.retirement_start,
        retirement_growth_rate: cli.retirement_growth / 100.0,
        home_proceeds_growth_rate: cli.home_proceeds_growth / 100.0,
        income_streams,
        expense_tiers,
        properties,
        debt: cli.debt_rate.map(|rate| DebtFacility {
            start_balance: cli.debt_start,
            rate: rate / 100.0,
        }),
        withdrawal_order: cli.withdrawal_order.sequence(),
        surplus_bucket: cli.surplus_bucket.into(),
        sale_proceeds_bucket: cli.sale_proceeds_bucket.into(),
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/", get(index_handler))
        .route(
            "/api/project",
            get(project_get_handler).post(project_post_handler),
        )
        .route("/api/import", post(import_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("glidepath HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/");

    axum::serve(listener, app).await
}

async fn index_handler() -> impl IntoResponse {
    with_cache_control(Html(INDEX_HTML))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn project_get_handler(Query(payload): Query<ProjectPayload>) -> Response {
    project_handler_impl(payload)
}

async fn project_post_handler(Json(payload): Json<ProjectPayload>) -> Response {
    project_handler_impl(payload)
}

fn project_handler_impl(payload: ProjectPayload) -> Response {
    let config = match config_from_payload(payload) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let projection = run_projection(&config);
    json_response(StatusCode::OK, build_project_response(projection))
}

async fn import_handler(body: String) -> Response {
    let report = parse_scenario_text(&body);
    let mut cli = default_cli_for_api();
    for imported in &report.values {
        apply_imported_value(&mut cli, imported.field, imported.value);
    }

    let config = match build_config(cli) {
        Ok(config) => config,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let projection = run_projection(&config);
    let project = build_project_response(projection);
    json_response(
        StatusCode::OK,
        ImportResponse {
            matched_fields: report.matched,
            skipped_lines: report.skipped,
            starting_net_worth: project.starting_net_worth,
            peak_net_worth: project.peak_net_worth,
            ending_net_worth: project.ending_net_worth,
            rows: project.rows,
        },
    )
}

fn build_project_response(projection: Projection) -> ProjectResponse {
    ProjectResponse {
        starting_net_worth: projection.starting_net_worth(),
        peak_net_worth: projection.peak_net_worth(),
        ending_net_worth: projection.ending_net_worth(),
        rows: projection.rows,
    }
}

fn with_cache_control<R: IntoResponse>(response: R) -> Response {
    let mut response = response.into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
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

/// Map a fuzzily-imported scalar onto the default scenario. Ages and years
/// are rounded; everything else lands on the matching CLI field unchanged.
fn apply_imported_value(cli: &mut Cli, field: ImportField, value: f64) {
    let as_age = |v: f64| v.round().max(0.0) as u32;
    match field {
        ImportField::StartAge => cli.start_age = as_age(value),
        ImportField::EndAge => cli.end_age = as_age(value),
        ImportField::AvgTaxRate => cli.avg_tax_rate = value,
        ImportField::CapGainsRate => cli.cap_gains_rate = value,
        ImportField::CashStart => cli.cash_start = value,
        ImportField::CashGrowth => cli.cash_growth = value,
        ImportField::BrokerageStart => cli.brokerage_start = value,
        ImportField::BrokerageBasisStart => cli.brokerage_basis_start = value,
        ImportField::BrokerageGrowth => cli.brokerage_growth = value,
        ImportField::RetirementStart => cli.retirement_start = value,
        ImportField::RetirementGrowth => cli.retirement_growth = value,
        ImportField::IncomeAnnual => cli.income_annual = value,
        ImportField::IncomeEndAge => cli.income_end_age = Some(as_age(value)),
        ImportField::ExpenseAnnual => cli.expense_annual = value,
        ImportField::ExpenseInflation => cli.expense_inflation = value,
        ImportField::HomeValue => cli.home_value = value,
        ImportField::HomeAppreciation => cli.home_appreciation = value,
        ImportField::HomeBasis => cli.home_basis = value,
        ImportField::HomeImprovements => cli.home_improvements = value,
        ImportField::HomeExclusion => cli.home_exclusion = value,
        ImportField::HomeSaleCostPct => cli.home_sale_cost_pct = value,
        ImportField::HomeCapGainsRate => cli.home_cap_gains_rate = value,
        ImportField::HomeSaleAge => cli.home_sale_age = Some(as_age(value)),
        ImportField::HomeCarryingCost => cli.home_carrying_cost = value,
        ImportField::MortgageBalance => cli.mortgage_balance = value,
        ImportField::MortgageRate => cli.mortgage_rate = value,
        ImportField::MortgageTermYears => cli.mortgage_term_years = as_age(value),
        ImportField::DebtStart => cli.debt_start = value,
        ImportField::DebtRate => cli.debt_rate = Some(value),
    }
}

#[cfg(test)]
fn config_from_json(json: &str) -> Result<ScenarioConfig, String> {
    let payload = serde_json::from_str::<ProjectPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    config_from_payload(payload)
}

fn config_from_payload(payload: ProjectPayload) -> Result<ScenarioConfig, String> {
    let mut cli = default_cli_for_api();

    if let Some(v) = payload.start_age {
        cli.start_age = v;
    }
    if let Some(v) = payload.end_age {
        cli.end_age = v;
    }
    if let Some(v) = payload.avg_tax_rate {
        cli.avg_tax_rate = v;
    }
    if let Some(v) = payload.cap_gains_rate {
        cli.cap_gains_rate = v;
    }

    if let Some(v) = payload.cash_start {
        cli.cash_start = v;
    }
    if let Some(v) = payload.cash_growth {
        cli.cash_growth = v;
    }
    if let Some(v) = payload.brokerage_start {
        cli.brokerage_start = v;
    }
    if let Some(v) = payload.brokerage_basis_start {
        cli.brokerage_basis_start = v;
    }
    if let Some(v) = payload.brokerage_growth {
        cli.brokerage_growth = v;
    }
    if let Some(v) = payload.retirement_start {
        cli.retirement_start = v;
    }
    if let Some(v) = payload.retirement_growth {
        cli.retirement_growth = v;
    }
    if let Some(v) = payload.home_proceeds_growth {
        cli.home_proceeds_growth = v;
    }

    if let Some(v) = payload.income_annual {
        cli.income_annual = v;
    }
    if let Some(v) = payload.income_end_age {
        cli.income_end_age = Some(v);
    }
    if let Some(v) = payload.income_tax_exempt {
        cli.income_tax_exempt = v;
    }
    if let Some(v) = payload.expense_annual {
        cli.expense_annual = v;
    }
    if let Some(v) = payload.expense_inflation {
        cli.expense_inflation = v;
    }

    if let Some(v) = payload.home_value {
        cli.home_value = v;
    }
    if let Some(v) = payload.home_appreciation {
        cli.home_appreciation = v;
    }
    if let Some(v) = payload.home_basis {
        cli.home_basis = v;
    }
    if let Some(v) = payload.home_improvements {
        cli.home_improvements = v;
    }
    if let Some(v) = payload.home_exclusion {
        cli.home_exclusion = v;
    }
    if let Some(v) = payload.home_sale_cost_pct {
        cli.home_sale_cost_pct = v;
    }
    if let Some(v) = payload.home_cap_gains_rate {
        cli.home_cap_gains_rate = v;
    }
    if let Some(v) = payload.home_carrying_cost {
        cli.home_carrying_cost = v;
    }
    if let Some(v) = payload.home_sale_age {
        cli.home_sale_age = Some(v);
    }
    if let Some(v) = payload.mortgage_balance {
        cli.mortgage_balance = v;
    }
    if let Some(v) = payload.mortgage_rate {
        cli.mortgage_rate = v;
    }
    if let Some(v) = payload.mortgage_term_years {
        cli.mortgage_term_years = v;
    }

    if let Some(v) = payload.debt_start {
        cli.debt_start = v;
    }
    if let Some(v) = payload.debt_rate {
        cli.debt_rate = Some(v);
    }

    if let Some(v) = payload.surplus_bucket {
        cli.surplus_bucket = match v {
            ApiBucketId::Cash => CliBucket::Cash,
            ApiBucketId::Brokerage => CliBucket::Brokerage,
            ApiBucketId::Retirement => CliBucket::Retirement,
            ApiBucketId::HomeProceeds => CliBucket::HomeProceeds,
        };
    }
    if let Some(v) = payload.sale_proceeds_bucket {
        cli.sale_proceeds_bucket = match v {
            ApiBucketId::Cash => CliBucket::Cash,
            ApiBucketId::Brokerage => CliBucket::Brokerage,
            ApiBucketId::Retirement => CliBucket::Retirement,
            ApiBucketId::HomeProceeds => CliBucket::HomeProceeds,
        };
    }

    let mut config = build_config(cli)?;

    if let Some(order) = payload.withdrawal_order {
        config.withdrawal_order = validate_withdrawal_order(order)?;
    }
    if let Some(streams) = payload.income_streams {
        config.income_streams = build_income_streams(streams)?;
    }
    if let Some(tiers) = payload.expense_tiers {
        config.expense_tiers = build_expense_tiers(tiers)?;
    }
    if let Some(properties) = payload.properties {
        config.properties = build_properties(properties, config.start_age, config.end_age)?;
    }

    Ok(config)
}

/// The explicit order must visit each bucket exactly once.
fn validate_withdrawal_order(order: Vec<ApiBucketId>) -> Result<Vec<BucketId>, String> {
    let order: Vec<BucketId> = order.into_iter().map(BucketId::from).collect();
    if order.len() != BucketId::ALL.len()
        || BucketId::ALL.iter().any(|id| !order.contains(id))
    {
        return Err("withdrawalOrder must be a permutation of all four buckets".to_string());
    }
    Ok(order)
}

fn build_income_streams(streams: Vec<ApiIncomeStream>) -> Result<Vec<IncomeStream>, String> {
    streams
        .into_iter()
        .map(|s| {
            if !s.annual.is_finite() || s.annual < 0.0 {
                return Err("incomeStreams[].annual must be >= 0".to_string());
            }
            if let (Some(start), Some(end)) = (s.start_age, s.end_age) {
                if end < start {
                    return Err("incomeStreams[].endAge must be >= startAge".to_string());
                }
            }
            Ok(IncomeStream {
                annual_gross: s.annual,
                start_age: s.start_age,
                end_age: s.end_age,
                tax: if s.tax_exempt {
                    IncomeTax::Exempt
                } else {
                    IncomeTax::AverageRate
                },
            })
        })
        .collect()
}

fn build_expense_tiers(tiers: Vec<ApiExpenseTier>) -> Result<Vec<ExpenseTier>, String> {
    if tiers.is_empty() {
        return Err("expenseTiers must not be empty".to_string());
    }
    tiers
        .into_iter()
        .enumerate()
        .map(|(idx, t)| {
            if t.years == 0 {
                return Err("expenseTiers[].years must be > 0".to_string());
            }
            if !t.annual_cost.is_finite() || t.annual_cost < 0.0 {
                return Err("expenseTiers[].annualCost must be >= 0".to_string());
            }
            Ok(ExpenseTier {
                label: t.label.unwrap_or_else(|| format!("tier-{}", idx + 1)),
                duration_years: t.years,
                annual_cost: t.annual_cost,
                inflation_rate: t.inflation / 100.0,
            })
        })
        .collect()
}

fn build_properties(
    properties: Vec<ApiProperty>,
    start_age: u32,
    end_age: u32,
) -> Result<Vec<Property>, String> {
    properties
        .into_iter()
        .map(|p| {
            if !p.value.is_finite() || p.value <= 0.0 {
                return Err("properties[].value must be > 0".to_string());
            }
            if !(0.0..=100.0).contains(&p.sale_cost_pct)
                || !(0.0..=100.0).contains(&p.cap_gains_rate)
            {
                return Err(
                    "properties[].saleCostPct and capGainsRate must be between 0 and 100"
                        .to_string(),
                );
            }
            if p.mortgage_balance > 0.0 && p.mortgage_term_years == 0 {
                return Err(
                    "properties[].mortgageTermYears must be > 0 with a mortgage balance"
                        .to_string(),
                );
            }
            let sale_offset = match p.sale_age {
                Some(age) => {
                    if age < start_age || age > end_age {
                        return Err(
                            "properties[].saleAge must fall within the simulated age range"
                                .to_string(),
                        );
                    }
                    Some(age - start_age)
                }
                None => None,
            };
            Ok(Property {
                value: p.value,
                appreciation_rate: p.appreciation / 100.0,
                cost_basis: p.cost_basis,
                improvements: p.improvements,
                exclusion: p.exclusion,
                sale_cost_pct: p.sale_cost_pct / 100.0,
                cap_gains_rate: p.cap_gains_rate / 100.0,
                annual_carrying_cost: p.carrying_cost,
                sale_offset,
                mortgage: (p.mortgage_balance > 0.0).then_some(Mortgage {
                    balance: p.mortgage_balance,
                    annual_rate: p.mortgage_rate / 100.0,
                    term_years: p.mortgage_term_years,
                }),
            })
        })
        .collect()
}

fn default_cli_for_api() -> Cli {
    Cli {
        start_age: 70,
        end_age: 100,
        avg_tax_rate: 25.0,
        cap_gains_rate: 15.0,
        cash_start: 200_000.0,
        cash_growth: 1.0,
        brokerage_start: 600_000.0,
        brokerage_basis_start: 0.0,
        brokerage_growth: 5.0,
        retirement_start: 0.0,
        retirement_growth: 5.0,
        home_proceeds_growth: 1.0,
        income_annual: 0.0,
        income_end_age: None,
        income_tax_exempt: false,
        expense_annual: 65_000.0,
        expense_inflation: 2.5,
        home_value: 0.0,
        home_appreciation: 3.0,
        home_basis: 0.0,
        home_improvements: 0.0,
        home_exclusion: 0.0,
        home_sale_cost_pct: 6.0,
        home_cap_gains_rate: 15.0,
        home_carrying_cost: 0.0,
        home_sale_age: None,
        mortgage_balance: 0.0,
        mortgage_rate: 0.0,
        mortgage_term_years: 0,
        debt_start: 0.0,
        debt_rate: None,
        surplus_bucket: CliBucket::Cash,
        sale_proceeds_bucket: CliBucket::HomeProceeds,
        withdrawal_order: CliWithdrawalOrder::CashFirst,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_cli() -> Cli {
        default_cli_for_api()
    }

    #[test]
    fn build_config_defaults_brokerage_basis_to_start_when_zero() {
        let mut cli = sample_cli();
        cli.brokerage_start = 50_000.0;
        cli.brokerage_basis_start = 0.0;

        let config = build_config(cli).expect("valid config");
        assert_approx(config.brokerage_cost_basis_start, 50_000.0);
    }

    #[test]
    fn build_config_rejects_basis_above_start() {
        let mut cli = sample_cli();
        cli.brokerage_start = 10_000.0;
        cli.brokerage_basis_start = 12_000.0;

        let err = build_config(cli).expect_err("must reject invalid basis");
        assert!(err.contains("--brokerage-basis-start"));
    }

    #[test]
    fn build_config_rejects_sub_negative_hundred_growth() {
        let mut cli = sample_cli();
        cli.brokerage_growth = -100.0;

        let err = build_config(cli).expect_err("must reject <= -100 growth rate");
        assert!(err.contains("--brokerage-growth"));
    }

    #[test]
    fn build_config_rejects_inverted_age_range() {
        let mut cli = sample_cli();
        cli.start_age = 80;
        cli.end_age = 75;

        let err = build_config(cli).expect_err("must reject inverted range");
        assert!(err.contains("--end-age"));
    }

    #[test]
    fn build_config_requires_term_for_mortgage() {
        let mut cli = sample_cli();
        cli.home_value = 500_000.0;
        cli.mortgage_balance = 100_000.0;
        cli.mortgage_term_years = 0;

        let err = build_config(cli).expect_err("must require a term");
        assert!(err.contains("--mortgage-term-years"));
    }

    #[test]
    fn build_config_requires_home_for_sale_age() {
        let mut cli = sample_cli();
        cli.home_value = 0.0;
        cli.home_sale_age = Some(80);

        let err = build_config(cli).expect_err("must require a home");
        assert!(err.contains("--home-sale-age"));
    }

    #[test]
    fn build_config_requires_debt_rate_with_starting_debt() {
        let mut cli = sample_cli();
        cli.debt_start = 5_000.0;
        cli.debt_rate = None;

        let err = build_config(cli).expect_err("must require a debt rate");
        assert!(err.contains("--debt-rate"));
    }

    #[test]
    fn build_config_converts_percentages_to_fractions() {
        let mut cli = sample_cli();
        cli.avg_tax_rate = 30.0;
        cli.brokerage_growth = 5.0;
        cli.home_value = 700_000.0;
        cli.home_sale_cost_pct = 6.0;

        let config = build_config(cli).expect("valid config");
        assert_approx(config.avg_tax_rate, 0.30);
        assert_approx(config.brokerage_growth_rate, 0.05);
        assert_approx(config.properties[0].sale_cost_pct, 0.06);
    }

    #[test]
    fn sale_age_maps_to_offset_from_start() {
        let mut cli = sample_cli();
        cli.home_value = 700_000.0;
        cli.home_sale_age = Some(75);

        let config = build_config(cli).expect("valid config");
        assert_eq!(config.properties[0].sale_offset, Some(5));
    }

    #[test]
    fn payload_arrays_override_flat_fields() {
        let json = r#"{
          "startAge": 70,
          "endAge": 90,
          "expenseTiers": [
            { "label": "independent", "years": 10, "annualCost": 60000, "inflation": 2.5 },
            { "label": "assisted", "years": 20, "annualCost": 90000, "inflation": 4.0 }
          ],
          "incomeStreams": [
            { "annual": 30000, "endAge": 74, "taxExempt": true }
          ]
        }"#;

        let config = config_from_json(json).expect("json should parse");
        assert_eq!(config.expense_tiers.len(), 2);
        assert_eq!(config.expense_tiers[1].label, "assisted");
        assert_approx(config.expense_tiers[1].inflation_rate, 0.04);
        assert_eq!(config.income_streams.len(), 1);
        assert_eq!(config.income_streams[0].tax, IncomeTax::Exempt);
        assert_eq!(config.income_streams[0].end_age, Some(74));
    }

    #[test]
    fn payload_rejects_incomplete_withdrawal_order() {
        let json = r#"{ "withdrawalOrder": ["cash", "brokerage"] }"#;
        let err = config_from_json(json).expect_err("must reject partial order");
        assert!(err.contains("permutation"));
    }

    #[test]
    fn payload_accepts_full_withdrawal_permutation() {
        let json =
            r#"{ "withdrawalOrder": ["retirement", "brokerage", "home-proceeds", "cash"] }"#;
        let config = config_from_json(json).expect("json should parse");
        assert_eq!(
            config.withdrawal_order,
            vec![
                BucketId::Retirement,
                BucketId::Brokerage,
                BucketId::HomeProceeds,
                BucketId::Cash,
            ]
        );
    }

    #[test]
    fn payload_rejects_zero_duration_tier() {
        let json = r#"{ "expenseTiers": [ { "years": 0, "annualCost": 1000 } ] }"#;
        let err = config_from_json(json).expect_err("must reject zero duration");
        assert!(err.contains("years"));
    }

    #[test]
    fn payload_property_sale_age_outside_range_is_rejected() {
        let json = r#"{
          "endAge": 90,
          "properties": [ { "value": 500000, "saleAge": 95 } ]
        }"#;
        let err = config_from_json(json).expect_err("must reject out-of-range sale age");
        assert!(err.contains("saleAge"));
    }

    #[test]
    fn project_response_serialization_contains_expected_fields() {
        let config = build_config(sample_cli()).expect("valid config");
        let response = build_project_response(run_projection(&config));
        let json = serde_json::to_string(&response).expect("response should serialize");
        assert!(json.contains("\"startingNetWorth\""));
        assert!(json.contains("\"peakNetWorth\""));
        assert!(json.contains("\"endingNetWorth\""));
        assert!(json.contains("\"rows\""));
        assert!(json.contains("\"netWorth\""));
        assert!(json.contains("\"cashFlow\""));
        assert!(json.contains("\"tier\""));
    }

    #[test]
    fn imported_values_project_over_defaults() {
        let report = parse_scenario_text(
            "income: 20000\nexpenses: 30000\nretirement: 100000\n\
             home value: 500000\nhome improvements: 30000\ngain exclusion: 20000",
        );
        let mut cli = sample_cli();
        for imported in &report.values {
            apply_imported_value(&mut cli, imported.field, imported.value);
        }
        assert_approx(cli.income_annual, 20_000.0);
        assert_approx(cli.expense_annual, 30_000.0);
        assert_approx(cli.retirement_start, 100_000.0);
        assert_approx(cli.home_improvements, 30_000.0);
        assert_approx(cli.home_exclusion, 20_000.0);

        let config = build_config(cli).expect("imported defaults remain valid");
        let projection = run_projection(&config);
        assert_eq!(projection.rows.len(), 31);
    }
}
