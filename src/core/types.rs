use serde::Serialize;

/// The fixed set of liquid fund pools a scenario can hold. Home proceeds only
/// carry a balance once a property sale has been settled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BucketId {
    Cash,
    Brokerage,
    Retirement,
    HomeProceeds,
}

impl BucketId {
    pub const ALL: [BucketId; 4] = [
        BucketId::Cash,
        BucketId::Brokerage,
        BucketId::Retirement,
        BucketId::HomeProceeds,
    ];

    pub fn tax_treatment(self) -> TaxTreatment {
        match self {
            BucketId::Cash => TaxTreatment::AlreadyTaxed,
            BucketId::Brokerage | BucketId::HomeProceeds => TaxTreatment::CapitalGains,
            BucketId::Retirement => TaxTreatment::OrdinaryIncome,
        }
    }
}

/// How withdrawals from a bucket are taxed. Capital-gains buckets track an
/// embedded tax-deferred component; ordinary-income buckets tax the whole
/// gross withdrawal at the average rate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TaxTreatment {
    AlreadyTaxed,
    CapitalGains,
    OrdinaryIncome,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IncomeTax {
    AverageRate,
    Exempt,
}

#[derive(Debug, Clone)]
pub struct IncomeStream {
    pub annual_gross: f64,
    pub start_age: Option<u32>,
    pub end_age: Option<u32>,
    pub tax: IncomeTax,
}

/// A sequential life-phase with its own base cost and inflation rate. Costs
/// compound by years elapsed since simulation start, not years within the
/// tier, so a tier entered later starts from an already-inflated level.
#[derive(Debug, Clone)]
pub struct ExpenseTier {
    pub label: String,
    pub duration_years: u32,
    pub annual_cost: f64,
    pub inflation_rate: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct Mortgage {
    pub balance: f64,
    pub annual_rate: f64,
    pub term_years: u32,
}

#[derive(Debug, Clone)]
pub struct Property {
    pub value: f64,
    pub appreciation_rate: f64,
    pub cost_basis: f64,
    pub improvements: f64,
    pub exclusion: f64,
    pub sale_cost_pct: f64,
    pub cap_gains_rate: f64,
    pub annual_carrying_cost: f64,
    /// Years after `start_age` at which the property is sold, if ever.
    pub sale_offset: Option<u32>,
    pub mortgage: Option<Mortgage>,
}

/// Uncapped fallback borrowing, drawn only once every bucket is exhausted.
#[derive(Debug, Clone, Copy)]
pub struct DebtFacility {
    pub start_balance: f64,
    pub rate: f64,
}

/// Complete, validated input bundle for one projection run. All rates are
/// fractions and all monetary amounts are annual; the input layer is
/// responsible for range checks before this struct is constructed.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub start_age: u32,
    pub end_age: u32,
    pub avg_tax_rate: f64,
    pub cap_gains_rate: f64,
    pub cash_start: f64,
    pub cash_growth_rate: f64,
    pub brokerage_start: f64,
    pub brokerage_cost_basis_start: f64,
    pub brokerage_growth_rate: f64,
    pub retirement_start: f64,
    pub retirement_growth_rate: f64,
    pub home_proceeds_growth_rate: f64,
    pub income_streams: Vec<IncomeStream>,
    pub expense_tiers: Vec<ExpenseTier>,
    pub properties: Vec<Property>,
    pub debt: Option<DebtFacility>,
    pub withdrawal_order: Vec<BucketId>,
    pub surplus_bucket: BucketId,
    pub sale_proceeds_bucket: BucketId,
}

/// One simulated year. Diagnostic components are broken out as numeric fields
/// so consumers and tests can assert on them directly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearRow {
    pub age: u32,
    pub tier: String,
    pub net_worth: f64,
    pub income_net: f64,
    pub expenses_total: f64,
    pub cash_flow: f64,
    pub cash_balance: f64,
    pub brokerage_balance: f64,
    pub retirement_balance: f64,
    pub home_proceeds_balance: f64,
    pub property_values: Vec<f64>,
    pub property_liquid_values: Vec<f64>,
    pub mortgage_balances: Vec<f64>,
    pub debt_balance: f64,
    pub debt_interest: f64,
    pub mortgage_payment: f64,
    pub mortgage_tax_shield: f64,
    pub withdrawn_net: f64,
    pub sale_proceeds: f64,
}

/// Ordered output of a single run: exactly one row per age in
/// `[start_age, end_age]`, appended forward and never revisited.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Projection {
    pub rows: Vec<YearRow>,
}

impl Projection {
    pub fn starting_net_worth(&self) -> f64 {
        self.rows.first().map(|r| r.net_worth).unwrap_or(0.0)
    }

    pub fn peak_net_worth(&self) -> f64 {
        self.rows
            .iter()
            .map(|r| r.net_worth)
            .fold(self.starting_net_worth(), f64::max)
    }

    pub fn ending_net_worth(&self) -> f64 {
        self.rows.last().map(|r| r.net_worth).unwrap_or(0.0)
    }
}
