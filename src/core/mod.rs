mod engine;
mod types;

pub use engine::run_projection;
pub use types::{
    BucketId, DebtFacility, ExpenseTier, IncomeStream, IncomeTax, Mortgage, Projection, Property,
    ScenarioConfig, TaxTreatment, YearRow,
};
