//! Pure budget and targeting computations. Nothing in here performs I/O, so
//! identical campaign inputs always produce identical values and a retried
//! step sees exactly what the first attempt saw.

mod budget;
mod countries;
mod location;

pub use budget::{
    allocate_budget, daily_budget, duration_days, per_platform_budget, BudgetAllocation,
    MINIMUM_DAILY_BUDGET,
};
pub use location::{normalize_country, resolve_targeting, TargetingSpec};
