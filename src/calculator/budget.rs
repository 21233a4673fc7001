use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Smallest daily budget any platform accepts: one unit of a two-decimal
/// currency, in minor units.
pub const MINIMUM_DAILY_BUDGET: i64 = 100;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
const MICROS_PER_MINOR_UNIT: i64 = 10_000;

/// Budget figures for one platform, all amounts in minor currency units.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct BudgetAllocation {
    pub allocated_budget: i64,
    pub daily_budget: i64,
    pub duration_days: i64,
    pub currency: String,
}

impl BudgetAllocation {
    pub fn daily_budget_micros(&self) -> i64 {
        self.daily_budget * MICROS_PER_MINOR_UNIT
    }
}

pub fn per_platform_budget(total_budget: i64, platform_count: usize) -> Result<i64, Error> {
    if total_budget <= 0 {
        return Err(Error::InvalidBudget { total_budget });
    }
    if platform_count == 0 {
        return Err(Error::NoPlatformsRequested);
    }

    Ok(total_budget / platform_count as i64)
}

/// Whole days the campaign runs, rounding any partial day up.
pub fn duration_days(start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Result<i64, Error> {
    let seconds = (end_date - start_date).num_seconds();
    if seconds <= 0 {
        return Err(Error::InvalidSchedule {
            start_date,
            end_date,
        });
    }

    Ok((seconds + SECONDS_PER_DAY - 1) / SECONDS_PER_DAY)
}

pub fn daily_budget(per_platform_budget: i64, duration_days: i64) -> i64 {
    let daily = per_platform_budget / duration_days.max(1);
    daily.max(MINIMUM_DAILY_BUDGET)
}

pub fn allocate_budget(
    total_budget: i64,
    platform_count: usize,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    currency: &str,
) -> Result<BudgetAllocation, Error> {
    let allocated_budget = per_platform_budget(total_budget, platform_count)?;
    let duration_days = duration_days(start_date, end_date)?;

    Ok(BudgetAllocation {
        allocated_budget,
        daily_budget: daily_budget(allocated_budget, duration_days),
        duration_days,
        currency: currency.to_owned(),
    })
}
