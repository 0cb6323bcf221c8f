//! Calendar views: date ranges and task binning.

mod binning;
mod view;

pub use binning::{
    bin_by_day_and_hour, bin_by_hour, count_by_date, select_by_exact_date, split_by_day,
    HourBins, WeekGrid, DAYS_PER_WEEK, HOUR_SLOTS,
};
pub use view::{day_bounds, local_midnight, month_start, week_start, ViewMode};
