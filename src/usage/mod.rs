//! Usage probes: how much of the free tier is already spent.

mod calendar;
mod probe;
mod region;

pub use calendar::{current_month_bounds, month_bounds};
pub use probe::UsageProbe;
pub use region::{Region, default_regions};
