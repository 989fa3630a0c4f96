use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub u64);

/// Simulated time in days, insurance convention of 360 days per year
/// (12 × 30-day months). Used only to give `waiting_period` a within-year
/// proxy date — see DESIGN.md open-question resolution #4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Day(pub u64);

impl Day {
    pub const DAYS_PER_YEAR: u64 = 360;

    /// Proxy day for the `event_index`-th of `events_in_iteration` events,
    /// spread evenly across the annual horizon.
    pub fn for_event_index(event_index: usize, events_in_iteration: usize) -> Self {
        let events_in_iteration = events_in_iteration.max(1) as u64;
        let slice = Self::DAYS_PER_YEAR / events_in_iteration.min(Self::DAYS_PER_YEAR).max(1);
        Day(event_index as u64 * slice.max(1))
    }
}
