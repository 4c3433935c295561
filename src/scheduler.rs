//! Daily wall-clock triggers
//!
//! The tracker needs three scheduled callbacks per day: peak-window start,
//! peak-window end and the midnight reset. Each trigger is a spawned task
//! that sleeps until the next local occurrence of its configured time of day,
//! sends the associated event into the runtime's channel and repeats.
//!
//! Dropping a [`TriggerHandle`] aborts its task; the runtime holds all
//! handles in one place so registrations are torn down together.

use crate::tracker::TrackerEvent;
use chrono::{DateTime, Days, Local, TimeZone};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A fixed time of day in local wall-clock terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTime {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

impl DailyTime {
    pub fn new(hour: u32, minute: u32, second: u32) -> Self {
        Self {
            hour,
            minute,
            second,
        }
    }
}

/// Handle for a registered trigger; aborts the task on drop
pub struct TriggerHandle {
    handle: JoinHandle<()>,
}

impl TriggerHandle {
    /// Wrap an already spawned listener task
    pub fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Next local occurrence of `at` strictly after `after`
///
/// Skips forward over times that do not exist locally (DST gaps).
pub fn next_occurrence(after: DateTime<Local>, at: DailyTime) -> DateTime<Local> {
    let mut date = after.date_naive();
    loop {
        if let Some(naive) = date.and_hms_opt(at.hour, at.minute, at.second) {
            if naive > after.naive_local() {
                if let Some(next) = Local.from_local_datetime(&naive).earliest() {
                    return next;
                }
            }
        }
        date = date
            .checked_add_days(Days::new(1))
            .unwrap_or_else(|| after.date_naive());
    }
}

/// Register a daily trigger that sends `event` at the given time of day
pub fn schedule_daily(
    at: DailyTime,
    event: TrackerEvent,
    tx: mpsc::UnboundedSender<TrackerEvent>,
) -> TriggerHandle {
    let handle = tokio::spawn(async move {
        loop {
            let now = Local::now();
            let next = next_occurrence(now, at);
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            if tx.send(event).is_err() {
                // Runtime is gone, stop firing
                break;
            }
        }
    });

    TriggerHandle { handle }
}
