//! Off-peak tracking state machine
//!
//! This module contains the core logic that derives an off-peak cumulative
//! counter from a monotonically increasing source meter. The running total is
//! frozen at the value captured when the peak window opens; once the window
//! closes, the usage accrued inside the window is subtracted from the raw
//! total. Snapshots are cleared at midnight and survive restarts through the
//! persistence layer.

use crate::config::PeakWindow;
use crate::logging::{LogContext, get_logger_with_context};
use chrono::{DateTime, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const ATTR_SOURCE_ENTITY: &str = "source_entity";
pub const ATTR_PEAK_START: &str = "peak_start";
pub const ATTR_PEAK_END: &str = "peak_end";
pub const ATTR_SNAPSHOT_START: &str = "snapshot_at_peak_start";
pub const ATTR_SNAPSHOT_END: &str = "snapshot_at_peak_end";
pub const ATTR_PEAK_USAGE: &str = "peak_window_usage_kwh";
pub const ATTR_STATUS: &str = "status";
pub const ATTR_UNIT: &str = "unit_of_measurement";

pub const UNIT_KILO_WATT_HOUR: &str = "kWh";

/// Source meter readings captured at the peak window boundaries
///
/// This is the only persisted record. `snapshot_end` is only meaningful when
/// `snapshot_start` is set for the same date; both are cleared at the start of
/// each new calendar day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Source reading captured at peak window start for the current day
    pub snapshot_start: Option<f64>,

    /// Source reading captured at peak window end for the current day
    pub snapshot_end: Option<f64>,

    /// Calendar date these snapshots belong to
    pub snapshot_date: Option<NaiveDate>,
}

/// Computed phase of the tracker, published as the `status` attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Before the peak window opens; raw source value passes through
    BeforeWindow,

    /// Inside the peak window; output frozen at the start snapshot
    PeakFrozen,

    /// After the window with both snapshots captured
    AfterWindow,

    /// After the window but the end snapshot was never captured
    MissingEndSnapshot,

    /// After the window with no snapshots at all
    NoSnapshots,

    /// Source entity missing, unavailable or non-numeric
    Unavailable,
}

impl Status {
    /// Status tag as published in the attribute map
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::BeforeWindow => "off_peak (before window)",
            Status::PeakFrozen => "peak window (frozen)",
            Status::AfterWindow => "off_peak (after window)",
            Status::MissingEndSnapshot => "off_peak (missing end snapshot)",
            Status::NoSnapshots => "off_peak (no snapshots)",
            Status::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a recomputation: the value to publish and the current phase
///
/// `value` is `None` only before the first successful source read.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedReading {
    pub value: Option<f64>,
    pub status: Status,
}

/// Events delivered to the tracker by the host's scheduler and state registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerEvent {
    /// The upstream meter reported a new value
    SourceChanged,

    /// The configured peak-start time of day was reached
    PeakStartReached,

    /// The configured peak-end time of day was reached
    PeakEndReached,

    /// Midnight reset (fired shortly after 00:00 to dodge meter rollover)
    DayRolledOver,
}

/// Result of handling a single event
#[derive(Debug, Clone, PartialEq)]
pub struct EventOutcome {
    /// The reading to publish
    pub reading: DerivedReading,

    /// Whether snapshot state mutated and should be persisted
    pub snapshots_dirty: bool,
}

/// Tracker deriving an off-peak counter from a cumulative source meter
pub struct OffPeakTracker {
    source_entity: String,
    window: PeakWindow,
    snapshots: SnapshotState,

    /// Last computed value; held across unreadable source states
    last_value: Option<f64>,
    status: Status,

    logger: crate::logging::StructuredLogger,
}

impl OffPeakTracker {
    /// Create a new tracker with empty snapshot state
    pub fn new(source_entity: &str, window: PeakWindow) -> Self {
        let context = LogContext::new("tracker").with_field("source", source_entity.to_string());
        Self {
            source_entity: source_entity.to_string(),
            window,
            snapshots: SnapshotState::default(),
            last_value: None,
            status: Status::Unavailable,
            logger: get_logger_with_context(context),
        }
    }

    /// Restore persisted snapshots and the last published value on startup
    pub fn restore(&mut self, snapshots: SnapshotState, last_value: Option<f64>) {
        self.logger.debug(&format!(
            "Restored snapshots: start={:?} end={:?} date={:?}",
            snapshots.snapshot_start, snapshots.snapshot_end, snapshots.snapshot_date
        ));
        self.snapshots = snapshots;
        self.last_value = last_value;
    }

    /// Current snapshot state
    pub fn snapshots(&self) -> &SnapshotState {
        &self.snapshots
    }

    /// Last computed reading without recomputing
    pub fn reading(&self) -> DerivedReading {
        DerivedReading {
            value: self.last_value,
            status: self.status,
        }
    }

    /// Handle a single trigger: mutate snapshots as required, then recompute
    ///
    /// The caller supplies the wall-clock instant and the current source
    /// reading (`None` when the source is unreadable).
    pub fn handle_event(
        &mut self,
        event: TrackerEvent,
        now: DateTime<Local>,
        source: Option<f64>,
    ) -> EventOutcome {
        let snapshots_dirty = match event {
            TrackerEvent::PeakStartReached => {
                self.snapshots.snapshot_date = Some(now.date_naive());
                if let Some(value) = source {
                    self.snapshots.snapshot_start = Some(value);
                    // Reset end snapshot for today
                    self.snapshots.snapshot_end = None;
                    self.logger
                        .debug(&format!("Peak start snapshot: {:.3} kWh at {}", value, now));
                } else {
                    self.logger
                        .warn("Source unreadable at peak start, start snapshot skipped");
                }
                true
            }
            TrackerEvent::PeakEndReached => {
                if let Some(value) = source {
                    self.snapshots.snapshot_end = Some(value);
                    self.logger
                        .debug(&format!("Peak end snapshot: {:.3} kWh at {}", value, now));
                    true
                } else {
                    // Left unset rather than guessed; the missing-end state
                    // recovers on its own after the window
                    self.logger
                        .warn("Source unreadable at peak end, end snapshot left unset");
                    false
                }
            }
            TrackerEvent::DayRolledOver => {
                self.logger.debug("Midnight reset, clearing snapshots");
                self.snapshots.snapshot_start = None;
                self.snapshots.snapshot_end = None;
                self.snapshots.snapshot_date = Some(now.date_naive());
                true
            }
            TrackerEvent::SourceChanged => false,
        };

        let reading = self.recompute(now, source);
        EventOutcome {
            reading,
            snapshots_dirty,
        }
    }

    /// Recalculate the off-peak value from current snapshot state
    pub fn recompute(&mut self, now: DateTime<Local>, source: Option<f64>) -> DerivedReading {
        let current_minutes = now.hour() * 60 + now.minute();

        let (value, status) = match source {
            // Keep last known value while the source is unreadable
            None => (self.last_value, Status::Unavailable),
            Some(total) => {
                if current_minutes < self.window.start_minutes() {
                    // Before peak, all import is off-peak
                    (Some(total), Status::BeforeWindow)
                } else if current_minutes < self.window.end_minutes() {
                    // Inside the window, freeze at the start snapshot
                    let frozen = self.snapshots.snapshot_start.unwrap_or(total);
                    (Some(frozen), Status::PeakFrozen)
                } else {
                    match (self.snapshots.snapshot_start, self.snapshots.snapshot_end) {
                        (Some(start), Some(end)) => {
                            let peak_usage = (end - start).max(0.0);
                            (Some((total - peak_usage).max(0.0)), Status::AfterWindow)
                        }
                        // End snapshot missing (restart during the window?)
                        (Some(_), None) => (Some(total), Status::MissingEndSnapshot),
                        _ => (Some(total), Status::NoSnapshots),
                    }
                }
            }
        };

        if let Some(v) = value {
            self.last_value = Some(round3(v));
        }
        self.status = status;

        self.reading()
    }

    /// Usage accrued inside the peak window, when both snapshots are present
    pub fn peak_usage(&self) -> Option<f64> {
        match (self.snapshots.snapshot_start, self.snapshots.snapshot_end) {
            (Some(start), Some(end)) => Some(round3((end - start).max(0.0))),
            _ => None,
        }
    }

    /// Attribute map published alongside the value
    pub fn attributes(&self) -> Map<String, Value> {
        let mut attrs = Map::new();
        attrs.insert(
            ATTR_SOURCE_ENTITY.to_string(),
            Value::from(self.source_entity.clone()),
        );
        attrs.insert(
            ATTR_PEAK_START.to_string(),
            Value::from(self.window.start_hhmm()),
        );
        attrs.insert(ATTR_PEAK_END.to_string(), Value::from(self.window.end_hhmm()));
        attrs.insert(
            ATTR_SNAPSHOT_START.to_string(),
            opt_value(self.snapshots.snapshot_start),
        );
        attrs.insert(
            ATTR_SNAPSHOT_END.to_string(),
            opt_value(self.snapshots.snapshot_end),
        );
        attrs.insert(ATTR_PEAK_USAGE.to_string(), opt_value(self.peak_usage()));
        attrs.insert(ATTR_STATUS.to_string(), Value::from(self.status.as_str()));
        attrs.insert(ATTR_UNIT.to_string(), Value::from(UNIT_KILO_WATT_HOUR));
        attrs
    }
}

fn opt_value(value: Option<f64>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

/// Round to 3 decimal places for publication
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use chrono::TimeZone;

    fn window() -> PeakWindow {
        TrackerConfig::default().window().unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 6, 3, hour, minute, 0).unwrap()
    }

    #[test]
    fn before_window_passes_raw_value_through() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        let reading = tracker.recompute(at(8, 0), Some(100.0));
        assert_eq!(reading.value, Some(100.0));
        assert_eq!(reading.status, Status::BeforeWindow);
    }

    #[test]
    fn in_window_without_snapshot_falls_back_to_raw() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        let reading = tracker.recompute(at(12, 0), Some(105.5));
        assert_eq!(reading.value, Some(105.5));
        assert_eq!(reading.status, Status::PeakFrozen);
    }

    #[test]
    fn unavailable_source_holds_last_value() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        tracker.recompute(at(8, 0), Some(42.0));

        let reading = tracker.recompute(at(9, 0), None);
        assert_eq!(reading.value, Some(42.0));
        assert_eq!(reading.status, Status::Unavailable);
    }

    #[test]
    fn unavailable_source_with_no_history_publishes_nothing() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        let reading = tracker.recompute(at(9, 0), None);
        assert_eq!(reading.value, None);
        assert_eq!(reading.status, Status::Unavailable);
    }

    #[test]
    fn peak_start_clears_stale_end_snapshot() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        tracker.restore(
            SnapshotState {
                snapshot_start: Some(80.0),
                snapshot_end: Some(95.0),
                snapshot_date: Some(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()),
            },
            Some(95.0),
        );

        let outcome = tracker.handle_event(TrackerEvent::PeakStartReached, at(11, 0), Some(120.0));
        assert!(outcome.snapshots_dirty);
        assert_eq!(tracker.snapshots().snapshot_start, Some(120.0));
        assert_eq!(tracker.snapshots().snapshot_end, None);
        assert_eq!(
            tracker.snapshots().snapshot_date,
            Some(NaiveDate::from_ymd_opt(2025, 6, 3).unwrap())
        );
    }

    #[test]
    fn unreadable_source_at_peak_end_leaves_snapshot_unset() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        tracker.handle_event(TrackerEvent::PeakStartReached, at(11, 0), Some(120.0));

        let outcome = tracker.handle_event(TrackerEvent::PeakEndReached, at(14, 0), None);
        assert!(!outcome.snapshots_dirty);
        assert_eq!(tracker.snapshots().snapshot_end, None);
    }

    #[test]
    fn midnight_reset_clears_snapshots_and_advances_date() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        tracker.handle_event(TrackerEvent::PeakStartReached, at(11, 0), Some(120.0));
        tracker.handle_event(TrackerEvent::PeakEndReached, at(14, 0), Some(140.0));

        let midnight = Local.with_ymd_and_hms(2025, 6, 4, 0, 0, 2).unwrap();
        let outcome = tracker.handle_event(TrackerEvent::DayRolledOver, midnight, Some(150.0));
        assert!(outcome.snapshots_dirty);
        assert_eq!(tracker.snapshots().snapshot_start, None);
        assert_eq!(tracker.snapshots().snapshot_end, None);
        assert_eq!(
            tracker.snapshots().snapshot_date,
            Some(NaiveDate::from_ymd_opt(2025, 6, 4).unwrap())
        );
        // Before-window read on the new day returns the raw value
        assert_eq!(outcome.reading.value, Some(150.0));
        assert_eq!(outcome.reading.status, Status::BeforeWindow);
    }

    #[test]
    fn post_window_result_is_floored_at_zero() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        // Meter reset mid-day: raw total smaller than the peak usage
        tracker.handle_event(TrackerEvent::PeakStartReached, at(11, 0), Some(100.0));
        tracker.handle_event(TrackerEvent::PeakEndReached, at(14, 0), Some(140.0));

        let reading = tracker.recompute(at(15, 0), Some(10.0));
        assert_eq!(reading.value, Some(0.0));
        assert_eq!(reading.status, Status::AfterWindow);
    }

    #[test]
    fn negative_peak_usage_is_treated_as_zero() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        // End below start can only come from a glitching meter
        tracker.handle_event(TrackerEvent::PeakStartReached, at(11, 0), Some(140.0));
        tracker.handle_event(TrackerEvent::PeakEndReached, at(14, 0), Some(120.0));

        let reading = tracker.recompute(at(15, 0), Some(150.0));
        assert_eq!(reading.value, Some(150.0));
        assert_eq!(tracker.peak_usage(), Some(0.0));
    }

    #[test]
    fn published_value_is_rounded_to_three_decimals() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        let reading = tracker.recompute(at(8, 0), Some(1.23456));
        assert_eq!(reading.value, Some(1.235));
    }

    #[test]
    fn attributes_carry_snapshots_and_status() {
        let mut tracker = OffPeakTracker::new("sensor.meter", window());
        tracker.handle_event(TrackerEvent::PeakStartReached, at(11, 0), Some(120.0));
        tracker.handle_event(TrackerEvent::PeakEndReached, at(14, 0), Some(140.0));
        tracker.recompute(at(15, 0), Some(150.0));

        let attrs = tracker.attributes();
        assert_eq!(attrs[ATTR_SOURCE_ENTITY], "sensor.meter");
        assert_eq!(attrs[ATTR_PEAK_START], "11:00");
        assert_eq!(attrs[ATTR_PEAK_END], "14:00");
        assert_eq!(attrs[ATTR_SNAPSHOT_START], 120.0);
        assert_eq!(attrs[ATTR_SNAPSHOT_END], 140.0);
        assert_eq!(attrs[ATTR_PEAK_USAGE], 20.0);
        assert_eq!(attrs[ATTR_STATUS], "off_peak (after window)");
        assert_eq!(attrs[ATTR_UNIT], "kWh");
    }

    #[test]
    fn attributes_use_null_for_absent_snapshots() {
        let tracker = OffPeakTracker::new("sensor.meter", window());
        let attrs = tracker.attributes();
        assert_eq!(attrs[ATTR_SNAPSHOT_START], Value::Null);
        assert_eq!(attrs[ATTR_SNAPSHOT_END], Value::Null);
        assert_eq!(attrs[ATTR_PEAK_USAGE], Value::Null);
    }
}
