//! Tracker runtime and event wiring
//!
//! This module connects one [`OffPeakTracker`] to its host collaborators: the
//! entity registry, the daily triggers and the snapshot store. All triggers
//! funnel into a single mpsc channel consumed by one task, so snapshot state
//! is never mutated concurrently and no locking is required.

use crate::config::{PeakWindow, TrackerConfig};
use crate::error::Result;
use crate::logging::{LogContext, get_logger_with_context};
use crate::persistence::SnapshotStore;
use crate::registry::{self, EntityRegistry};
use crate::scheduler::{DailyTime, TriggerHandle, schedule_daily};
use crate::tracker::{OffPeakTracker, TrackerEvent};
use chrono::{DateTime, Local};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Runtime driving a single off-peak tracker
pub struct TrackerRuntime {
    entity_id: String,
    unique_id: String,
    source_entity: String,
    window: PeakWindow,
    registry: Arc<EntityRegistry>,
    store: SnapshotStore,
    tracker: OffPeakTracker,
    events_tx: mpsc::UnboundedSender<TrackerEvent>,
    events_rx: mpsc::UnboundedReceiver<TrackerEvent>,
    triggers: Vec<TriggerHandle>,
    logger: crate::logging::StructuredLogger,
}

impl TrackerRuntime {
    /// Build a runtime from a validated tracker configuration
    pub fn new(
        config: &TrackerConfig,
        registry: Arc<EntityRegistry>,
        storage_dir: &str,
    ) -> Result<Self> {
        let window = config.window()?;
        let unique_id = config.unique_id();
        let entity_id = format!("sensor.{}", slugify(&config.name));
        let store = SnapshotStore::new(storage_dir, &unique_id);
        let tracker = OffPeakTracker::new(&config.source_entity, window);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let context = LogContext::new("runtime").with_tracker_id(unique_id.clone());

        Ok(Self {
            entity_id,
            unique_id,
            source_entity: config.source_entity.clone(),
            window,
            registry,
            store,
            tracker,
            events_tx,
            events_rx,
            triggers: Vec::new(),
            logger: get_logger_with_context(context),
        })
    }

    /// Entity id the derived reading is published under
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Tracker identity, also the persistence key
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Restore persisted state, register all listeners and publish once
    pub async fn init(&mut self) -> Result<()> {
        // Restore snapshots and the last published value, if any
        let snapshots = self.store.load().await?;
        let last_value = self.registry.numeric_state(&self.entity_id);
        self.tracker.restore(snapshots, last_value);

        // Scheduled triggers: peak start, peak end, midnight reset. The
        // midnight trigger fires at 00:00:02 so the source meter's own day
        // rollover has settled.
        self.triggers.push(schedule_daily(
            DailyTime::new(self.window.start_hour, self.window.start_minute, 0),
            TrackerEvent::PeakStartReached,
            self.events_tx.clone(),
        ));
        self.triggers.push(schedule_daily(
            DailyTime::new(self.window.end_hour, self.window.end_minute, 0),
            TrackerEvent::PeakEndReached,
            self.events_tx.clone(),
        ));
        self.triggers.push(schedule_daily(
            DailyTime::new(0, 0, 2),
            TrackerEvent::DayRolledOver,
            self.events_tx.clone(),
        ));

        // Forward source entity changes into the event channel
        self.triggers.push(self.spawn_source_listener());

        self.logger.info(&format!(
            "Tracker initialized, publishing {} from {}",
            self.entity_id, self.source_entity
        ));

        // Force an immediate update
        self.dispatch(TrackerEvent::SourceChanged, Local::now());
        Ok(())
    }

    /// Run the tracker until the event channel closes
    pub async fn run(mut self) -> Result<()> {
        self.init().await?;

        while let Some(event) = self.events_rx.recv().await {
            self.dispatch(event, Local::now());
        }

        self.logger.info("Tracker event channel closed, shutting down");
        Ok(())
    }

    /// Handle one event: update the tracker, persist dirty snapshots in the
    /// background and publish the new reading
    pub fn dispatch(&mut self, event: TrackerEvent, now: DateTime<Local>) {
        let source = self.registry.numeric_state(&self.source_entity);
        let outcome = self.tracker.handle_event(event, now, source);

        if outcome.snapshots_dirty {
            // Fire-and-forget; the only reader runs at startup, so a write
            // completing after the next trigger is harmless
            let store = self.store.clone();
            let snapshots = self.tracker.snapshots().clone();
            let logger = self.logger.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save(&snapshots).await {
                    logger.error(&format!("Failed to save snapshots: {}", e));
                }
            });
        }

        let state = match outcome.reading.value {
            Some(value) => format!("{}", value),
            None => registry::STATE_UNKNOWN.to_string(),
        };
        self.registry
            .publish(&self.entity_id, state, self.tracker.attributes());
    }

    fn spawn_source_listener(&self) -> TriggerHandle {
        let mut rx = self.registry.subscribe();
        let source_entity = self.source_entity.clone();
        let events_tx = self.events_tx.clone();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(changed) if changed == source_entity => {
                        if events_tx.send(TrackerEvent::SourceChanged).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        TriggerHandle::new(handle)
    }
}

/// Derive an entity id slug from a display name
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}
