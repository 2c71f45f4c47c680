//! Alert deduplication and debounced emission.
//!
//! Alerts are keyed by stage, so a stage never has more than one. Changes are
//! coalesced: the first pending change opens a debounce window and the whole
//! current set is emitted once the window has elapsed. Later changes inside
//! the window do not extend it.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::debug;

use geoval_model::{STAGE_COUNT, StageKind};

use crate::board::{Alert, AlertSeverity};

/// Why an alert is being cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearReason {
    /// The underlying problem went away; the alert is deleted.
    Resolved,
    /// The stage reported healthy progress again; the alert is deleted.
    ProgressRecovered,
    /// Dismissed by the user; kept as a cleared `Info` alert.
    Manual,
}

/// One coalesced emission of the alert set, ordered by stage number.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertsAggregated {
    pub sequence: u64,
    pub alerts: Vec<Alert>,
}

#[derive(Debug)]
pub struct AlertAggregator {
    alerts: [Option<Alert>; STAGE_COUNT],
    debounce: Duration,
    pending_since: Option<Instant>,
    sequence: u64,
    subscribers: Vec<Sender<AlertsAggregated>>,
}

impl AlertAggregator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            alerts: Default::default(),
            debounce,
            pending_since: None,
            sequence: 0,
            subscribers: Vec::new(),
        }
    }

    /// Receive every future emission.
    pub fn subscribe(&mut self) -> Receiver<AlertsAggregated> {
        let (sender, receiver) = unbounded();
        self.subscribers.push(sender);
        receiver
    }

    /// Insert or replace the alert of `alert.stage`.
    pub fn enqueue_alert(&mut self, alert: Alert, now: Instant) {
        let slot = &mut self.alerts[alert.stage.index()];
        if slot.as_ref() == Some(&alert) {
            return;
        }
        debug!(stage = %alert.stage, severity = %alert.severity, "alert queued");
        *slot = Some(alert);
        self.mark_pending(now);
    }

    /// Drop a stage's alert; returns whether one existed.
    pub fn remove_alert(&mut self, stage: StageKind, now: Instant) -> bool {
        let removed = self.alerts[stage.index()].take().is_some();
        if removed {
            self.mark_pending(now);
        }
        removed
    }

    pub fn clear_alert(&mut self, stage: StageKind, reason: ClearReason, now: Instant) -> bool {
        match reason {
            ClearReason::Resolved | ClearReason::ProgressRecovered => self.remove_alert(stage, now),
            ClearReason::Manual => {
                let Some(current) = self.alerts[stage.index()].clone() else {
                    return false;
                };
                self.enqueue_alert(
                    Alert {
                        severity: AlertSeverity::Info,
                        cleared: true,
                        ..current
                    },
                    now,
                );
                true
            }
        }
    }

    pub fn alert(&self, stage: StageKind) -> Option<&Alert> {
        self.alerts[stage.index()].as_ref()
    }

    /// Current alerts in stage order.
    pub fn current(&self) -> Vec<Alert> {
        self.alerts.iter().flatten().cloned().collect()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Emit the current set once the debounce window of the first pending
    /// change has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<AlertsAggregated> {
        let since = self.pending_since?;
        if now.saturating_duration_since(since) < self.debounce {
            return None;
        }
        Some(self.emit())
    }

    /// Emit the current set immediately.
    pub fn flush(&mut self) -> AlertsAggregated {
        self.emit()
    }

    /// Drop every alert and pending change; subscribers stay attached.
    pub fn reset(&mut self) {
        self.alerts = Default::default();
        self.pending_since = None;
    }

    fn mark_pending(&mut self, now: Instant) {
        self.pending_since.get_or_insert(now);
    }

    fn emit(&mut self) -> AlertsAggregated {
        self.pending_since = None;
        self.sequence += 1;
        let aggregated = AlertsAggregated {
            sequence: self.sequence,
            alerts: self.current(),
        };
        self.subscribers
            .retain(|subscriber| subscriber.send(aggregated.clone()).is_ok());
        aggregated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    fn error(stage: StageKind, message: &str) -> Alert {
        Alert::new(stage, AlertSeverity::Error, message)
    }

    #[test]
    fn burst_is_coalesced_into_one_emission() {
        let mut aggregator = AlertAggregator::new(WINDOW);
        let start = Instant::now();
        aggregator.enqueue_alert(error(StageKind::Relation, "a"), start);
        aggregator.enqueue_alert(error(StageKind::Table, "b"), start + WINDOW / 2);
        aggregator.enqueue_alert(error(StageKind::Table, "c"), start + WINDOW / 2);

        assert!(aggregator.poll(start + WINDOW / 2).is_none());
        let emitted = aggregator.poll(start + WINDOW).unwrap();
        let stages: Vec<_> = emitted.alerts.iter().map(|alert| alert.stage).collect();
        assert_eq!(stages, vec![StageKind::Table, StageKind::Relation]);
        assert_eq!(emitted.alerts[0].message, "c");
        assert!(aggregator.poll(start + WINDOW * 3).is_none());
    }

    #[test]
    fn identical_alert_is_not_a_change() {
        let mut aggregator = AlertAggregator::new(WINDOW);
        let start = Instant::now();
        aggregator.enqueue_alert(error(StageKind::Schema, "x"), start);
        aggregator.flush();
        aggregator.enqueue_alert(error(StageKind::Schema, "x"), start + WINDOW);
        assert!(!aggregator.has_pending());
    }

    #[test]
    fn manual_clear_neutralizes_alert() {
        let mut aggregator = AlertAggregator::new(WINDOW);
        let now = Instant::now();
        aggregator.enqueue_alert(error(StageKind::Geometry, "self-intersection found"), now);
        assert!(aggregator.clear_alert(StageKind::Geometry, ClearReason::Manual, now));
        let alert = aggregator.alert(StageKind::Geometry).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Info);
        assert!(alert.cleared);
        assert_eq!(alert.message, "self-intersection found");

        assert!(aggregator.clear_alert(StageKind::Geometry, ClearReason::Resolved, now));
        assert!(aggregator.alert(StageKind::Geometry).is_none());
        assert!(!aggregator.clear_alert(StageKind::Geometry, ClearReason::Manual, now));
    }

    #[test]
    fn subscribers_receive_emissions_and_are_pruned() {
        let mut aggregator = AlertAggregator::new(WINDOW);
        let kept = aggregator.subscribe();
        let dropped = aggregator.subscribe();
        drop(dropped);
        aggregator.enqueue_alert(error(StageKind::Attribute, "bad codes"), Instant::now());
        let emitted = aggregator.flush();
        assert_eq!(kept.try_recv().unwrap(), emitted);
        assert_eq!(aggregator.subscribers.len(), 1);
    }
}
