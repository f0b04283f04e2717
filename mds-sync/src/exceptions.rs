//! Exception-threshold machinery. Two independent monotonically
//! increasing counters: one run-wide, shared across segments, and one
//! per segment. Crossing a threshold raises an abort signal; aborts are
//! controlled stops, not failures.

use std::sync::{Arc, Mutex};

use tracing::warn;

use mds_core::domain::{EntityDeletionOutcome, EntityTransactionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortSignal {
    /// Stop the current segment's loop; remaining segments still run.
    Segment,
    /// Stop the whole run; subsequent segments do not execute.
    Run,
}

/// Run-wide exception accounting, shared by every segment of a run.
pub struct ExceptionMonitor {
    run_abort_threshold: Option<u32>,
    run_count: Mutex<u32>,
}

impl ExceptionMonitor {
    pub fn new(run_abort_threshold: Option<u32>) -> Self {
        ExceptionMonitor {
            run_abort_threshold,
            run_count: Mutex::new(0),
        }
    }

    pub fn run_exception_count(&self) -> u32 {
        *self.run_count.lock().unwrap()
    }

    /// A handler for one segment, with its own counter and threshold.
    pub fn segment(self: Arc<Self>, segment_abort_threshold: Option<u32>) -> SegmentExceptionHandler {
        SegmentExceptionHandler {
            monitor: self,
            segment_abort_threshold,
            segment_count: 0,
        }
    }
}

/// Tracks outcomes for one segment and raises abort signals once
/// thresholds are exceeded. The run-level signal dominates.
pub struct SegmentExceptionHandler {
    monitor: Arc<ExceptionMonitor>,
    segment_abort_threshold: Option<u32>,
    segment_count: u32,
}

impl SegmentExceptionHandler {
    pub fn track_transaction(&mut self, outcome: EntityTransactionOutcome) -> Option<AbortSignal> {
        if outcome.is_exception() {
            self.record_exception()
        } else {
            None
        }
    }

    pub fn track_deletion(&mut self, outcome: EntityDeletionOutcome) -> Option<AbortSignal> {
        if outcome.is_exception() {
            self.record_exception()
        } else {
            None
        }
    }

    fn record_exception(&mut self) -> Option<AbortSignal> {
        self.segment_count += 1;
        let run_count = {
            let mut count = self.monitor.run_count.lock().unwrap();
            *count += 1;
            *count
        };

        if let Some(threshold) = self.monitor.run_abort_threshold {
            if run_count >= threshold {
                warn!(
                    "Run exception count {} reached abort threshold {}",
                    run_count, threshold
                );
                return Some(AbortSignal::Run);
            }
        }
        if let Some(threshold) = self.segment_abort_threshold {
            if self.segment_count >= threshold {
                warn!(
                    "Segment exception count {} reached abort threshold {}",
                    self.segment_count, threshold
                );
                return Some(AbortSignal::Segment);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_threshold_raises_segment_abort() {
        let monitor = Arc::new(ExceptionMonitor::new(None));
        let mut handler = monitor.clone().segment(Some(2));

        assert_eq!(
            handler.track_transaction(EntityTransactionOutcome::ExceptionThrown),
            None
        );
        assert_eq!(
            handler.track_transaction(EntityTransactionOutcome::ExceptionThrown),
            Some(AbortSignal::Segment)
        );
    }

    #[test]
    fn run_threshold_spans_segments_and_dominates() {
        let monitor = Arc::new(ExceptionMonitor::new(Some(3)));

        let mut first = monitor.clone().segment(Some(10));
        first.track_deletion(EntityDeletionOutcome::ExceptionThrown);
        first.track_deletion(EntityDeletionOutcome::ExceptionThrown);

        // Third exception overall lands in a later segment whose own
        // threshold is also met; the run signal wins.
        let mut second = monitor.clone().segment(Some(1));
        assert_eq!(
            second.track_transaction(EntityTransactionOutcome::ExceptionThrown),
            Some(AbortSignal::Run)
        );
        assert_eq!(monitor.run_exception_count(), 3);
    }

    #[test]
    fn non_exception_outcomes_do_not_count() {
        let monitor = Arc::new(ExceptionMonitor::new(Some(1)));
        let mut handler = monitor.clone().segment(Some(1));

        assert_eq!(
            handler.track_transaction(EntityTransactionOutcome::NewEntityCreated),
            None
        );
        assert_eq!(
            handler.track_deletion(EntityDeletionOutcome::Deleted),
            None
        );
        assert_eq!(monitor.run_exception_count(), 0);
    }

    #[test]
    fn unset_thresholds_never_abort() {
        let monitor = Arc::new(ExceptionMonitor::new(None));
        let mut handler = monitor.clone().segment(None);
        for _ in 0..100 {
            assert_eq!(
                handler.track_transaction(EntityTransactionOutcome::ExceptionThrown),
                None
            );
        }
    }
}
