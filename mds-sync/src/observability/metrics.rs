//! Metric catalog for the sync engine. One enum holds every metric name
//! so there are no magic strings; per-subsystem helper modules wrap the
//! actual recording calls.

use std::fmt;

use once_cell::sync::Lazy;

/// Every metric the engine records, for exporter registration.
pub static ALL_METRICS: Lazy<Vec<MetricName>> = Lazy::new(|| {
    vec![
        MetricName::DedupNewEntities,
        MetricName::DedupDuplicatesFound,
        MetricName::DedupManualInspections,
        MetricName::ProcessorTransactions,
        MetricName::ProcessorExceptions,
        MetricName::RunnerDeletions,
        MetricName::RunnerOrphansReconciled,
        MetricName::RunnerSegmentsAborted,
        MetricName::RunnerRunsAborted,
    ]
});

/// Enum representing all metric names used in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Deduplication
    DedupNewEntities,
    DedupDuplicatesFound,
    DedupManualInspections,

    // Processor outcomes
    ProcessorTransactions,
    ProcessorExceptions,

    // Runner
    RunnerDeletions,
    RunnerOrphansReconciled,
    RunnerSegmentsAborted,
    RunnerRunsAborted,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::DedupNewEntities => "mds_dedup_new_entities_total",
            MetricName::DedupDuplicatesFound => "mds_dedup_duplicates_found_total",
            MetricName::DedupManualInspections => "mds_dedup_manual_inspections_total",
            MetricName::ProcessorTransactions => "mds_processor_transactions_total",
            MetricName::ProcessorExceptions => "mds_processor_exceptions_total",
            MetricName::RunnerDeletions => "mds_runner_deletions_total",
            MetricName::RunnerOrphansReconciled => "mds_runner_orphans_reconciled_total",
            MetricName::RunnerSegmentsAborted => "mds_runner_segments_aborted_total",
            MetricName::RunnerRunsAborted => "mds_runner_runs_aborted_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub mod dedup {
    use super::MetricName;

    pub fn new_entity() {
        ::metrics::counter!(MetricName::DedupNewEntities.as_str()).increment(1);
    }

    pub fn duplicate_found() {
        ::metrics::counter!(MetricName::DedupDuplicatesFound.as_str()).increment(1);
    }

    pub fn manual_inspection_required() {
        ::metrics::counter!(MetricName::DedupManualInspections.as_str()).increment(1);
    }
}

pub mod processor {
    use super::MetricName;
    use mds_core::domain::EntityTransactionOutcome;

    /// Record one finished entity transaction, labeled by outcome.
    pub fn transaction(outcome: EntityTransactionOutcome) {
        ::metrics::counter!(
            MetricName::ProcessorTransactions.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        if outcome.is_exception() {
            ::metrics::counter!(MetricName::ProcessorExceptions.as_str()).increment(1);
        }
    }
}

pub mod runner {
    use super::MetricName;
    use mds_core::domain::EntityDeletionOutcome;

    pub fn deletion(outcome: EntityDeletionOutcome) {
        ::metrics::counter!(
            MetricName::RunnerDeletions.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    pub fn orphan_reconciled() {
        ::metrics::counter!(MetricName::RunnerOrphansReconciled.as_str()).increment(1);
    }

    pub fn segment_aborted() {
        ::metrics::counter!(MetricName::RunnerSegmentsAborted.as_str()).increment(1);
    }

    pub fn run_aborted() {
        ::metrics::counter!(MetricName::RunnerRunsAborted.as_str()).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn metric_names_are_unique() {
        let names: HashSet<&'static str> = ALL_METRICS.iter().map(|m| m.as_str()).collect();
        assert_eq!(names.len(), ALL_METRICS.len());
        assert!(names.iter().all(|n| n.starts_with("mds_")));
    }
}
