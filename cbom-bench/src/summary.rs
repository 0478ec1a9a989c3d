use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{JobId, JobStatus, RunId, RunMeta, RunStatus};

/// Per-status job counts over the pair index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Fired jobs and index entries whose record is missing.
    pub pending: usize,
}

impl StatusCounts {
    pub fn done(&self) -> usize {
        self.completed + self.failed + self.cancelled
    }

    pub fn total(&self) -> usize {
        self.done() + self.pending
    }

    fn add(&mut self, status: Option<JobStatus>) {
        match status {
            Some(JobStatus::Completed) => self.completed += 1,
            Some(JobStatus::Failed) => self.failed += 1,
            Some(JobStatus::Cancelled) => self.cancelled += 1,
            Some(JobStatus::Fired) | None => self.pending += 1,
        }
    }
}

/// Read-only view of a run for status displays and the CLI.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub name: String,
    pub status: RunStatus,
    pub counts: StatusCounts,
    pub done: usize,
    pub total: usize,
    pub expected_jobs: usize,
}

impl RunSummary {
    pub fn from_statuses(
        meta: &RunMeta,
        index: &HashMap<String, JobId>,
        statuses: &HashMap<JobId, Option<JobStatus>>,
    ) -> Self {
        let mut counts = StatusCounts::default();
        for job_id in index.values() {
            counts.add(statuses.get(job_id).copied().flatten());
        }
        Self {
            run_id: meta.id,
            name: meta.name.clone(),
            status: meta.status,
            done: counts.done(),
            total: counts.total(),
            expected_jobs: meta.expected_jobs,
            counts,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.counts.failed > 0
    }

    /// Whether every dispatched pair reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.total > 0 && self.done >= self.total
    }

    /// One-line rendering used by `status` and `list`.
    pub fn line(&self) -> String {
        format!(
            "{} · {} · status={} · completed={} failed={} cancelled={} pending={} total={}",
            self.name,
            self.run_id.short(),
            self.status,
            self.counts.completed,
            self.counts.failed,
            self.counts.cancelled,
            self.counts.pending,
            self.total,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_index() {
        let meta = RunMeta::new(
            RunId::new(),
            "s",
            serde_json::json!({}),
            2,
            vec!["w1".into(), "w2".into()],
        );
        let (a, b, c, d, superseded) = (JobId::new(), JobId::new(), JobId::new(), JobId::new(), JobId::new());
        let index = HashMap::from([
            ("r1|w1".to_string(), a),
            ("r1|w2".to_string(), b),
            ("r2|w1".to_string(), c),
            ("r2|w2".to_string(), d),
        ]);
        let statuses = HashMap::from([
            (a, Some(JobStatus::Completed)),
            (b, Some(JobStatus::Failed)),
            (c, Some(JobStatus::Fired)),
            (superseded, Some(JobStatus::Cancelled)),
        ]);

        let summary = RunSummary::from_statuses(&meta, &index, &statuses);
        assert_eq!(
            summary.counts,
            StatusCounts {
                completed: 1,
                failed: 1,
                cancelled: 0,
                pending: 2,
            }
        );
        assert_eq!((summary.done, summary.total), (2, 4));
        assert!(summary.has_failures());
        assert!(!summary.is_settled());
        assert!(summary.line().contains("failed=1"));
    }
}
