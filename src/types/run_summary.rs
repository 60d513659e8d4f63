use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::types::ids::{EntityId, RunId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Scheduled,
    Manual,
    Targeted,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunTrigger::Scheduled => "scheduled",
            RunTrigger::Manual => "manual",
            RunTrigger::Targeted => "targeted",
        }
    }
}

/// Outcome of one orchestrator invocation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: Vec<EntityId>,
    pub batches: usize,
    pub duration_seconds: f64,
}

impl RunSummary {
    pub fn begin(trigger: RunTrigger, started_at: DateTime<Utc>) -> Self {
        RunSummary {
            run_id: RunId::new(),
            trigger,
            started_at,
            finished_at: started_at,
            attempted: 0,
            succeeded: 0,
            failed: Vec::new(),
            batches: 0,
            duration_seconds: 0.0,
        }
    }

    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, entity_id: EntityId) {
        self.attempted += 1;
        self.failed.push(entity_id);
    }

    pub fn finish(&mut self, finished_at: DateTime<Utc>, elapsed: std::time::Duration) {
        self.finished_at = finished_at;
        self.duration_seconds = elapsed.as_secs_f64();
    }
}
