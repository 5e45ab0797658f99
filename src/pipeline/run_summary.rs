use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Steps of a consolidation run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    LocateInput,
    Normalize,
    ValidateCast,
    LoadMaster,
    Merge,
    Backup,
    Persist,
    Done,
    Failed,
}

impl Stage {
    /// True while nothing durable has been touched yet: a run stopped at
    /// one of these stages leaves the master exactly as it was.
    pub fn is_abandonable(&self) -> bool {
        matches!(
            self,
            Stage::LocateInput
                | Stage::Normalize
                | Stage::ValidateCast
                | Stage::LoadMaster
                | Stage::Merge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Done,
    Failed,
}

/// Counts reported at the end of a run; the orchestrator's only output
/// besides success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub stage: Stage,
    pub failed_at: Option<Stage>,
    pub stages_completed: Vec<Stage>,
    pub input_files: Vec<PathBuf>,
    pub rows_scanned: usize,
    pub rows_valid: usize,
    pub rows_added: usize,
    pub rows_updated: usize,
    pub rows_removed: usize,
    pub master_rows: usize,
    pub backup_path: Option<PathBuf>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub fn start() -> Self {
        Self {
            status: RunStatus::Done,
            stage: Stage::LocateInput,
            failed_at: None,
            stages_completed: Vec::new(),
            input_files: Vec::new(),
            rows_scanned: 0,
            rows_valid: 0,
            rows_added: 0,
            rows_updated: 0,
            rows_removed: 0,
            master_rows: 0,
            backup_path: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn enter(&mut self, stage: Stage) {
        if self.stage != stage && !matches!(self.stage, Stage::Done | Stage::Failed) {
            self.stages_completed.push(self.stage);
        }
        self.stage = stage;
    }

    pub fn finish(&mut self) {
        self.enter(Stage::Persist);
        self.stages_completed.push(Stage::Persist);
        self.stage = Stage::Done;
        self.status = RunStatus::Done;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.failed_at = Some(self.stage);
        self.stage = Stage::Failed;
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Done
    }
}
