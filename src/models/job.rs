use super::keys::ResultKey;
use super::variable::VariableType;
use crate::utils::constants::{BUFFER_ID_FIELD, ORIG_FID_FIELD, ROW_ID_FIELD};
use std::path::PathBuf;

/// One unit of dispatch: a (buffer, variable) pair for a worker.
#[derive(Debug, Clone, PartialEq)]
pub struct JobArgument {
    pub key: ResultKey,
    pub kind: VariableType,
    /// Private copy of the buffer set (the partition table for point samples)
    pub buffer_file: PathBuf,
    pub variable_file: PathBuf,
    pub output_folder: PathBuf,
    pub partition_file: PathBuf,
    /// Intersection / statistics table written first
    pub intersect_table: PathBuf,
    /// Table that carries the result field once the job is complete
    pub result_table: PathBuf,
    /// Zonal-statistics scratch space, raster jobs only
    pub workspace: Option<PathBuf>,
    pub sum_field: Option<String>,
}

impl JobArgument {
    pub fn field_name(&self) -> String {
        self.key.field_name()
    }

    /// Field of the result table matched against the partition row id.
    pub fn join_key(&self) -> &'static str {
        match self.kind {
            VariableType::Raster => ORIG_FID_FIELD,
            VariableType::Polyline | VariableType::PointBuffer => BUFFER_ID_FIELD,
            VariableType::Point => ROW_ID_FIELD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InProgress,
    Complete,
    /// Output existed without its field and was removed
    CorruptRetry,
    /// Attempts exhausted; the controller retries the whole batch
    FailedRetry,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub key: ResultKey,
    pub state: JobState,
    /// False when an existing valid result was reused
    pub recomputed: bool,
    pub attempts: u32,
}

impl JobOutcome {
    pub fn is_complete(&self) -> bool {
        self.state == JobState::Complete
    }
}
