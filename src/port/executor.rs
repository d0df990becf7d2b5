use std::path::PathBuf;

use crate::domain::{
    error::EngineError,
    job::{JobRequest, JobStatus}
};

/// Port for running external jobs
///
/// Calls never block on the job itself: `submit` starts it and `poll`
/// reports whether it is done.
pub trait JobExecutor: Send + Sync {
    /// Start a job and return its identifier
    fn submit(&self, request: &JobRequest) -> Result<String, EngineError>;

    fn poll(&self, job_id: &str) -> Result<JobStatus, EngineError>;

    fn kill(&self, job_id: &str) -> Result<(), EngineError>;

    /// Directory holding the files the job produced
    fn retrieve(&self, job_id: &str) -> Result<PathBuf, EngineError>;
}
