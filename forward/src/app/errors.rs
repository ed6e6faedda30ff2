// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::app::types::StartedHop;

pub const EXIT_CODE_OTHER: i32 = 1;
pub const EXIT_CODE_USAGE: i32 = 2;
pub const EXIT_CODE_DUPLICATE: i32 = 3;
/// sysexits EX_TEMPFAIL: the operator may re-run once the stale job is gone.
pub const EXIT_CODE_RETRY: i32 = 75;
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

pub mod codes {
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const DUPLICATE_JOB: &str = "duplicate_job";
    pub const JOB_NOT_FOUND: &str = "job_not_found";
    pub const SCRIPT_NOT_FOUND: &str = "script_not_found";
    pub const SUBMISSION_FAILED: &str = "submission_failed";
    pub const REMOTE_QUERY_FAILED: &str = "remote_query_failed";
    pub const JOB_NEVER_STARTED: &str = "job_never_started";
    pub const ALLOCATION_TIMEOUT: &str = "allocation_timeout";
    pub const AMBIGUOUS_NODE: &str = "ambiguous_node";
    pub const TUNNEL_SEQUENCING: &str = "tunnel_sequencing";
    pub const TUNNEL_SETUP: &str = "tunnel_setup";
    pub const TRANSPORT_ERROR: &str = "transport_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const INTERRUPTED: &str = "interrupted";
}

#[derive(Debug, Clone, ThisError)]
pub enum AppError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("a job named '{name}' is already queued or running (job id {job_id})")]
    DuplicateJob { name: String, job_id: String },

    #[error("no queued or running job named '{0}'")]
    JobNotFound(String),

    #[error("job script '{script}' not found (looked in: {})", display_paths(.searched))]
    ScriptNotFound {
        script: String,
        searched: Vec<PathBuf>,
    },

    #[error("job submission failed: {0}")]
    Submission(String),

    #[error("scheduler query failed: {0}")]
    RemoteQuery(String),

    #[error("job {job_id} ended in state {state} before it started running")]
    JobNeverStarted { job_id: String, state: String },

    #[error("job {job_id} was not allocated a node within {}s", .waited.as_secs())]
    AllocationTimeout { job_id: String, waited: Duration },

    #[error("expected exactly one node for job {job_id}, found [{}]", .candidates.join(", "))]
    AmbiguousNode {
        job_id: String,
        candidates: Vec<String>,
    },

    #[error("tunnel hops started out of order: {0}")]
    TunnelSequencing(String),

    #[error("tunnel setup failed: {message}")]
    TunnelSetup {
        message: String,
        started: Vec<StartedHop>,
    },

    #[error("remote transport failed: {0}")]
    Transport(String),

    #[error("{0}")]
    LocalIo(String),

    #[error("interrupted by operator")]
    Interrupted,
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => codes::INVALID_ARGUMENT,
            AppError::DuplicateJob { .. } => codes::DUPLICATE_JOB,
            AppError::JobNotFound(_) => codes::JOB_NOT_FOUND,
            AppError::ScriptNotFound { .. } => codes::SCRIPT_NOT_FOUND,
            AppError::Submission(_) => codes::SUBMISSION_FAILED,
            AppError::RemoteQuery(_) => codes::REMOTE_QUERY_FAILED,
            AppError::JobNeverStarted { .. } => codes::JOB_NEVER_STARTED,
            AppError::AllocationTimeout { .. } => codes::ALLOCATION_TIMEOUT,
            AppError::AmbiguousNode { .. } => codes::AMBIGUOUS_NODE,
            AppError::TunnelSequencing(_) => codes::TUNNEL_SEQUENCING,
            AppError::TunnelSetup { .. } => codes::TUNNEL_SETUP,
            AppError::Transport(_) => codes::TRANSPORT_ERROR,
            AppError::LocalIo(_) => codes::LOCAL_ERROR,
            AppError::Interrupted => codes::INTERRUPTED,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::InvalidArgument(_) => EXIT_CODE_USAGE,
            AppError::DuplicateJob { .. } => EXIT_CODE_DUPLICATE,
            AppError::AllocationTimeout { .. } => EXIT_CODE_RETRY,
            AppError::Interrupted => EXIT_CODE_INTERRUPTED,
            _ => EXIT_CODE_OTHER,
        }
    }

    /// Re-labels a transport failure as the error kind of the calling stage.
    pub fn into_stage(self, stage: fn(String) -> AppError) -> AppError {
        match self {
            AppError::Transport(message) => stage(message),
            other => other,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_separate_retryable_timeout_from_other_failures() {
        let timeout = AppError::AllocationTimeout {
            job_id: "7".into(),
            waited: Duration::from_secs(60),
        };
        assert_eq!(timeout.exit_code(), EXIT_CODE_RETRY);
        assert_eq!(
            AppError::Submission("boom".into()).exit_code(),
            EXIT_CODE_OTHER
        );
        assert_eq!(
            AppError::InvalidArgument("bad".into()).exit_code(),
            EXIT_CODE_USAGE
        );
        assert_eq!(AppError::Interrupted.exit_code(), EXIT_CODE_INTERRUPTED);
    }

    #[test]
    fn into_stage_only_relabels_transport_errors() {
        let err = AppError::Transport("connection reset".into()).into_stage(AppError::RemoteQuery);
        assert!(matches!(err, AppError::RemoteQuery(ref msg) if msg == "connection reset"));

        let err = AppError::Interrupted.into_stage(AppError::RemoteQuery);
        assert!(matches!(err, AppError::Interrupted));
    }

    #[test]
    fn messages_name_the_offending_values() {
        let err = AppError::AmbiguousNode {
            job_id: "42".into(),
            candidates: vec!["c01".into(), "c02".into()],
        };
        assert_eq!(
            err.to_string(),
            "expected exactly one node for job 42, found [c01, c02]"
        );

        let err = AppError::ScriptNotFound {
            script: "jupyter".into(),
            searched: vec![PathBuf::from("a/jupyter.sbatch"), PathBuf::from("b/jupyter.sbatch")],
        };
        assert_eq!(
            err.to_string(),
            "job script 'jupyter' not found (looked in: a/jupyter.sbatch, b/jupyter.sbatch)"
        );
        assert_eq!(err.code(), codes::SCRIPT_NOT_FOUND);
    }
}
