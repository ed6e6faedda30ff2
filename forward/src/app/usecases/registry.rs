// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::RemoteExecPort;
use crate::app::services::slurm;
use crate::app::types::{JobName, QueuedJob, RegistrySettings};

/// Scheduler view of the operator's own queued and running jobs.
pub struct JobRegistry {
    remote: Arc<dyn RemoteExecPort>,
    settings: RegistrySettings,
}

impl JobRegistry {
    pub fn new(remote: Arc<dyn RemoteExecPort>, settings: RegistrySettings) -> Self {
        Self { remote, settings }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(user = %self.settings.username))]
    pub async fn list_queued_jobs(&self) -> AppResult<Vec<QueuedJob>> {
        let command = slurm::queue_listing_command(&self.settings.username);
        let capture = self
            .remote
            .exec_capture(&command)
            .await
            .map_err(|err| err.into_stage(AppError::RemoteQuery))?;
        if capture.exit_code != 0 {
            return Err(AppError::RemoteQuery(format!(
                "squeue exited with {}: {}",
                capture.exit_code,
                capture.failure_detail()
            )));
        }
        let jobs = slurm::parse_queue_listing(&capture.stdout_lossy())
            .map_err(|err| AppError::RemoteQuery(format!("unexpected squeue output: {err}")))?;
        tracing::debug!(count = jobs.len(), "listed queued jobs");
        Ok(jobs)
    }

    pub async fn list_running_jobs(&self) -> AppResult<BTreeSet<String>> {
        Ok(self
            .list_queued_jobs()
            .await?
            .into_iter()
            .map(|job| job.name)
            .collect())
    }

    pub async fn find_job(&self, name: &JobName) -> AppResult<Option<QueuedJob>> {
        Ok(self
            .list_queued_jobs()
            .await?
            .into_iter()
            .find(|job| job.name == name.as_str()))
    }

    /// Fails with `DuplicateJob` when a job with this name is already queued.
    pub async fn check_previous_submit(&self, name: &JobName) -> AppResult<()> {
        match self.find_job(name).await? {
            Some(existing) => {
                tracing::info!(job_id = %existing.job_id, state = %existing.state, "job name already in use");
                Err(AppError::DuplicateJob {
                    name: name.to_string(),
                    job_id: existing.job_id,
                })
            }
            None => Ok(()),
        }
    }
}
