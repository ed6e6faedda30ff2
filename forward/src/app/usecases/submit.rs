// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::RemoteExecPort;
use crate::app::services::{sbatch, slurm};
use crate::app::types::{JobSpec, SubmitSettings, SubmittedJob};

pub struct JobSubmitter {
    remote: Arc<dyn RemoteExecPort>,
    settings: SubmitSettings,
    workdir: OnceCell<String>,
}

impl JobSubmitter {
    pub fn new(remote: Arc<dyn RemoteExecPort>, settings: SubmitSettings) -> Self {
        Self {
            remote,
            settings,
            workdir: OnceCell::new(),
        }
    }

    /// Local job script for `spec`, checked before anything is uploaded.
    pub async fn resolve_script(&self, spec: &JobSpec) -> AppResult<PathBuf> {
        let candidates = sbatch::script_candidates(
            &spec.script_path,
            &self.settings.script_dir,
            self.settings.cluster_name.as_deref(),
        );
        for candidate in &candidates {
            let is_file = tokio::fs::metadata(candidate)
                .await
                .map(|meta| meta.is_file())
                .unwrap_or(false);
            if is_file {
                tracing::debug!(script = %candidate.display(), "resolved job script");
                return Ok(candidate.clone());
            }
        }
        Err(AppError::ScriptNotFound {
            script: spec.script_path.clone(),
            searched: candidates,
        })
    }

    /// `<home>/<workdir_name>` on the login host. The remote home is looked up
    /// at most once.
    pub async fn remote_workdir(&self) -> AppResult<String> {
        self.workdir
            .get_or_try_init(|| async {
                let home = match &self.settings.remote_home {
                    Some(home) => home.clone(),
                    None => self.query_home().await?,
                };
                Ok::<_, AppError>(sbatch::remote_workdir(&home, &self.settings.workdir_name))
            })
            .await
            .cloned()
    }

    async fn query_home(&self) -> AppResult<String> {
        let capture = self.remote.exec_capture(slurm::home_dir_command()).await?;
        let home = capture.stdout_lossy().trim().to_string();
        if capture.exit_code != 0 || home.is_empty() {
            return Err(AppError::RemoteQuery(format!(
                "could not determine remote home directory: {}",
                capture.failure_detail()
            )));
        }
        Ok(home)
    }

    #[tracing::instrument(level = "debug", skip(self, spec), fields(job = %spec.name))]
    pub async fn submit(&self, spec: &JobSpec) -> AppResult<SubmittedJob> {
        let local_script = self.resolve_script(spec).await?;
        let workdir = self
            .remote_workdir()
            .await
            .map_err(|err| err.into_stage(AppError::Submission))?;

        let mkdir = self
            .remote
            .exec_capture(&sbatch::mkdir_command(&workdir))
            .await
            .map_err(|err| err.into_stage(AppError::Submission))?;
        if mkdir.exit_code != 0 {
            return Err(AppError::Submission(format!(
                "could not create {workdir}: {}",
                mkdir.failure_detail()
            )));
        }

        let basename = script_basename(&local_script)?;
        let remote_script = sbatch::remote_join(&workdir, &basename);
        self.remote
            .upload_file(&local_script, &remote_script)
            .await
            .map_err(|err| err.into_stage(AppError::Submission))?;
        tracing::debug!(remote_script = %remote_script, "uploaded job script");

        let (stdout_path, stderr_path) = sbatch::log_paths(&workdir, &basename);
        let command = sbatch::sbatch_command(
            spec,
            &remote_script,
            &stdout_path,
            &stderr_path,
            &self.settings.gpu_partition,
        );
        let capture = self
            .remote
            .exec_capture(&command)
            .await
            .map_err(|err| err.into_stage(AppError::Submission))?;
        if capture.exit_code != 0 {
            return Err(AppError::Submission(capture.failure_detail()));
        }
        let stdout = capture.stdout_lossy();
        let Some(job_id) = slurm::parse_job_id(&stdout) else {
            return Err(AppError::Submission(format!(
                "sbatch did not report a job id: {}",
                stdout.trim()
            )));
        };
        tracing::info!(job_id = %job_id, "submitted job");

        Ok(SubmittedJob {
            spec: spec.clone(),
            remote_job_id: job_id,
            remote_script_path: remote_script,
            stdout_path,
            stderr_path,
        })
    }

    /// Rebuilds the submission record of a job that is already queued,
    /// following the same naming convention as `submit`.
    pub async fn reattach(&self, spec: &JobSpec, job_id: &str) -> AppResult<SubmittedJob> {
        let candidates = sbatch::script_candidates(
            &spec.script_path,
            &self.settings.script_dir,
            self.settings.cluster_name.as_deref(),
        );
        let Some(first) = candidates.first() else {
            return Err(AppError::InvalidArgument("no job script given".into()));
        };
        let basename = script_basename(first)?;
        let workdir = self
            .remote_workdir()
            .await
            .map_err(|err| err.into_stage(AppError::RemoteQuery))?;
        let (stdout_path, stderr_path) = sbatch::log_paths(&workdir, &basename);
        Ok(SubmittedJob {
            spec: spec.clone(),
            remote_job_id: job_id.to_string(),
            remote_script_path: sbatch::remote_join(&workdir, &basename),
            stdout_path,
            stderr_path,
        })
    }
}

fn script_basename(path: &Path) -> AppResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            AppError::InvalidArgument(format!(
                "job script path {} has no usable file name",
                path.display()
            ))
        })
}
