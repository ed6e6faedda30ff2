// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[derive(Debug, Clone, Default)]
pub struct ExecCapture {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
}

impl ExecCapture {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Best available explanation of a failed command: stderr, then stdout.
    pub fn failure_detail(&self) -> String {
        let err = String::from_utf8_lossy(&self.stderr);
        if !err.trim().is_empty() {
            return err.trim().to_string();
        }
        let out = String::from_utf8_lossy(&self.stdout);
        if !out.trim().is_empty() {
            return out.trim().to_string();
        }
        format!("exit code {} with no output", self.exit_code)
    }
}

#[async_trait]
/// Command execution and file upload on the cluster login host.
/// Transport failures surface as `AppError::Transport`.
pub trait RemoteExecPort: Send + Sync {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture>;

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()>;
}
