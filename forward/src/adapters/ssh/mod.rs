// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::OnceCell;

use crate::adapters::network::net;
use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ExecCapture, RemoteExecPort};
use crate::app::types::SshConfig;

mod error;
mod session;

pub use error::AuthenticationFailure;
use session::{SessionManager, SshParams};

/// Remote execution on the login host over a single lazily opened SSH
/// connection. Nothing touches the network until the first command.
pub struct SshAdapter {
    config: SshConfig,
    session: OnceCell<SessionManager>,
}

impl SshAdapter {
    pub fn new(config: SshConfig) -> Self {
        Self {
            config,
            session: OnceCell::new(),
        }
    }

    async fn connected(&self) -> AppResult<&SessionManager> {
        let session = self
            .session
            .get_or_try_init(|| async {
                let addr = net::login_addr(&self.config.host, self.config.port)
                    .await
                    .map_err(|err| AppError::Transport(err.to_string()))?;
                Ok::<_, AppError>(SessionManager::new(SshParams {
                    host: self.config.host.clone(),
                    addr,
                    username: self.config.username.clone(),
                    identity_path: self.config.identity_path.clone(),
                    known_hosts_path: self.config.known_hosts_path.clone(),
                    ki_submethods: self.config.ki_submethods.clone(),
                    keepalive_secs: self.config.keepalive_secs,
                }))
            })
            .await?;
        session.ensure_connected().await.map_err(map_connect_error)?;
        Ok(session)
    }

    pub async fn shutdown(&self) {
        if let Some(session) = self.session.get() {
            session.shutdown().await;
        }
    }
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    if err
        .chain()
        .any(|cause| cause.is::<AuthenticationFailure>())
    {
        return AppError::Transport(format!("ssh authentication failed: {err}"));
    }
    AppError::Transport(format!("ssh connect failed: {err:#}"))
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::Transport(format!("ssh exec failed: {err:#}"))
}

fn map_upload_error(err: anyhow::Error) -> AppError {
    AppError::Transport(format!("sftp upload failed: {err:#}"))
}

#[async_trait]
impl RemoteExecPort for SshAdapter {
    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "exec_capture", host = %self.config.host, user = %self.config.username)
    )]
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        let session = self.connected().await?;
        let (stdout, stderr, exit_code) = session
            .exec_capture(command)
            .await
            .map_err(map_exec_error)?;
        Ok(ExecCapture {
            stdout,
            stderr,
            exit_code,
        })
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, local_path),
        fields(op = "upload", host = %self.config.host, path = %remote_path)
    )]
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        let session = self.connected().await?;
        session
            .upload_file(local_path, remote_path)
            .await
            .map_err(map_upload_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn authentication_failures_are_named_as_such() {
        let err = Err::<(), _>(anyhow::Error::new(AuthenticationFailure))
            .context("while connecting")
            .unwrap_err();
        let mapped = map_connect_error(err);
        assert!(matches!(
            mapped,
            AppError::Transport(ref message) if message.starts_with("ssh authentication failed")
        ));
    }

    #[test]
    fn other_connect_failures_keep_their_cause() {
        let err = anyhow::anyhow!("connection refused").context("SSH connect failed");
        let mapped = map_connect_error(err);
        assert!(matches!(
            mapped,
            AppError::Transport(ref message)
                if message == "ssh connect failed: SSH connect failed: connection refused"
        ));
    }
}
