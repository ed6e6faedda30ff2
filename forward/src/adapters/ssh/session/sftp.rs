// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::fs as tokiofs;
use tokio::io::AsyncWriteExt;

use super::SessionManager;

impl SessionManager {
    async fn sftp(&self) -> Result<SftpSession> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH handle lost before opening SFTP"))?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    /// Replaces `remote_path` with the contents of `local_path`.
    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let content = tokiofs::read(local_path)
            .await
            .with_context(|| format!("read {}", local_path.display()))?;
        tracing::debug!(
            local = %local_path.display(),
            remote = %remote_path,
            bytes = content.len(),
            "uploading over sftp"
        );
        let sftp = self.sftp().await?;
        let flags = OpenFlags::CREATE
            .union(OpenFlags::WRITE)
            .union(OpenFlags::TRUNCATE);
        let mut file = sftp
            .open_with_flags(remote_path, flags)
            .await
            .with_context(|| format!("open remote file {remote_path}"))?;
        file.write_all(&content)
            .await
            .with_context(|| format!("write remote file {remote_path}"))?;
        file.flush().await?;
        file.shutdown().await?;
        Ok(())
    }
}
