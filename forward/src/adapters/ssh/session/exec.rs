// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh::ChannelMsg;

use super::SessionManager;

const STDERR_STREAM: u32 = 1;

/// Output of one remote command as it arrives on the channel.
#[derive(Debug)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    /// Stays -1 when the server closes the channel without a status.
    exit_code: i32,
}

impl Default for Capture {
    fn default() -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: -1,
        }
    }
}

impl Capture {
    /// Returns true once the channel is closed.
    fn absorb(&mut self, msg: &ChannelMsg) -> bool {
        match msg {
            ChannelMsg::Data { data } => self.stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { data, ext } if *ext == STDERR_STREAM => {
                self.stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status } => self.exit_code = *exit_status as i32,
            ChannelMsg::Close => return true,
            _ => {}
        }
        false
    }
}

impl SessionManager {
    pub async fn exec_capture(&self, cmd: &str) -> Result<(Vec<u8>, Vec<u8>, i32)> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("no SSH connection to {}", self.params.host))?;
        let mut chan = handle
            .channel_open_session()
            .await
            .context("open session")?;
        tracing::debug!(command = %cmd, "executing");
        chan.exec(true, cmd).await.context("exec request")?;

        let mut capture = Capture::default();
        while let Some(msg) = chan.wait().await {
            if capture.absorb(&msg) {
                break;
            }
        }
        let _ = chan.close().await;
        tracing::debug!(
            exit_code = capture.exit_code,
            stdout_bytes = capture.stdout.len(),
            "command finished"
        );
        Ok((capture.stdout, capture.stderr, capture.exit_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use russh::CryptoVec;

    fn data(bytes: &[u8]) -> ChannelMsg {
        ChannelMsg::Data {
            data: CryptoVec::from_slice(bytes),
        }
    }

    fn extended(bytes: &[u8], ext: u32) -> ChannelMsg {
        ChannelMsg::ExtendedData {
            data: CryptoVec::from_slice(bytes),
            ext,
        }
    }

    #[test]
    fn streams_are_split_and_concatenated() {
        let mut capture = Capture::default();
        assert!(!capture.absorb(&data(b"12345|")));
        assert!(!capture.absorb(&data(b"RUNNING|c01")));
        assert!(!capture.absorb(&extended(b"slurm_load_jobs: warning", 1)));
        assert!(!capture.absorb(&extended(b"ignored", 2)));
        assert_eq!(capture.stdout, b"12345|RUNNING|c01");
        assert_eq!(capture.stderr, b"slurm_load_jobs: warning");
    }

    #[test]
    fn exit_status_is_kept_until_close() {
        let mut capture = Capture::default();
        assert_eq!(capture.exit_code, -1);
        assert!(!capture.absorb(&ChannelMsg::ExitStatus { exit_status: 1 }));
        assert_eq!(capture.exit_code, 1);
        assert!(!capture.absorb(&ChannelMsg::Eof));
        assert!(capture.absorb(&ChannelMsg::Close));
    }
}
