// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ForwardProcess, ForwarderPort};
use crate::app::types::{Hop, HopLaunch};

const DEFAULT_SSH_PORT: u16 = 22;

/// Starts each hop as a detached OpenSSH client.
#[derive(Debug, Clone)]
pub struct OpenSshForwarder {
    ssh_binary: PathBuf,
    ssh_options: Vec<String>,
    login_port: u16,
    identity_path: Option<PathBuf>,
    known_hosts_path: Option<PathBuf>,
    log_dir: PathBuf,
}

impl OpenSshForwarder {
    pub fn new(ssh_binary: PathBuf, log_dir: PathBuf) -> Self {
        Self {
            ssh_binary,
            ssh_options: Vec::new(),
            login_port: DEFAULT_SSH_PORT,
            identity_path: None,
            known_hosts_path: None,
            log_dir,
        }
    }

    pub fn with_login_port(mut self, port: u16) -> Self {
        self.login_port = port;
        self
    }

    pub fn with_identity(mut self, identity_path: Option<PathBuf>) -> Self {
        self.identity_path = identity_path;
        self
    }

    pub fn with_known_hosts(mut self, known_hosts_path: Option<PathBuf>) -> Self {
        self.known_hosts_path = known_hosts_path;
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.ssh_options = options;
        self
    }

    /// Connection flags for the login host. Relayed hops inherit them
    /// through the master connection.
    fn login_args(&self) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "ExitOnForwardFailure=yes".to_string()];
        if self.login_port != DEFAULT_SSH_PORT {
            args.push("-p".into());
            args.push(self.login_port.to_string());
        }
        if let Some(identity) = &self.identity_path {
            args.push("-i".into());
            args.push(identity.display().to_string());
        }
        if let Some(known_hosts) = &self.known_hosts_path {
            args.push("-o".into());
            args.push(format!("UserKnownHostsFile={}", known_hosts.display()));
        }
        for option in &self.ssh_options {
            args.push("-o".into());
            args.push(option.clone());
        }
        args
    }

    fn hop_args(&self, hop: &Hop) -> Vec<String> {
        let mut args = self.login_args();
        match &hop.launch {
            HopLaunch::Direct => {
                args.extend(["-N".into(), "-L".into(), local_forward(hop)]);
                args.push(hop.via_host.clone());
            }
            HopLaunch::Master { control_path } => {
                args.extend([
                    "-M".into(),
                    "-S".into(),
                    control_path.display().to_string(),
                    "-N".into(),
                    "-L".into(),
                    local_forward(hop),
                ]);
                args.push(hop.via_host.clone());
            }
            HopLaunch::ThroughMaster { control_path } => {
                args.extend([
                    "-S".into(),
                    control_path.display().to_string(),
                    hop.via_host.clone(),
                    "ssh".into(),
                    "-o".into(),
                    "ExitOnForwardFailure=yes".into(),
                    "-N".into(),
                    "-L".into(),
                    format!("{}:localhost:{}", hop.listen_port, hop.target_port),
                    hop.target_host.clone(),
                ]);
            }
        }
        args
    }

    fn log_path(&self, hop: &Hop) -> PathBuf {
        let role = match hop.launch {
            HopLaunch::Direct => "direct",
            HopLaunch::Master { .. } => "master",
            HopLaunch::ThroughMaster { .. } => "relay",
        };
        self.log_dir.join(format!(
            "{role}-{}-{}.log",
            hop.listen_port,
            file_safe(&hop.target_host)
        ))
    }
}

fn local_forward(hop: &Hop) -> String {
    format!("{}:{}:{}", hop.listen_port, hop.target_host, hop.target_port)
}

fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn open_log(path: &Path) -> AppResult<std::fs::File> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|err| {
            AppError::LocalIo(format!("cannot open hop log {}: {err}", path.display()))
        })?;
    Ok(file.into_std().await)
}

#[async_trait]
impl ForwarderPort for OpenSshForwarder {
    async fn start(&self, hop: &Hop) -> AppResult<Box<dyn ForwardProcess>> {
        let log_path = self.log_path(hop);
        let log = open_log(&log_path).await?;
        let args = self.hop_args(hop);
        tracing::debug!(
            binary = %self.ssh_binary.display(),
            args = ?args,
            log = %log_path.display(),
            "spawning forwarding process"
        );

        let mut cmd = Command::new(&self.ssh_binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .kill_on_drop(false);
        // Own process group: a terminal Ctrl-C must not reach the tunnel.
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|err| {
            AppError::LocalIo(format!(
                "failed to run {}: {err}",
                self.ssh_binary.display()
            ))
        })?;
        Ok(Box::new(SshProcess { child, log_path }))
    }
}

#[derive(Debug)]
struct SshProcess {
    child: Child,
    log_path: PathBuf,
}

impl ForwardProcess for SshProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_exit_status(&mut self) -> AppResult<Option<String>> {
        match self.child.try_wait() {
            Ok(None) => Ok(None),
            Ok(Some(status)) => Ok(Some(format!(
                "{status} (see {})",
                self.log_path.display()
            ))),
            Err(err) => Err(AppError::LocalIo(format!(
                "cannot query forwarding process: {err}"
            ))),
        }
    }
}
