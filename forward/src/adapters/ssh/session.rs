// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use tokio::sync::Mutex;

mod auth;
mod exec;
mod sftp;

#[derive(Clone, Debug)]
pub(super) struct ClientHandler {
    host: String,
    addr: SocketAddr,
    known_hosts_path: Option<PathBuf>,
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        verify_server_key(
            &self.host,
            self.addr,
            server_public_key,
            self.known_hosts_path.as_deref(),
        )
    }
}

#[derive(Clone, Debug)]
pub(super) struct SshParams {
    /// Hostname as configured; used for known_hosts lookups.
    pub host: String,
    pub addr: SocketAddr,
    pub username: String,
    pub identity_path: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    /// Submethods hint for keyboard-interactive.
    pub ki_submethods: Option<String>,
    pub keepalive_secs: u64,
}

/// The operator's known_hosts file, or OpenSSH's default one.
#[derive(Clone, Copy)]
struct KnownHosts<'a> {
    path: Option<&'a Path>,
}

impl KnownHosts<'_> {
    fn contains(
        &self,
        host: &str,
        port: u16,
        key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, russh::keys::Error> {
        match self.path {
            Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
            None => russh::keys::check_known_hosts(host, port, key),
        }
    }

    fn learn(
        &self,
        host: &str,
        port: u16,
        key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<(), russh::keys::Error> {
        match self.path {
            Some(path) => learn_known_hosts_path(host, port, key, path),
            None => learn_known_hosts(host, port, key),
        }
    }
}

/// Accepts keys already recorded under the hostname or its address.
/// Unknown hosts are learned on first use; a changed key is rejected.
fn verify_server_key(
    host: &str,
    addr: SocketAddr,
    key: &russh::keys::ssh_key::PublicKey,
    known_hosts_path: Option<&Path>,
) -> anyhow::Result<bool> {
    let known_hosts = KnownHosts {
        path: known_hosts_path,
    };
    let port = addr.port();
    let ip_host = addr.ip().to_string();
    let mut names = vec![host];
    if ip_host != host {
        names.push(ip_host.as_str());
    }

    for name in &names {
        match known_hosts.contains(name, port, key) {
            Ok(true) => return Ok(true),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(%host, port, error = %err, "server key mismatch");
                return Err(anyhow!("server key for {host}:{port} rejected: {err}"));
            }
        }
    }

    tracing::info!(%host, port, tried = %names.join(", "), "learning new server key");
    known_hosts
        .learn(host, port, key)
        .map_err(|err| anyhow!("failed to record server key for {host}:{port}: {err}"))?;
    Ok(true)
}

/// Owns the one SSH connection used for every scheduler command.
pub(super) struct SessionManager {
    params: SshParams,
    config: Arc<Config>,
    handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
    keepalive_task_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(params: SshParams) -> Self {
        let cfg = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(params.keepalive_secs.max(1))),
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: Arc::new(Mutex::new(None)),
            keepalive_task_handle: Arc::new(Mutex::new(None)),
        }
    }

    fn handler(&self) -> ClientHandler {
        ClientHandler {
            host: self.params.host.clone(),
            addr: self.params.addr,
            known_hosts_path: self.params.known_hosts_path.clone(),
        }
    }

    pub async fn shutdown(&self) {
        if let Some(task) = self.keepalive_task_handle.lock().await.take() {
            task.abort();
        }
        let mut handle_field = self.handle.lock().await;
        if let Some(handle) = handle_field.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
    }
}
