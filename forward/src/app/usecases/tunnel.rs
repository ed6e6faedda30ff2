// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{ForwardProcess, ForwarderPort, ListenerProbePort};
use crate::app::types::{Hop, HopLaunch, NodeAllocation, StartedHop, TunnelSession, TunnelSettings};

const MAX_LISTENER_BACKOFF: Duration = Duration::from_secs(4);

/// Hops started so far, in order. Knows whether the relay master has a
/// verified listener, which the second hop depends on.
#[derive(Debug, Default)]
struct HopChain {
    hops: Vec<Hop>,
    handles: Vec<Box<dyn ForwardProcess>>,
    verified_master: Option<PathBuf>,
}

impl HopChain {
    fn started(&self) -> Vec<StartedHop> {
        self.hops
            .iter()
            .zip(self.handles.iter())
            .map(|(hop, handle)| StartedHop {
                hop: hop.clone(),
                pid: handle.id(),
            })
            .collect()
    }

    fn setup_error(&self, message: String) -> AppError {
        AppError::TunnelSetup {
            message,
            started: self.started(),
        }
    }

    fn into_session(self, local_port: u16) -> TunnelSession {
        TunnelSession {
            local_port,
            hops: self.hops,
            process_handles: self.handles,
        }
    }
}

pub struct TunnelBuilder {
    forwarder: Arc<dyn ForwarderPort>,
    probe: Arc<dyn ListenerProbePort>,
    settings: TunnelSettings,
}

impl TunnelBuilder {
    pub fn new(
        forwarder: Arc<dyn ForwarderPort>,
        probe: Arc<dyn ListenerProbePort>,
        settings: TunnelSettings,
    ) -> Self {
        Self {
            forwarder,
            probe,
            settings,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, allocation), fields(node = %allocation.node_hostname))]
    pub async fn build_tunnel(
        &self,
        allocation: &NodeAllocation,
        local_port: u16,
        remote_port: u16,
    ) -> AppResult<TunnelSession> {
        let mut chain = HopChain::default();
        if allocation.reachable_directly {
            let hop = Hop {
                listen_port: local_port,
                via_host: self.settings.login_host.clone(),
                target_host: allocation.node_hostname.clone(),
                target_port: remote_port,
                launch: HopLaunch::Direct,
            };
            self.start_hop(&mut chain, hop).await?;
            return Ok(chain.into_session(local_port));
        }

        let intermediate_port = self.settings.intermediate_port.unwrap_or(remote_port);
        let control_path = self.control_path(&allocation.job_id, local_port);
        let master = Hop {
            listen_port: local_port,
            via_host: self.settings.login_host.clone(),
            target_host: "localhost".to_string(),
            target_port: intermediate_port,
            launch: HopLaunch::Master {
                control_path: control_path.clone(),
            },
        };
        self.start_hop(&mut chain, master).await?;
        self.verify_listener(&mut chain, local_port, &control_path)
            .await?;

        let relay = Hop {
            listen_port: intermediate_port,
            via_host: self.settings.login_host.clone(),
            target_host: allocation.node_hostname.clone(),
            target_port: remote_port,
            launch: HopLaunch::ThroughMaster { control_path },
        };
        self.start_hop(&mut chain, relay).await?;
        Ok(chain.into_session(local_port))
    }

    fn control_path(&self, job_id: &str, local_port: u16) -> PathBuf {
        self.settings
            .control_dir
            .join(format!("{job_id}-{local_port}.sock"))
    }

    async fn start_hop(&self, chain: &mut HopChain, hop: Hop) -> AppResult<()> {
        if let HopLaunch::ThroughMaster { control_path } = &hop.launch {
            if chain.verified_master.as_ref() != Some(control_path) {
                return Err(AppError::TunnelSequencing(format!(
                    "relay hop {hop} needs a verified master on {}",
                    control_path.display()
                )));
            }
        }

        let mut handle = match self.forwarder.start(&hop).await {
            Ok(handle) => handle,
            Err(err) => return Err(chain.setup_error(format!("could not start hop {hop}: {err}"))),
        };
        tracing::info!(hop = %hop, pid = ?handle.id(), "started forwarding process");

        tokio::time::sleep(self.settings.grace_period).await;
        let exited = handle.try_exit_status();
        chain.hops.push(hop);
        chain.handles.push(handle);
        match exited {
            Ok(None) => Ok(()),
            Ok(Some(status)) => {
                let hop = &chain.hops[chain.hops.len() - 1];
                Err(chain.setup_error(format!("forwarding process for {hop} exited: {status}")))
            }
            Err(err) => Err(chain.setup_error(err.to_string())),
        }
    }

    /// Probes the master's local listener with doubling backoff. The hop is
    /// marked verified only once the port accepts connections.
    async fn verify_listener(
        &self,
        chain: &mut HopChain,
        port: u16,
        control_path: &std::path::Path,
    ) -> AppResult<()> {
        let attempts = self.settings.listener_retries.max(1);
        let mut backoff = self.settings.listener_backoff;
        for attempt in 1..=attempts {
            if self.probe.is_listening(port).await {
                tracing::debug!(port, attempt, "listener is ready");
                chain.verified_master = Some(control_path.to_path_buf());
                return Ok(());
            }
            if let Some(handle) = chain.handles.last_mut() {
                if let Ok(Some(status)) = handle.try_exit_status() {
                    return Err(chain.setup_error(format!(
                        "forwarding process exited before localhost:{port} was ready: {status}"
                    )));
                }
            }
            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_LISTENER_BACKOFF);
            }
        }
        Err(chain.setup_error(format!(
            "nothing is listening on localhost:{port} after {attempts} attempts"
        )))
    }
}
