// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::ports::ListenerProbePort;

pub mod net;
mod reachability;

/// Probes local TCP listeners, used for the port preflight and to confirm
/// that the first forwarding hop is bound.
#[derive(Clone, Default)]
pub struct ListenerProbe;

impl ListenerProbe {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ListenerProbePort for ListenerProbe {
    async fn is_listening(&self, port: u16) -> bool {
        let listening = reachability::is_local_port_listening(port).await;
        tracing::trace!(port, listening, "probed local listener");
        listening
    }
}
