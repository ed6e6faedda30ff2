// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

#[async_trait]
pub trait ListenerProbePort: Send + Sync {
    /// True when something accepts TCP connections on `127.0.0.1:port`.
    async fn is_listening(&self, port: u16) -> bool;
}
