// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt::Debug;

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::Hop;

/// Handle to a launched forwarding process.
pub trait ForwardProcess: Debug + Send + Sync {
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check. `Ok(None)` while the process is still
    /// running, otherwise a description of how it exited.
    fn try_exit_status(&mut self) -> AppResult<Option<String>>;
}

#[async_trait]
/// Starts background port forwards. Implementations must not wait for the
/// process to exit and must not stop it when the handle is dropped.
pub trait ForwarderPort: Send + Sync {
    async fn start(&self, hop: &Hop) -> AppResult<Box<dyn ForwardProcess>>;
}
