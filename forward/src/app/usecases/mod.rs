// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

mod registry;
mod resolve;
mod session;
mod submit;
mod tunnel;

#[cfg(test)]
pub(crate) mod testing;

pub use registry::JobRegistry;
pub use resolve::NodeResolver;
pub use session::SessionOrchestrator;
pub use submit::JobSubmitter;
pub use tunnel::TunnelBuilder;
