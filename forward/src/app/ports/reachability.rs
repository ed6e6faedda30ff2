// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

/// Decides whether a compute node can be forwarded to in a single hop.
/// The rule is configuration; the resolver only records the answer.
pub trait NodeReachabilityPort: Send + Sync {
    fn is_directly_reachable(&self, node: &str) -> bool;
}
