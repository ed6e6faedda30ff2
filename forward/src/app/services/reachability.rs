// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::NodeReachabilityPort;

/// Nodes whose hostname starts with one of the configured prefixes can be
/// forwarded to straight through the login host. Everything else takes the
/// relay. An empty list means every node needs the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeAllowList {
    prefixes: Vec<String>,
}

impl NodeAllowList {
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let prefixes = prefixes
            .into_iter()
            .map(Into::into)
            .map(|p: String| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { prefixes }
    }
}

impl NodeReachabilityPort for NodeAllowList {
    fn is_directly_reachable(&self, node: &str) -> bool {
        self.prefixes.iter().any(|prefix| node.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_by_prefix_only() {
        let list = NodeAllowList::new(["sh-", "cpu"]);
        assert!(list.is_directly_reachable("sh-101-01"));
        assert!(list.is_directly_reachable("cpu12"));
        assert!(!list.is_directly_reachable("gpu07"));
        assert!(!list.is_directly_reachable("xsh-1"));
    }

    #[test]
    fn blank_prefixes_never_match() {
        let list = NodeAllowList::new(["", "  "]);
        assert!(!list.is_directly_reachable("gpu07"));
        assert!(!NodeAllowList::default().is_directly_reachable("c01"));
    }
}
