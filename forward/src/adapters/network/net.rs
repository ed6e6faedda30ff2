// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::{io, net::SocketAddr};
use thiserror::Error as ThisError;
use tokio::net::lookup_host;

#[derive(ThisError, Debug)]
pub enum NetError {
    #[error("DNS name not found for {0}")]
    DnsNotFound(String),

    #[error("couldn't resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    #[error("no addresses resolved from {0}")]
    NoAddrs(String),
}

/// First address for the login host, preferring IPv4 when both families
/// resolve, since cluster login nodes are frequently IPv4-only.
pub async fn login_addr(host: &str, port: u16) -> Result<SocketAddr, NetError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => NetError::DnsNotFound(host.to_owned()),
            _ => NetError::Resolve {
                host: host.to_owned(),
                source,
            },
        })?
        .collect();
    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| NetError::NoAddrs(host.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_address_keeps_the_port() {
        let addr = login_addr("127.0.0.1", 2222)
            .await
            .expect("literal address should resolve");
        assert_eq!(addr.port(), 2222);
        assert!(addr.ip().is_loopback());
    }

    #[tokio::test]
    async fn unknown_domain_is_an_error() {
        let host = "forward-should-not-exist.invalid";
        let err = login_addr(host, 22)
            .await
            .expect_err("invalid domain should fail");
        match err {
            NetError::DnsNotFound(value) | NetError::NoAddrs(value) => assert_eq!(value, host),
            NetError::Resolve { host: value, .. } => assert_eq!(value, host),
        }
    }
}
