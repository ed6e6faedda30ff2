// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONNECT_TIMEOUT_MS: u64 = 500;

/// True when a TCP connection to `127.0.0.1:port` succeeds.
pub async fn is_local_port_listening(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    is_socket_reachable(addr, Duration::from_millis(CONNECT_TIMEOUT_MS)).await
}

async fn is_socket_reachable(addr: SocketAddr, timeout_duration: Duration) -> bool {
    matches!(
        timeout(timeout_duration, TcpStream::connect(addr)).await,
        Ok(Ok(_stream))
    )
}
