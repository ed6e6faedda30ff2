// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod console;
pub mod forwarder;
pub mod listener_probe;
pub mod reachability;
pub mod remote_exec;

pub use console::ConsolePort;
pub use forwarder::{ForwardProcess, ForwarderPort};
pub use listener_probe::ListenerProbePort;
pub use reachability::NodeReachabilityPort;
pub use remote_exec::{ExecCapture, RemoteExecPort};
