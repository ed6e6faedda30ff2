// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::app::ports::ForwardProcess;

const MAX_JOB_NAME_LEN: usize = 64;

/// Job name that is safe to use as a scheduler identifier and in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobName(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNameError {
    Empty,
    TooLong(usize),
    LeadingCharacter(char),
    InvalidCharacter(char),
}

impl fmt::Display for JobNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobNameError::Empty => write!(f, "job name must not be empty"),
            JobNameError::TooLong(len) => write!(
                f,
                "job name is {len} characters long (maximum {MAX_JOB_NAME_LEN})"
            ),
            JobNameError::LeadingCharacter(c) => {
                write!(f, "job name must not start with '{c}'")
            }
            JobNameError::InvalidCharacter(c) => write!(
                f,
                "job name contains '{c}'; use letters, digits, '-', '_' or '.'"
            ),
        }
    }
}

impl std::error::Error for JobNameError {}

impl FromStr for JobName {
    type Err = JobNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(JobNameError::Empty);
        }
        if s.len() > MAX_JOB_NAME_LEN {
            return Err(JobNameError::TooLong(s.len()));
        }
        if let Some(c) = s.chars().next().filter(|c| *c == '-' || *c == '.') {
            return Err(JobNameError::LeadingCharacter(c));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(JobNameError::InvalidCharacter(c));
        }
        Ok(JobName(s.to_string()))
    }
}

impl JobName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the operator asked for; fixed for the whole invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: JobName,
    pub partition: String,
    /// 0 means "not requested".
    pub gpu_count: u32,
    pub cpu_count: u32,
    pub memory: String,
    pub wall_time: String,
    pub forward_port: u16,
    pub script_path: String,
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub spec: JobSpec,
    pub remote_job_id: String,
    pub remote_script_path: String,
    pub stdout_path: String,
    pub stderr_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAllocation {
    pub job_id: String,
    pub node_hostname: String,
    pub reachable_directly: bool,
}

/// Scheduler state as understood by the node resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Pending(String),
    Running,
    Finished(String),
    Unknown(String),
}

/// One parsed line of the scheduler's per-job status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatusRecord {
    pub job_id: String,
    pub state: SchedulerState,
    pub nodes: Vec<String>,
}

/// One parsed line of the operator's queue listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub job_id: String,
    pub name: String,
    pub state: String,
}

/// Login host used for submission and as the relay for forwarded hops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<String>,
    pub known_hosts_path: Option<PathBuf>,
    pub ki_submethods: Option<String>,
    pub keepalive_secs: u64,
}

impl SshConfig {
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopLaunch {
    /// A standalone forwarding session.
    Direct,
    /// First hop of a relay; also owns the control socket hop 2 rides on.
    Master { control_path: PathBuf },
    /// Command executed on the login host through an existing master session.
    ThroughMaster { control_path: PathBuf },
}

/// One port-forward segment: `listen_port` is bound on the near side of
/// `via_host` and traffic is delivered to `target_host:target_port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hop {
    pub listen_port: u16,
    pub via_host: String,
    pub target_host: String,
    pub target_port: u16,
    pub launch: HopLaunch,
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.launch {
            HopLaunch::ThroughMaster { .. } => write!(
                f,
                "{}:{} -> {}:{} (on {})",
                self.via_host, self.listen_port, self.target_host, self.target_port, self.via_host
            ),
            _ => write!(
                f,
                "localhost:{} -> {}:{} (via {})",
                self.listen_port, self.target_host, self.target_port, self.via_host
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedHop {
    pub hop: Hop,
    pub pid: Option<u32>,
}

impl fmt::Display for StartedHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pid {
            Some(pid) => write!(f, "{} [pid {pid}]", self.hop),
            None => write!(f, "{}", self.hop),
        }
    }
}

/// Running tunnel. Dropping it releases the handles without stopping the
/// forwarding processes.
#[derive(Debug)]
pub struct TunnelSession {
    pub local_port: u16,
    pub hops: Vec<Hop>,
    pub process_handles: Vec<Box<dyn ForwardProcess>>,
}

impl TunnelSession {
    pub fn started_hops(&self) -> Vec<StartedHop> {
        self.hops
            .iter()
            .zip(self.process_handles.iter())
            .map(|(hop, handle)| StartedHop {
                hop: hop.clone(),
                pid: handle.id(),
            })
            .collect()
    }

    pub fn url(&self) -> String {
        format!("http://localhost:{}/", self.local_port)
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub job: SubmittedJob,
    pub allocation: NodeAllocation,
    pub tunnel: TunnelSession,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySettings {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitSettings {
    pub cluster_name: Option<String>,
    pub script_dir: PathBuf,
    pub remote_home: Option<String>,
    pub workdir_name: String,
    pub gpu_partition: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    pub login_host: String,
    pub intermediate_port: Option<u16>,
    pub listener_retries: u32,
    pub listener_backoff: Duration,
    pub grace_period: Duration,
    pub control_dir: PathBuf,
}

/// Immutable settings for one invocation, handed to each component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub registry: RegistrySettings,
    pub submit: SubmitSettings,
    pub resolve: ResolveSettings,
    pub tunnel: TunnelSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_accepts_scheduler_safe_names() {
        for name in ["nb1", "jupyter-lab", "run_2.gpu", "A9"] {
            let parsed: JobName = name.parse().unwrap();
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn job_name_rejects_unsafe_names() {
        assert_eq!("".parse::<JobName>(), Err(JobNameError::Empty));
        assert_eq!(
            "-rf".parse::<JobName>(),
            Err(JobNameError::LeadingCharacter('-'))
        );
        assert_eq!(
            ".hidden".parse::<JobName>(),
            Err(JobNameError::LeadingCharacter('.'))
        );
        assert_eq!(
            "a/b".parse::<JobName>(),
            Err(JobNameError::InvalidCharacter('/'))
        );
        assert_eq!(
            "nb 1".parse::<JobName>(),
            Err(JobNameError::InvalidCharacter(' '))
        );
        let long = "x".repeat(65);
        assert_eq!(long.parse::<JobName>(), Err(JobNameError::TooLong(65)));
    }

    #[test]
    fn hop_display_distinguishes_local_and_relayed_segments() {
        let local = Hop {
            listen_port: 8888,
            via_host: "login".into(),
            target_host: "localhost".into(),
            target_port: 9000,
            launch: HopLaunch::Direct,
        };
        assert_eq!(local.to_string(), "localhost:8888 -> localhost:9000 (via login)");

        let relayed = Hop {
            listen_port: 9000,
            via_host: "login".into(),
            target_host: "gpu07".into(),
            target_port: 8888,
            launch: HopLaunch::ThroughMaster {
                control_path: PathBuf::from("/tmp/ctl"),
            },
        };
        assert_eq!(relayed.to_string(), "login:9000 -> gpu07:8888 (on login)");
    }
}
