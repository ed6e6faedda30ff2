// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::app::types::{
    RegistrySettings, ResolveSettings, SessionSettings, SshConfig, SubmitSettings, TunnelSettings,
};

const APP_DIR_NAME: &str = "forward";
const CONFIG_FILE_NAME: &str = "forward.toml";
const CONFIG_ENV_VAR: &str = "FORWARD_CONFIG_PATH";
const USER_ENV_VAR: &str = "USER";
const SCRIPTS_DIR_NAME: &str = "scripts";

const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_KEEPALIVE_SECS: u64 = 30;
const DEFAULT_WORKDIR_NAME: &str = "forward-util";
const DEFAULT_PARTITION: &str = "normal";
const DEFAULT_GPUS: u32 = 0;
const DEFAULT_CPUS: u32 = 1;
const DEFAULT_MEMORY: &str = "4G";
const DEFAULT_TIME: &str = "01:00:00";
const DEFAULT_FORWARD_PORT: u16 = 8888;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_ALLOCATION_TIMEOUT_SECS: u64 = 600;
const DEFAULT_GPU_PARTITION: &str = "gpu";
const DEFAULT_LISTENER_RETRIES: u32 = 10;
const DEFAULT_LISTENER_BACKOFF_MS: u64 = 250;
const DEFAULT_GRACE_PERIOD_MS: u64 = 1000;
const DEFAULT_SSH_BINARY: &str = "ssh";
const DEFAULT_IDENTITY_FILES: [&str; 3] = ["~/.ssh/id_ed25519", "~/.ssh/id_ecdsa", "~/.ssh/id_rsa"];

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    #[serde(default)]
    cluster: ClusterSection,
    #[serde(default)]
    defaults: DefaultsSection,
    #[serde(default)]
    session: SessionSection,
    verbose: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ClusterSection {
    name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    identity_path: Option<String>,
    known_hosts_path: Option<String>,
    keepalive_secs: Option<u64>,
    remote_home: Option<String>,
    workdir_name: Option<String>,
    direct_node_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct DefaultsSection {
    partition: Option<String>,
    gpus: Option<u32>,
    cpus: Option<u32>,
    memory: Option<String>,
    time: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionSection {
    poll_interval_secs: Option<u64>,
    allocation_timeout_secs: Option<u64>,
    gpu_partition: Option<String>,
    script_dir: Option<String>,
    intermediate_port: Option<u16>,
    listener_retries: Option<u32>,
    listener_backoff_ms: Option<u64>,
    grace_period_ms: Option<u64>,
    ssh_binary: Option<String>,
    ssh_options: Option<Vec<String>>,
    state_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub name: Option<String>,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub identity_path: Option<PathBuf>,
    pub known_hosts_path: Option<PathBuf>,
    pub keepalive_secs: u64,
    pub remote_home: Option<String>,
    pub workdir_name: String,
    pub direct_node_prefixes: Vec<String>,
}

/// Resource defaults applied when the command line leaves a value out.
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub partition: String,
    pub gpus: u32,
    pub cpus: u32,
    pub memory: String,
    pub time: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval_secs: u64,
    pub allocation_timeout_secs: u64,
    pub gpu_partition: String,
    pub script_dir: PathBuf,
    pub intermediate_port: Option<u16>,
    pub listener_retries: u32,
    pub listener_backoff_ms: u64,
    pub grace_period_ms: u64,
    pub ssh_binary: PathBuf,
    pub ssh_options: Vec<String>,
    pub state_dir: PathBuf,
}

#[derive(Debug)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub defaults: JobDefaults,
    pub session: SessionConfig,
    pub verbose: bool,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

impl Config {
    pub fn ssh_config(&self) -> SshConfig {
        SshConfig {
            host: self.cluster.host.clone(),
            port: self.cluster.port,
            username: self.cluster.username.clone(),
            identity_path: self
                .cluster
                .identity_path
                .as_ref()
                .map(|path| path.to_string_lossy().into_owned()),
            known_hosts_path: self.cluster.known_hosts_path.clone(),
            ki_submethods: None,
            keepalive_secs: self.cluster.keepalive_secs,
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            registry: RegistrySettings {
                username: self.cluster.username.clone(),
            },
            submit: SubmitSettings {
                cluster_name: self.cluster.name.clone(),
                script_dir: self.session.script_dir.clone(),
                remote_home: self.cluster.remote_home.clone(),
                workdir_name: self.cluster.workdir_name.clone(),
                gpu_partition: self.session.gpu_partition.clone(),
            },
            resolve: ResolveSettings {
                poll_interval: Duration::from_secs(self.session.poll_interval_secs),
                timeout: Duration::from_secs(self.session.allocation_timeout_secs),
            },
            tunnel: TunnelSettings {
                login_host: self.ssh_config().destination(),
                intermediate_port: self.session.intermediate_port,
                listener_retries: self.session.listener_retries,
                listener_backoff: Duration::from_millis(self.session.listener_backoff_ms),
                grace_period: Duration::from_millis(self.session.grace_period_ms),
                control_dir: self.session.state_dir.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub username: ConfigValue<String>,
    pub partition: ConfigValue<String>,
    pub gpus: ConfigValue<u32>,
    pub cpus: ConfigValue<u32>,
    pub memory: ConfigValue<String>,
    pub time: ConfigValue<String>,
    pub port: ConfigValue<u16>,
    pub verbose: ConfigValue<bool>,
}

impl ConfigReport {
    /// `(key, value, source)` for every tracked key, in a stable order.
    pub fn entries(&self) -> Vec<(&'static str, String, ConfigSource)> {
        vec![
            ("cluster.username", self.username.value.clone(), self.username.source),
            ("defaults.partition", self.partition.value.clone(), self.partition.source),
            ("defaults.gpus", self.gpus.value.to_string(), self.gpus.source),
            ("defaults.cpus", self.cpus.value.to_string(), self.cpus.source),
            ("defaults.memory", self.memory.value.clone(), self.memory.source),
            ("defaults.time", self.time.value.clone(), self.time.source),
            ("defaults.port", self.port.value.to_string(), self.port.source),
            ("verbose", self.verbose.value.to_string(), self.verbose.source),
        ]
    }
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub partition: Option<String>,
    pub gpus: Option<u32>,
    pub cpus: Option<u32>,
    pub memory: Option<String>,
    pub time: Option<String>,
    pub port: Option<u16>,
    pub verbose: Option<bool>,
}

#[cfg(test)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

fn pick<T>(over: Option<T>, file: Option<T>, default: impl FnOnce() -> T) -> ConfigValue<T> {
    match (over, file) {
        (Some(value), _) => ConfigValue {
            value,
            source: ConfigSource::Override,
        },
        (None, Some(value)) => ConfigValue {
            value,
            source: ConfigSource::ConfigFile,
        },
        (None, None) => ConfigValue {
            value: default(),
            source: ConfigSource::Default,
        },
    }
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());
    let FileConfig {
        cluster: file_cluster,
        defaults: file_defaults,
        session: file_session,
        verbose: file_verbose,
    } = file_config;

    let host = file_cluster
        .host
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .context("cluster.host is not set; add it to the [cluster] section of the config file")?;
    let username = match file_cluster.username {
        Some(username) => ConfigValue {
            value: username,
            source: ConfigSource::ConfigFile,
        },
        None => ConfigValue {
            value: std::env::var(USER_ENV_VAR).with_context(|| {
                "cluster.username is not set and $USER is unavailable"
            })?,
            source: ConfigSource::Env,
        },
    };
    let ssh_port = file_cluster.port.unwrap_or(DEFAULT_SSH_PORT);
    if ssh_port == 0 {
        anyhow::bail!("cluster.port must be between 1 and 65535");
    }
    let identity_path = match file_cluster.identity_path {
        Some(raw) => Some(resolve_path(&raw, base_dir)),
        None => default_identity_path(),
    };

    let partition = pick(overrides.partition, file_defaults.partition, || {
        DEFAULT_PARTITION.to_string()
    });
    let gpus = pick(overrides.gpus, file_defaults.gpus, || DEFAULT_GPUS);
    let cpus = pick(overrides.cpus, file_defaults.cpus, || DEFAULT_CPUS);
    if cpus.value == 0 {
        anyhow::bail!("cpus must be at least 1");
    }
    let memory = pick(overrides.memory, file_defaults.memory, || {
        DEFAULT_MEMORY.to_string()
    });
    let time = pick(overrides.time, file_defaults.time, || DEFAULT_TIME.to_string());
    let port = pick(overrides.port, file_defaults.port, || DEFAULT_FORWARD_PORT);
    if port.value == 0 {
        anyhow::bail!("port must be between 1 and 65535");
    }
    let verbose = pick(overrides.verbose, file_verbose, || false);

    let poll_interval_secs = file_session
        .poll_interval_secs
        .unwrap_or(DEFAULT_POLL_INTERVAL_SECS);
    if poll_interval_secs == 0 {
        anyhow::bail!("session.poll_interval_secs must be at least 1");
    }
    if file_session.intermediate_port == Some(0) {
        anyhow::bail!("session.intermediate_port must be between 1 and 65535");
    }
    let script_dir = match file_session.script_dir {
        Some(raw) => resolve_path(&raw, base_dir),
        None => default_config_dir()
            .map(|dir| dir.join(SCRIPTS_DIR_NAME))
            .unwrap_or_else(|_| PathBuf::from(SCRIPTS_DIR_NAME)),
    };
    let state_dir = match file_session.state_dir {
        Some(raw) => resolve_path(&raw, base_dir),
        None => default_state_dir(),
    };

    let config = Config {
        cluster: ClusterConfig {
            name: file_cluster.name.filter(|name| !name.trim().is_empty()),
            host,
            port: ssh_port,
            username: username.value.clone(),
            identity_path,
            known_hosts_path: file_cluster
                .known_hosts_path
                .map(|raw| resolve_path(&raw, base_dir)),
            keepalive_secs: file_cluster.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
            remote_home: file_cluster.remote_home,
            workdir_name: file_cluster
                .workdir_name
                .unwrap_or_else(|| DEFAULT_WORKDIR_NAME.to_string()),
            direct_node_prefixes: file_cluster.direct_node_prefixes.unwrap_or_default(),
        },
        defaults: JobDefaults {
            partition: partition.value.clone(),
            gpus: gpus.value,
            cpus: cpus.value,
            memory: memory.value.clone(),
            time: time.value.clone(),
            port: port.value,
        },
        session: SessionConfig {
            poll_interval_secs,
            allocation_timeout_secs: file_session
                .allocation_timeout_secs
                .unwrap_or(DEFAULT_ALLOCATION_TIMEOUT_SECS),
            gpu_partition: file_session
                .gpu_partition
                .unwrap_or_else(|| DEFAULT_GPU_PARTITION.to_string()),
            script_dir,
            intermediate_port: file_session.intermediate_port,
            listener_retries: file_session
                .listener_retries
                .unwrap_or(DEFAULT_LISTENER_RETRIES),
            listener_backoff_ms: file_session
                .listener_backoff_ms
                .unwrap_or(DEFAULT_LISTENER_BACKOFF_MS),
            grace_period_ms: file_session
                .grace_period_ms
                .unwrap_or(DEFAULT_GRACE_PERIOD_MS),
            ssh_binary: PathBuf::from(
                file_session
                    .ssh_binary
                    .map(|raw| shellexpand::tilde(&raw).into_owned())
                    .unwrap_or_else(|| DEFAULT_SSH_BINARY.to_string()),
            ),
            ssh_options: file_session.ssh_options.unwrap_or_default(),
            state_dir,
        },
        verbose: verbose.value,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        username,
        partition,
        gpus,
        cpus,
        memory,
        time,
        port,
        verbose,
    };

    Ok(LoadResult { config, report })
}

/// Creates the local state directory for hop logs and control sockets.
pub fn ensure_state_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create state directory {}", path.display()))
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_identity_path() -> Option<PathBuf> {
    DEFAULT_IDENTITY_FILES
        .iter()
        .map(|raw| PathBuf::from(shellexpand::tilde(raw).as_ref()))
        .find(|path| path.is_file())
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}
