// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use tokio::sync::watch;

use crate::adapters::cli::{Command, PortArgs};
use crate::app::errors::AppError;
use crate::app::services::reachability::NodeAllowList;
use crate::app::types::{JobName, JobSpec};
use crate::app::usecases::SessionOrchestrator;

mod adapters;
mod app;
mod config;
mod logging;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => tracing::debug!(
            path = %path.display(),
            source = source.as_str(),
            present = report.config_file_present,
            "config path"
        ),
        (Some(path), None) => tracing::debug!(
            path = %path.display(),
            present = report.config_file_present,
            "config path"
        ),
        (None, _) => tracing::debug!("no config path"),
    }
    for (key, value, source) in report.entries() {
        tracing::debug!(key, value = %value, source = source.as_str(), "config value");
    }
}

/// Overrides carried by the command line; resume only carries the port.
fn overrides(command: &Command, verbose: Option<bool>) -> config::Overrides {
    match command {
        Command::Start(args) => config::Overrides {
            partition: args.partition.clone(),
            gpus: args.gpus,
            cpus: args.cpus,
            memory: args.mem.clone(),
            time: args.time.clone(),
            port: args.ports.port,
            verbose,
        },
        Command::Resume(args) => config::Overrides {
            port: args.ports.port,
            verbose,
            ..Default::default()
        },
    }
}

fn job_spec(
    name: &JobName,
    ports: &PortArgs,
    extra_args: Vec<String>,
    defaults: &config::JobDefaults,
) -> JobSpec {
    JobSpec {
        name: name.clone(),
        partition: defaults.partition.clone(),
        gpu_count: defaults.gpus,
        cpu_count: defaults.cpus,
        memory: defaults.memory.clone(),
        wall_time: defaults.time.clone(),
        forward_port: defaults.port,
        script_path: ports
            .script
            .clone()
            .unwrap_or_else(|| name.as_str().to_string()),
        extra_args,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config.clone(),
        overrides(&opts.command, parsed.verbose_override),
    )?;
    logging::init(config.verbose);
    log_config_report(&report);
    config::ensure_state_dir(&config.session.state_dir)?;

    let ssh = Arc::new(adapters::ssh::SshAdapter::new(config.ssh_config()));
    let forwarder = adapters::process::OpenSshForwarder::new(
        config.session.ssh_binary.clone(),
        config.session.state_dir.clone(),
    )
    .with_login_port(config.cluster.port)
    .with_identity(config.cluster.identity_path.clone())
    .with_known_hosts(config.cluster.known_hosts_path.clone())
    .with_options(config.session.ssh_options.clone());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        ssh.clone(),
        Arc::new(forwarder),
        Arc::new(adapters::network::ListenerProbe::new()),
        Arc::new(NodeAllowList::new(&config.cluster.direct_node_prefixes)),
        Arc::new(adapters::terminal::StdoutConsole::new()),
        config.session_settings(),
    ));

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    let interrupted = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::debug!("interrupt received");
        let _ = cancel_tx.send(true);
        // Stages that never poll the flag still honour a second Ctrl-C.
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted.report_interrupt();
            eprintln!("error: {}", AppError::Interrupted);
            std::process::exit(AppError::Interrupted.exit_code());
        }
    });

    let result = match opts.command {
        Command::Start(args) => {
            let local_port = args.ports.local_port.unwrap_or(config.defaults.port);
            let spec = job_spec(&args.name, &args.ports, args.args, &config.defaults);
            orchestrator.start(&spec, local_port, &mut cancel_rx).await
        }
        Command::Resume(args) => {
            let local_port = args.ports.local_port.unwrap_or(config.defaults.port);
            let spec = job_spec(&args.name, &args.ports, Vec::new(), &config.defaults);
            orchestrator.resume(&spec, local_port, &mut cancel_rx).await
        }
    };
    ssh.shutdown().await;

    match result {
        Ok(session) => {
            tracing::debug!(
                job = %session.job.remote_job_id,
                node = %session.allocation.node_hostname,
                hops = session.tunnel.hops.len(),
                "session ready"
            );
            Ok(())
        }
        Err(err) => {
            tracing::debug!(code = err.code(), error = %err, "session failed");
            eprintln!("error: {err}");
            std::process::exit(err.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cli::Opts;
    use clap::Parser;

    fn defaults() -> config::JobDefaults {
        config::JobDefaults {
            partition: "normal".into(),
            gpus: 0,
            cpus: 2,
            memory: "8G".into(),
            time: "01:00:00".into(),
            port: 8888,
        }
    }

    #[test]
    fn script_defaults_to_the_job_name() {
        let name: JobName = "jupyter".parse().unwrap();
        let spec = job_spec(&name, &PortArgs::default(), vec!["--lab".into()], &defaults());
        assert_eq!(spec.script_path, "jupyter");
        assert_eq!(spec.forward_port, 8888);
        assert_eq!(spec.cpu_count, 2);
        assert_eq!(spec.extra_args, vec!["--lab".to_string()]);
    }

    #[test]
    fn explicit_script_wins() {
        let name: JobName = "nb1".parse().unwrap();
        let ports = PortArgs {
            script: Some("tensorboard".into()),
            ..PortArgs::default()
        };
        assert_eq!(
            job_spec(&name, &ports, Vec::new(), &defaults()).script_path,
            "tensorboard"
        );
    }

    #[test]
    fn start_flags_become_overrides() {
        let opts = Opts::try_parse_from([
            "forward", "start", "nb1", "-p", "gpu", "-g", "1", "--port", "9999",
        ])
        .unwrap();
        let overrides = overrides(&opts.command, Some(true));
        assert_eq!(overrides.partition.as_deref(), Some("gpu"));
        assert_eq!(overrides.gpus, Some(1));
        assert_eq!(overrides.port, Some(9999));
        assert_eq!(overrides.verbose, Some(true));
        assert!(overrides.memory.is_none());
    }

    #[test]
    fn resume_only_overrides_the_port() {
        let opts = Opts::try_parse_from(["forward", "resume", "nb1", "--port", "7000"]).unwrap();
        let overrides = overrides(&opts.command, None);
        assert_eq!(overrides.port, Some(7000));
        assert!(overrides.partition.is_none());
        assert!(overrides.verbose.is_none());
    }
}
