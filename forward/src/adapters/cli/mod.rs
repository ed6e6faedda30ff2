// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::PathBuf;

use clap::{Args, CommandFactory, FromArgMatches, Parser, Subcommand};

use crate::app::types::{JobName, JobNameError};

#[derive(Parser, Debug)]
#[command(
    name = "forward",
    version,
    about = "Submit a SLURM job and forward a local port to the service it starts",
    long_about = None,
    after_help = "Configuration precedence: defaults < config file < command-line flags.\n\
Config path precedence: defaults < FORWARD_CONFIG_PATH < command-line flags.\n\
If --config is omitted, forward tries FORWARD_CONFIG_PATH, then the default config file location; missing default config is OK.\n\
Paths in the config file are resolved relative to the config file directory."
)]
pub struct Opts {
    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Path to a TOML config file. When omitted, forward uses FORWARD_CONFIG_PATH if set, otherwise the default config file location if available."
    )]
    pub config: Option<PathBuf>,
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::SetTrue,
        help = "Enable debug logging. Overrides `verbose` from the config file."
    )]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a job and forward a local port to it once it runs.
    Start(StartArgs),
    /// Forward a local port to a job of this name that is already queued or running.
    Resume(ResumeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct PortArgs {
    #[arg(
        long,
        value_name = "PORT",
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Port the job's service listens on. Overrides `defaults.port` from the config file."
    )]
    pub port: Option<u16>,
    #[arg(
        long,
        value_name = "PORT",
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Local port to forward. Defaults to the service port."
    )]
    pub local_port: Option<u16>,
    #[arg(
        long,
        value_name = "SCRIPT",
        help = "Job script name or path. Names are looked up as <name>.sbatch in the script directory. Defaults to the job name."
    )]
    pub script: Option<String>,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    #[arg(value_name = "NAME", value_parser = parse_job_name)]
    pub name: JobName,
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Extra arguments passed to the job script after the port."
    )]
    pub args: Vec<String>,
    #[command(flatten)]
    pub ports: PortArgs,
    #[arg(short, long, value_name = "PARTITION")]
    pub partition: Option<String>,
    #[arg(short, long, value_name = "COUNT")]
    pub gpus: Option<u32>,
    #[arg(short, long, value_name = "COUNT")]
    pub cpus: Option<u32>,
    #[arg(short, long, value_name = "SIZE", help = "Memory per node, e.g. 16G.")]
    pub mem: Option<String>,
    #[arg(short, long, value_name = "TIME", help = "Wall time, e.g. 02:00:00.")]
    pub time: Option<String>,
}

#[derive(Args, Debug)]
pub struct ResumeArgs {
    #[arg(value_name = "NAME", value_parser = parse_job_name)]
    pub name: JobName,
    #[command(flatten)]
    pub ports: PortArgs,
}

fn parse_job_name(value: &str) -> Result<JobName, JobNameError> {
    value.parse()
}

pub struct ParsedOpts {
    pub opts: Opts,
    pub verbose_override: Option<bool>,
}

pub fn cli_command() -> clap::Command {
    Opts::command()
}

pub fn parse_opts() -> ParsedOpts {
    let matches = cli_command().get_matches();
    let verbose_override = if matches.get_flag("verbose") {
        Some(true)
    } else {
        None
    };
    let opts = Opts::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    ParsedOpts {
        opts,
        verbose_override,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        cli_command().debug_assert();
    }

    #[test]
    fn start_collects_resources_and_script_arguments() {
        let opts = Opts::try_parse_from([
            "forward", "-v", "start", "nb1", "-p", "gpu", "-c", "4", "-m", "16G", "-t",
            "02:00:00", "--port", "8888", "--", "--lab", "notebooks",
        ])
        .unwrap();
        assert!(opts.verbose);
        let Command::Start(start) = opts.command else {
            panic!("expected start");
        };
        assert_eq!(start.name.as_str(), "nb1");
        assert_eq!(start.partition.as_deref(), Some("gpu"));
        assert_eq!(start.cpus, Some(4));
        assert_eq!(start.mem.as_deref(), Some("16G"));
        assert_eq!(start.time.as_deref(), Some("02:00:00"));
        assert_eq!(start.ports.port, Some(8888));
        assert_eq!(start.args, vec!["--lab".to_string(), "notebooks".to_string()]);
        assert!(start.gpus.is_none());
    }

    #[test]
    fn invalid_job_name_is_a_usage_error() {
        let err = Opts::try_parse_from(["forward", "start", "../etc"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn port_zero_is_a_usage_error() {
        for flag in ["--local-port", "--port"] {
            let err = Opts::try_parse_from(["forward", "start", "nb1", flag, "0"]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
            assert_eq!(err.exit_code(), 2);
        }
        let opts = Opts::try_parse_from(["forward", "resume", "nb1", "--local-port", "1"]).unwrap();
        let Command::Resume(resume) = opts.command else {
            panic!("expected resume");
        };
        assert_eq!(resume.ports.local_port, Some(1));
    }

    #[test]
    fn missing_job_name_is_a_usage_error() {
        let err = Opts::try_parse_from(["forward", "resume"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn resume_accepts_global_config_after_subcommand() {
        let opts = Opts::try_parse_from([
            "forward", "resume", "nb1", "--config", "/tmp/f.toml", "--local-port", "9000",
        ])
        .unwrap();
        assert_eq!(opts.config, Some(PathBuf::from("/tmp/f.toml")));
        let Command::Resume(resume) = opts.command else {
            panic!("expected resume");
        };
        assert_eq!(resume.ports.local_port, Some(9000));
    }
}
