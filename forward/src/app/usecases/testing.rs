// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory port implementations shared by the use case tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    ConsolePort, ExecCapture, ForwardProcess, ForwarderPort, ListenerProbePort, RemoteExecPort,
};
use crate::app::types::{
    Hop, JobSpec, RegistrySettings, ResolveSettings, SessionSettings, SubmitSettings,
    TunnelSettings,
};

pub fn ok(stdout: &str) -> AppResult<ExecCapture> {
    Ok(ExecCapture {
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
        exit_code: 0,
    })
}

pub fn failed(exit_code: i32, stderr: &str) -> AppResult<ExecCapture> {
    Ok(ExecCapture {
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
        exit_code,
    })
}

/// Replays canned results; every command must match the next expectation.
#[derive(Default)]
pub struct SequencedRemoteExec {
    captures: Mutex<VecDeque<(String, AppResult<ExecCapture>)>>,
    commands: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(PathBuf, String)>>,
    upload_error: Option<AppError>,
}

impl SequencedRemoteExec {
    pub fn new(captures: Vec<(String, AppResult<ExecCapture>)>) -> Self {
        Self {
            captures: Mutex::new(VecDeque::from(captures)),
            ..Self::default()
        }
    }

    pub fn with_upload_error(mut self, err: AppError) -> Self {
        self.upload_error = Some(err);
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.captures.lock().expect("captures lock").len()
    }
}

#[async_trait]
impl RemoteExecPort for SequencedRemoteExec {
    async fn exec_capture(&self, command: &str) -> AppResult<ExecCapture> {
        self.commands
            .lock()
            .expect("commands lock")
            .push(command.to_string());
        let mut captures = self.captures.lock().expect("captures lock");
        let Some((expected, result)) = captures.pop_front() else {
            panic!("unexpected command: {command}");
        };
        assert_eq!(command, expected);
        result
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> AppResult<()> {
        if let Some(err) = self.upload_error.clone() {
            return Err(err);
        }
        self.uploads
            .lock()
            .expect("uploads lock")
            .push((local_path.to_path_buf(), remote_path.to_string()));
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    exit: Option<String>,
}

impl ForwardProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit_status(&mut self) -> AppResult<Option<String>> {
        Ok(self.exit.clone())
    }
}

/// Records every hop it is asked to start. Processes stay alive unless an
/// exit status was queued for them.
#[derive(Default)]
pub struct RecordingForwarder {
    started: Mutex<Vec<Hop>>,
    exits: Mutex<VecDeque<Option<String>>>,
}

impl RecordingForwarder {
    pub fn with_exits(exits: Vec<Option<String>>) -> Self {
        Self {
            started: Mutex::new(Vec::new()),
            exits: Mutex::new(VecDeque::from(exits)),
        }
    }

    pub fn started(&self) -> Vec<Hop> {
        self.started.lock().expect("started lock").clone()
    }
}

#[async_trait]
impl ForwarderPort for RecordingForwarder {
    async fn start(&self, hop: &Hop) -> AppResult<Box<dyn ForwardProcess>> {
        let mut started = self.started.lock().expect("started lock");
        started.push(hop.clone());
        let exit = self
            .exits
            .lock()
            .expect("exits lock")
            .pop_front()
            .flatten();
        Ok(Box::new(FakeProcess {
            pid: 4000 + started.len() as u32,
            exit,
        }))
    }
}

/// Answers probes from a queue, then with `fallback`.
pub struct ScriptedProbe {
    answers: Mutex<VecDeque<bool>>,
    fallback: bool,
    calls: Mutex<Vec<u16>>,
}

impl ScriptedProbe {
    pub fn new(answers: Vec<bool>, fallback: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::from(answers)),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always(answer: bool) -> Self {
        Self::new(Vec::new(), answer)
    }

    pub fn calls(&self) -> Vec<u16> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl ListenerProbePort for ScriptedProbe {
    async fn is_listening(&self, port: u16) -> bool {
        self.calls.lock().expect("calls lock").push(port);
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .unwrap_or(self.fallback)
    }
}

#[derive(Default)]
pub struct RecordingConsole {
    lines: Mutex<Vec<String>>,
}

impl RecordingConsole {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("lines lock").clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl ConsolePort for RecordingConsole {
    fn info(&self, line: &str) {
        self.lines.lock().expect("lines lock").push(line.to_string());
    }

    fn warn(&self, line: &str) {
        self.lines
            .lock()
            .expect("lines lock")
            .push(format!("warning: {line}"));
    }
}

pub fn job_spec(name: &str, partition: &str) -> JobSpec {
    JobSpec {
        name: name.parse().expect("valid job name"),
        partition: partition.into(),
        gpu_count: 0,
        cpu_count: 4,
        memory: "16G".into(),
        wall_time: "02:00:00".into(),
        forward_port: 8888,
        script_path: "jupyter".into(),
        extra_args: Vec::new(),
    }
}

pub fn session_settings(script_dir: &Path, control_dir: &Path) -> SessionSettings {
    SessionSettings {
        registry: RegistrySettings {
            username: "jdoe".into(),
        },
        submit: SubmitSettings {
            cluster_name: Some("sherlock".into()),
            script_dir: script_dir.to_path_buf(),
            remote_home: Some("/home/jdoe".into()),
            workdir_name: "forward-util".into(),
            gpu_partition: "gpu".into(),
        },
        resolve: ResolveSettings {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        },
        tunnel: TunnelSettings {
            login_host: "jdoe@login.sherlock".into(),
            intermediate_port: None,
            listener_retries: 5,
            listener_backoff: Duration::from_millis(100),
            grace_period: Duration::from_millis(500),
            control_dir: control_dir.to_path_buf(),
        },
    }
}
