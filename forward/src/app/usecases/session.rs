// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use tokio::sync::watch;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{
    ConsolePort, ForwarderPort, ListenerProbePort, NodeReachabilityPort, RemoteExecPort,
};
use crate::app::types::{JobSpec, SessionReport, SessionSettings, SubmittedJob};

use super::{JobRegistry, JobSubmitter, NodeResolver, TunnelBuilder};

/// Runs one invocation end to end: registry check, submission, node
/// resolution and tunnel construction, strictly in that order.
pub struct SessionOrchestrator {
    registry: JobRegistry,
    submitter: JobSubmitter,
    resolver: NodeResolver,
    tunnels: TunnelBuilder,
    probe: Arc<dyn ListenerProbePort>,
    console: Arc<dyn ConsolePort>,
    active_job: watch::Sender<Option<SubmittedJob>>,
}

impl SessionOrchestrator {
    pub fn new(
        remote: Arc<dyn RemoteExecPort>,
        forwarder: Arc<dyn ForwarderPort>,
        probe: Arc<dyn ListenerProbePort>,
        reachability: Arc<dyn NodeReachabilityPort>,
        console: Arc<dyn ConsolePort>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            registry: JobRegistry::new(remote.clone(), settings.registry),
            submitter: JobSubmitter::new(remote.clone(), settings.submit),
            resolver: NodeResolver::new(remote, reachability, settings.resolve),
            tunnels: TunnelBuilder::new(forwarder, probe.clone(), settings.tunnel),
            probe,
            console,
            active_job: watch::Sender::new(None),
        }
    }

    /// Prints the log paths of the job being connected to, if one exists.
    /// Used when a forced interrupt ends the process mid-stage.
    pub fn report_interrupt(&self) {
        if let Some(job) = self.active_job.borrow().as_ref() {
            self.report_logs(job);
        }
    }

    #[tracing::instrument(level = "debug", skip(self, spec, cancel), fields(job = %spec.name))]
    pub async fn start(
        &self,
        spec: &JobSpec,
        local_port: u16,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<SessionReport> {
        self.registry.check_previous_submit(&spec.name).await?;
        self.ensure_port_free(local_port).await?;

        let job = self.submitter.submit(spec).await?;
        self.console.info(&format!(
            "Submitted job {} ({})",
            job.remote_job_id, job.spec.name
        ));
        self.connect(job, local_port, cancel).await
    }

    /// Re-attaches to a job of this name that is already queued or running.
    #[tracing::instrument(level = "debug", skip(self, spec, cancel), fields(job = %spec.name))]
    pub async fn resume(
        &self,
        spec: &JobSpec,
        local_port: u16,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<SessionReport> {
        let Some(existing) = self.registry.find_job(&spec.name).await? else {
            return Err(AppError::JobNotFound(spec.name.to_string()));
        };
        self.ensure_port_free(local_port).await?;

        let job = self.submitter.reattach(spec, &existing.job_id).await?;
        self.console.info(&format!(
            "Found job {} ({}) in state {}",
            job.remote_job_id, job.spec.name, existing.state
        ));
        self.connect(job, local_port, cancel).await
    }

    async fn connect(
        &self,
        job: SubmittedJob,
        local_port: u16,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<SessionReport> {
        self.active_job.send_replace(Some(job.clone()));
        match self.resolve_and_forward(job, local_port, cancel).await {
            Ok(report) => {
                self.report_success(&report);
                Ok(report)
            }
            Err((job, err)) => {
                self.report_failure(&job, &err);
                Err(err)
            }
        }
    }

    async fn resolve_and_forward(
        &self,
        job: SubmittedJob,
        local_port: u16,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<SessionReport, (SubmittedJob, AppError)> {
        self.console.info(&format!(
            "Waiting for job {} to start...",
            job.remote_job_id
        ));
        let allocation = match self.resolver.resolve_node(&job, cancel).await {
            Ok(allocation) => allocation,
            Err(err) => return Err((job, err)),
        };
        self.console.info(&format!(
            "Job {} is running on {}",
            allocation.job_id, allocation.node_hostname
        ));

        let tunnel = match self
            .tunnels
            .build_tunnel(&allocation, local_port, job.spec.forward_port)
            .await
        {
            Ok(tunnel) => tunnel,
            Err(err) => return Err((job, err)),
        };
        let url = tunnel.url();
        Ok(SessionReport {
            job,
            allocation,
            tunnel,
            url,
        })
    }

    async fn ensure_port_free(&self, local_port: u16) -> AppResult<()> {
        if self.probe.is_listening(local_port).await {
            return Err(AppError::InvalidArgument(format!(
                "local port {local_port} is already in use; choose another with --local-port"
            )));
        }
        Ok(())
    }

    fn report_success(&self, report: &SessionReport) {
        self.console
            .info(&format!("Node: {}", report.allocation.node_hostname));
        for hop in report.tunnel.started_hops() {
            self.console.info(&format!("Tunnel: {hop}"));
        }
        self.report_logs(&report.job);
        self.console.info(&format!("Open {}", report.url));
    }

    fn report_failure(&self, job: &SubmittedJob, err: &AppError) {
        if let AppError::TunnelSetup { started, .. } = err {
            for hop in started {
                self.console
                    .warn(&format!("forwarding process left running: {hop}"));
            }
        }
        self.report_logs(job);
    }

    fn report_logs(&self, job: &SubmittedJob) {
        self.console.info(&format!("Job output: {}", job.stdout_path));
        self.console.info(&format!("Job errors: {}", job.stderr_path));
    }
}
