// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::app::errors::{AppError, AppResult};
use crate::app::ports::{NodeReachabilityPort, RemoteExecPort};
use crate::app::services::slurm;
use crate::app::types::{NodeAllocation, ResolveSettings, SchedulerState, SubmittedJob};

const UNKNOWN_STATE: &str = "UNKNOWN";

#[derive(Debug, PartialEq, Eq)]
enum Observation {
    Running(String),
    Finished(String),
    Waiting(String),
}

/// Waits for a submitted job to start and reports the node it landed on.
pub struct NodeResolver {
    remote: Arc<dyn RemoteExecPort>,
    reachability: Arc<dyn NodeReachabilityPort>,
    settings: ResolveSettings,
}

impl NodeResolver {
    pub fn new(
        remote: Arc<dyn RemoteExecPort>,
        reachability: Arc<dyn NodeReachabilityPort>,
        settings: ResolveSettings,
    ) -> Self {
        Self {
            remote,
            reachability,
            settings,
        }
    }

    /// Polls the scheduler immediately and then once per interval until the
    /// job runs, ends, or the allocation timeout passes. Setting `cancel` to
    /// true stops the wait at the next opportunity.
    #[tracing::instrument(level = "debug", skip(self, job, cancel), fields(job_id = %job.remote_job_id))]
    pub async fn resolve_node(
        &self,
        job: &SubmittedJob,
        cancel: &mut watch::Receiver<bool>,
    ) -> AppResult<NodeAllocation> {
        let job_id = job.remote_job_id.as_str();
        let started = Instant::now();
        let deadline = started + self.settings.timeout;
        let mut polls = 0u32;

        loop {
            if *cancel.borrow() {
                return Err(AppError::Interrupted);
            }
            polls += 1;
            match self.observe(job_id).await? {
                Observation::Running(node) => {
                    let reachable_directly = self.reachability.is_directly_reachable(&node);
                    tracing::info!(node = %node, reachable_directly, polls, "job is running");
                    return Ok(NodeAllocation {
                        job_id: job_id.to_string(),
                        node_hostname: node,
                        reachable_directly,
                    });
                }
                Observation::Finished(state) => {
                    return Err(AppError::JobNeverStarted {
                        job_id: job_id.to_string(),
                        state,
                    });
                }
                Observation::Waiting(state) => {
                    tracing::debug!(state = %state, polls, "job is not running yet");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(AppError::AllocationTimeout {
                    job_id: job_id.to_string(),
                    waited: now - started,
                });
            }
            let wait = self.settings.poll_interval.min(deadline - now);
            let interrupted = async { cancel.wait_for(|stop| *stop).await.is_ok() };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                true = interrupted => return Err(AppError::Interrupted),
            }
        }
    }

    async fn observe(&self, job_id: &str) -> AppResult<Observation> {
        let capture = self
            .remote
            .exec_capture(&slurm::job_status_command(job_id))
            .await
            .map_err(|err| err.into_stage(AppError::RemoteQuery))?;

        let records = if capture.exit_code != 0 {
            let detail = capture.failure_detail();
            // squeue rejects ids that have already been purged from the queue.
            if !detail.contains("Invalid job id") {
                return Err(AppError::RemoteQuery(format!(
                    "squeue exited with {}: {detail}",
                    capture.exit_code
                )));
            }
            Vec::new()
        } else {
            slurm::parse_status_lines(&capture.stdout_lossy()).map_err(|err| {
                AppError::RemoteQuery(format!("unexpected squeue output for job {job_id}: {err}"))
            })?
        };

        if records.is_empty() {
            return self.observe_accounting(job_id).await;
        }

        let mut running = false;
        let mut nodes: Vec<String> = Vec::new();
        let mut finished = None;
        let mut waiting = None;
        for record in records {
            match record.state {
                SchedulerState::Running => {
                    running = true;
                    for node in record.nodes {
                        if !nodes.contains(&node) {
                            nodes.push(node);
                        }
                    }
                }
                SchedulerState::Finished(state) => {
                    finished.get_or_insert(state);
                }
                SchedulerState::Pending(state) | SchedulerState::Unknown(state) => {
                    waiting.get_or_insert(state);
                }
            }
        }

        if running {
            return match nodes.as_slice() {
                [node] => Ok(Observation::Running(node.clone())),
                _ => Err(AppError::AmbiguousNode {
                    job_id: job_id.to_string(),
                    candidates: nodes,
                }),
            };
        }
        Ok(match (finished, waiting) {
            (Some(state), _) => Observation::Finished(state),
            (None, Some(state)) => Observation::Waiting(state),
            (None, None) => Observation::Waiting(UNKNOWN_STATE.to_string()),
        })
    }

    /// The job is not in the queue: it either ended or is not visible yet.
    async fn observe_accounting(&self, job_id: &str) -> AppResult<Observation> {
        let capture = self
            .remote
            .exec_capture(&slurm::accounting_state_command(job_id))
            .await
            .map_err(|err| err.into_stage(AppError::RemoteQuery))?;
        if capture.exit_code != 0 {
            tracing::debug!(detail = %capture.failure_detail(), "sacct unavailable");
            return Ok(Observation::Waiting(UNKNOWN_STATE.to_string()));
        }
        let stdout = capture.stdout_lossy();
        if let Some(state) = slurm::sacct_terminal_state(&stdout) {
            return Ok(Observation::Finished(state));
        }
        Ok(Observation::Waiting(UNKNOWN_STATE.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::app::services::reachability::NodeAllowList;
    use crate::app::usecases::testing::{SequencedRemoteExec, failed, job_spec, ok};

    const STATUS: &str = "squeue -h -j 42 -o '%i|%T|%N'";
    const SACCT: &str = "sacct -j 42 -n -P -X -o State";

    fn submitted() -> SubmittedJob {
        SubmittedJob {
            spec: job_spec("nb1", "gpu"),
            remote_job_id: "42".into(),
            remote_script_path: "/home/jdoe/forward-util/jupyter.sbatch".into(),
            stdout_path: "/home/jdoe/forward-util/jupyter.sbatch.out".into(),
            stderr_path: "/home/jdoe/forward-util/jupyter.sbatch.err".into(),
        }
    }

    fn resolver(remote: Arc<SequencedRemoteExec>, timeout_secs: u64) -> NodeResolver {
        NodeResolver::new(
            remote,
            Arc::new(NodeAllowList::new(["c0"])),
            ResolveSettings {
                poll_interval: Duration::from_secs(5),
                timeout: Duration::from_secs(timeout_secs),
            },
        )
    }

    fn status(stdout: &str) -> (String, AppResult<crate::app::ports::ExecCapture>) {
        (STATUS.to_string(), ok(stdout))
    }

    #[tokio::test(start_paused = true)]
    async fn resolves_node_after_two_pending_polls() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![
            status("42|PENDING|\n"),
            status("42|PENDING|\n"),
            status("42|RUNNING|c01\n"),
        ]));
        let (_tx, mut cancel) = watch::channel(false);
        let begin = Instant::now();

        let allocation = resolver(remote.clone(), 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap();

        assert_eq!(
            allocation,
            NodeAllocation {
                job_id: "42".into(),
                node_hostname: "c01".into(),
                reachable_directly: true,
            }
        );
        assert_eq!(begin.elapsed(), Duration::from_secs(10));
        assert_eq!(remote.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_polling_past_the_deadline() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![
            status("42|PENDING|\n"),
            status("42|PENDING|\n"),
            status("42|PENDING|\n"),
        ]));
        let (_tx, mut cancel) = watch::channel(false);
        let begin = Instant::now();

        let err = resolver(remote.clone(), 10)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::AllocationTimeout { ref job_id, waited } if job_id == "42" && waited == Duration::from_secs(10)
        ));
        assert_eq!(begin.elapsed(), Duration::from_secs(10));
        assert_eq!(remote.commands().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn two_nodes_are_ambiguous() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![status("42|RUNNING|c[01-02]\n")]));
        let (_tx, mut cancel) = watch::channel(false);
        let err = resolver(remote, 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::AmbiguousNode { ref candidates, .. } if candidates == &["c01".to_string(), "c02".to_string()]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn running_without_node_is_ambiguous() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![status("42|RUNNING|\n")]));
        let (_tx, mut cancel) = watch::channel(false);
        let err = resolver(remote, 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AmbiguousNode { ref candidates, .. } if candidates.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_lines_for_the_same_node_are_accepted() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![status(
            "42_1|RUNNING|gpu07\n42_2|RUNNING|gpu07\n",
        )]));
        let (_tx, mut cancel) = watch::channel(false);
        let allocation = resolver(remote, 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap();
        assert_eq!(allocation.node_hostname, "gpu07");
        assert!(!allocation.reachable_directly);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_job_never_started() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![
            status("42|PENDING|\n"),
            status("42|CANCELLED by 1000|\n"),
        ]));
        let (_tx, mut cancel) = watch::channel(false);
        let err = resolver(remote, 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::JobNeverStarted { ref state, .. } if state == "CANCELLED"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn job_gone_from_queue_is_checked_in_accounting() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![
            status(""),
            (SACCT.into(), ok("FAILED\n")),
        ]));
        let (_tx, mut cancel) = watch::channel(false);
        let err = resolver(remote, 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::JobNeverStarted { ref state, .. } if state == "FAILED"));
    }

    #[tokio::test(start_paused = true)]
    async fn briefly_invisible_job_keeps_polling() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![
            (STATUS.into(), failed(1, "slurm_load_jobs error: Invalid job id specified")),
            (SACCT.into(), ok("")),
            status("42|RUNNING|c03\n"),
        ]));
        let (_tx, mut cancel) = watch::channel(false);
        let allocation = resolver(remote.clone(), 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap();
        assert_eq!(allocation.node_hostname, "c03");
        assert_eq!(remote.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unparseable_status_is_a_remote_query_error() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![status("42 RUNNING c01\n")]));
        let (_tx, mut cancel) = watch::channel(false);
        let err = resolver(remote, 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteQuery(_)));

        let remote = Arc::new(SequencedRemoteExec::new(vec![(
            STATUS.into(),
            failed(1, "slurm_load_jobs error: Socket timed out"),
        )]));
        let (_tx, mut cancel) = watch::channel(false);
        let err = resolver(remote, 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RemoteQuery(ref msg) if msg.contains("Socket timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_ends_the_wait() {
        let remote = Arc::new(SequencedRemoteExec::new(vec![
            status("42|PENDING|\n"),
            status("42|PENDING|\n"),
        ]));
        let (tx, mut cancel) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(7)).await;
            let _ = tx.send(true);
        });
        let begin = Instant::now();

        let err = resolver(remote.clone(), 600)
            .resolve_node(&submitted(), &mut cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Interrupted));
        assert_eq!(begin.elapsed(), Duration::from_secs(7));
        assert_eq!(remote.remaining(), 0);
    }
}
