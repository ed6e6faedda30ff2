// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

use crate::app::services::shell::join_command;
use crate::app::types::{JobStatusRecord, QueuedJob, SchedulerState};

const FIELD_SEPARATOR: char = '|';
const LISTING_FORMAT: &str = "%i|%j|%T";
const STATUS_FORMAT: &str = "%i|%T|%N";
const MAX_HOSTLIST_LEN: u64 = 4096;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("expected {expected} '|'-separated fields, got line {line:?}")]
    FieldCount { expected: usize, line: String },
    #[error("empty {field} field in line {line:?}")]
    EmptyField { field: &'static str, line: String },
    #[error("malformed node list {0:?}")]
    NodeList(String),
}

pub fn queue_listing_command(username: &str) -> String {
    join_command(["squeue", "-h", "-u", username, "-o", LISTING_FORMAT])
}

pub fn job_status_command(job_id: &str) -> String {
    join_command(["squeue", "-h", "-j", job_id, "-o", STATUS_FORMAT])
}

pub fn accounting_state_command(job_id: &str) -> String {
    join_command(["sacct", "-j", job_id, "-n", "-P", "-X", "-o", "State"])
}

pub fn home_dir_command() -> &'static str {
    r#"printf '%s' "$HOME""#
}

/// Parse `squeue -h -u <user> -o '%i|%j|%T'`. Names may contain `|`, so
/// the id is taken up to the first separator and the state after the last.
pub fn parse_queue_listing(output: &str) -> Result<Vec<QueuedJob>, ProtocolError> {
    let mut jobs = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (job_id, name, state) = split_listing_fields(line)?;
        if job_id.is_empty() {
            return Err(empty_field("job id", line));
        }
        if name.is_empty() {
            return Err(empty_field("job name", line));
        }
        jobs.push(QueuedJob {
            job_id: job_id.to_string(),
            name: name.to_string(),
            state: state.to_ascii_uppercase(),
        });
    }
    Ok(jobs)
}

/// Parse `squeue -h -j <id> -o '%i|%T|%N'`. Array and heterogeneous jobs
/// may produce several lines for one id.
pub fn parse_status_lines(output: &str) -> Result<Vec<JobStatusRecord>, ProtocolError> {
    let mut records = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let [job_id, state, nodes] = split_fields::<3>(line)?;
        if job_id.is_empty() {
            return Err(empty_field("job id", line));
        }
        if state.is_empty() {
            return Err(empty_field("state", line));
        }
        records.push(JobStatusRecord {
            job_id: job_id.to_string(),
            state: classify_state(state),
            nodes: expand_hostlist(nodes)?,
        });
    }
    Ok(records)
}

fn split_listing_fields(line: &str) -> Result<(&str, &str, &str), ProtocolError> {
    let field_count = || ProtocolError::FieldCount {
        expected: 3,
        line: line.to_string(),
    };
    let (job_id, rest) = line.split_once(FIELD_SEPARATOR).ok_or_else(field_count)?;
    let (name, state) = rest.rsplit_once(FIELD_SEPARATOR).ok_or_else(field_count)?;
    Ok((job_id.trim(), name.trim(), state.trim()))
}

fn split_fields<const N: usize>(line: &str) -> Result<[&str; N], ProtocolError> {
    let fields: Vec<&str> = line.split(FIELD_SEPARATOR).map(str::trim).collect();
    fields
        .try_into()
        .map_err(|_: Vec<&str>| ProtocolError::FieldCount {
            expected: N,
            line: line.to_string(),
        })
}

fn empty_field(field: &'static str, line: &str) -> ProtocolError {
    ProtocolError::EmptyField {
        field,
        line: line.to_string(),
    }
}

pub fn classify_state(raw: &str) -> SchedulerState {
    let normalized = normalize_slurm_state(raw);
    match normalized.as_str() {
        "RUNNING" => SchedulerState::Running,
        s if is_slurm_state_pending(s) => SchedulerState::Pending(normalized),
        s if is_slurm_state_terminal(s) || is_slurm_state_ending(s) => {
            SchedulerState::Finished(normalized)
        }
        _ => SchedulerState::Unknown(normalized),
    }
}

/// Expand a SLURM hostlist expression such as `gpu[07-08,10],c01`.
pub fn expand_hostlist(expr: &str) -> Result<Vec<String>, ProtocolError> {
    let expr = expr.trim();
    if expr.is_empty()
        || expr.eq_ignore_ascii_case("(null)")
        || expr.eq_ignore_ascii_case("n/a")
        || expr.eq_ignore_ascii_case("none assigned")
    {
        return Ok(Vec::new());
    }
    let mut hosts = Vec::new();
    for item in split_top_level(expr).map_err(|_| ProtocolError::NodeList(expr.to_string()))? {
        expand_item(item, &mut hosts).map_err(|_| ProtocolError::NodeList(expr.to_string()))?;
    }
    Ok(hosts)
}

fn split_top_level(expr: &str) -> Result<Vec<&str>, ()> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in expr.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1).ok_or(())?,
            ',' if depth == 0 => {
                items.push(&expr[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(());
    }
    items.push(&expr[start..]);
    if items.iter().any(|item| item.trim().is_empty()) {
        return Err(());
    }
    Ok(items)
}

fn expand_item(item: &str, out: &mut Vec<String>) -> Result<(), ()> {
    let item = item.trim();
    let Some(open) = item.find('[') else {
        if item.contains(']') {
            return Err(());
        }
        out.push(item.to_string());
        return Ok(());
    };
    let close = item[open..].find(']').ok_or(())? + open;
    let prefix = &item[..open];
    let ranges = &item[open + 1..close];
    let rest = &item[close + 1..];

    let mut tails = Vec::new();
    if rest.is_empty() {
        tails.push(String::new());
    } else {
        expand_item(rest, &mut tails)?;
    }

    for range in ranges.split(',') {
        for index in expand_range(range)? {
            if (out.len() + tails.len()) as u64 > MAX_HOSTLIST_LEN {
                return Err(());
            }
            for tail in &tails {
                out.push(format!("{prefix}{index}{tail}"));
            }
        }
    }
    Ok(())
}

fn expand_range(range: &str) -> Result<Vec<String>, ()> {
    let range = range.trim();
    let (lo, hi) = match range.split_once('-') {
        Some((lo, hi)) => (lo, hi),
        None => (range, range),
    };
    if lo.is_empty() || !lo.chars().all(|c| c.is_ascii_digit()) {
        return Err(());
    }
    if hi.is_empty() || !hi.chars().all(|c| c.is_ascii_digit()) {
        return Err(());
    }
    let width = lo.len();
    let start: u64 = lo.parse().map_err(|_| ())?;
    let end: u64 = hi.parse().map_err(|_| ())?;
    if end < start || end - start >= MAX_HOSTLIST_LEN {
        return Err(());
    }
    Ok((start..=end).map(|n| format!("{n:0width$}")).collect())
}

/// Job id from sbatch output such as "Submitted batch job 11", the
/// federated "Submitted batch job 11 on cluster c1" or the `--parsable`
/// form "11;cluster".
pub fn parse_job_id(output: &str) -> Option<String> {
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let marker = "job ";
        let tail = match line.find(marker) {
            Some(idx) => &line[idx + marker.len()..],
            None => line,
        };
        let candidate = tail
            .split(|c: char| c == ';' || c.is_whitespace())
            .find(|t| !t.is_empty())
            .unwrap_or("");
        if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
            return Some(candidate.to_string());
        }
    }
    None
}

pub fn parse_sacct_states(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let state = line.split('|').next().unwrap_or(line).trim();
            if state.is_empty() {
                None
            } else {
                Some(state.to_string())
            }
        })
        .collect()
}

/// Terminal state reported by sacct, if every record has finished.
pub fn sacct_terminal_state(output: &str) -> Option<String> {
    let states = parse_sacct_states(output);
    if states.is_empty() {
        return None;
    }
    let mut normalized = Vec::with_capacity(states.len());
    for state in states {
        let token = normalize_slurm_state(&state);
        if !is_slurm_state_terminal(&token) {
            return None;
        }
        normalized.push(token);
    }
    if normalized.iter().all(|state| state == "COMPLETED") {
        return Some("COMPLETED".to_string());
    }
    normalized.into_iter().find(|state| state != "COMPLETED")
}

fn normalize_slurm_state(state: &str) -> String {
    let token = state
        .split(|c: char| c == '+' || c == ':' || c == '(' || c.is_whitespace())
        .find(|t| !t.is_empty())
        .unwrap_or(state)
        .trim();
    token.to_ascii_uppercase()
}

fn is_slurm_state_pending(state: &str) -> bool {
    matches!(
        state,
        "PENDING"
            | "CONFIGURING"
            | "REQUEUED"
            | "REQUEUE_HOLD"
            | "REQUEUE_FED"
            | "RESIZING"
            | "SUSPENDED"
    )
}

fn is_slurm_state_ending(state: &str) -> bool {
    matches!(state, "COMPLETING" | "STAGE_OUT")
}

fn is_slurm_state_terminal(state: &str) -> bool {
    matches!(
        state,
        "COMPLETED"
            | "CANCELLED"
            | "FAILED"
            | "TIMEOUT"
            | "NODE_FAIL"
            | "PREEMPTED"
            | "BOOT_FAIL"
            | "OUT_OF_MEMORY"
            | "DEADLINE"
            | "SPECIAL_EXIT"
            | "REVOKED"
    )
}
