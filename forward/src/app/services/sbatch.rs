// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};

use crate::app::services::shell::join_command;
use crate::app::types::JobSpec;

pub const SCRIPT_EXTENSION: &str = "sbatch";

/// Local files that may hold the job script, in lookup order.
/// A script given with a path separator is taken as-is.
pub fn script_candidates(script: &str, script_dir: &Path, cluster: Option<&str>) -> Vec<PathBuf> {
    if script.contains('/') || script.contains(std::path::MAIN_SEPARATOR) {
        return vec![PathBuf::from(script)];
    }
    let file_name = if Path::new(script)
        .extension()
        .is_some_and(|ext| ext == SCRIPT_EXTENSION)
    {
        script.to_string()
    } else {
        format!("{script}.{SCRIPT_EXTENSION}")
    };
    let mut candidates = Vec::with_capacity(2);
    if let Some(cluster) = cluster.filter(|c| !c.is_empty()) {
        candidates.push(script_dir.join(cluster).join(&file_name));
    }
    candidates.push(script_dir.join(file_name));
    candidates
}

pub fn remote_join(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

pub fn remote_workdir(home: &str, workdir_name: &str) -> String {
    remote_join(home, workdir_name)
}

pub fn mkdir_command(dir: &str) -> String {
    join_command(["mkdir", "-p", dir])
}

/// Remote stdout and stderr paths for a script uploaded as `script_basename`.
pub fn log_paths(workdir: &str, script_basename: &str) -> (String, String) {
    (
        remote_join(workdir, &format!("{script_basename}.out")),
        remote_join(workdir, &format!("{script_basename}.err")),
    )
}

/// GPUs to request. Asking for the GPU partition implies at least one.
pub fn gpu_request(partition: &str, gpu_count: u32, gpu_partition: &str) -> Option<u32> {
    if !gpu_partition.is_empty() && partition == gpu_partition {
        return Some(gpu_count.max(1));
    }
    (gpu_count > 0).then_some(gpu_count)
}

pub fn resource_flags(
    spec: &JobSpec,
    stdout_path: &str,
    stderr_path: &str,
    gpu_partition: &str,
) -> Vec<String> {
    let mut flags = vec![
        format!("--job-name={}", spec.name),
        format!("--partition={}", spec.partition),
        format!("--output={stdout_path}"),
        format!("--error={stderr_path}"),
        format!("--cpus-per-task={}", spec.cpu_count),
        format!("--mem={}", spec.memory),
        format!("--time={}", spec.wall_time),
    ];
    if let Some(gpus) = gpu_request(&spec.partition, spec.gpu_count, gpu_partition) {
        flags.push(format!("--gres=gpu:{gpus}"));
    }
    flags
}

/// Full submission command. The forwarding port and extra arguments belong to
/// the job script, so they follow the script path.
pub fn sbatch_command(
    spec: &JobSpec,
    remote_script: &str,
    stdout_path: &str,
    stderr_path: &str,
    gpu_partition: &str,
) -> String {
    let mut words = vec!["sbatch".to_string()];
    words.extend(resource_flags(spec, stdout_path, stderr_path, gpu_partition));
    words.push(remote_script.to_string());
    words.push(spec.forward_port.to_string());
    words.extend(spec.extra_args.iter().cloned());
    join_command(words)
}
