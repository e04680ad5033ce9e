//! CLI commands implementation

use anyhow::{Context, Result};
use gpulock_core::GpulockConfig;
use gpulock_scheduler::{CommandProbe, LeaseOrchestrator, ResourceProbe, StaticProbe};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Environment variable advertising the selected GPU to CUDA programs
pub const VISIBLE_DEVICES: &str = "CUDA_VISIBLE_DEVICES";

/// Whether the environment explicitly hides every GPU from this process
pub fn gpus_hidden() -> bool {
    std::env::var_os(VISIBLE_DEVICES).is_some_and(|v| v.is_empty())
}

fn build_probe(config: &GpulockConfig, snapshot: Option<&Path>) -> Result<Arc<dyn ResourceProbe>> {
    match snapshot {
        Some(path) => {
            let probe = StaticProbe::from_file(path)
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
            Ok(Arc::new(probe))
        }
        None => Ok(Arc::new(CommandProbe::new(config.probe.clone()))),
    }
}

/// Lock a GPU and print its index
///
/// The lease is not released; it lapses after the ttl, by which time the
/// caller's process shows up as busy in the probe.
pub async fn select(config: &GpulockConfig, snapshot: Option<&Path>) -> Result<ExitCode> {
    if gpus_hidden() {
        debug!("{} is empty, no GPU requested", VISIBLE_DEVICES);
        println!();
        return Ok(ExitCode::SUCCESS);
    }

    let orchestrator = LeaseOrchestrator::from_config(config, build_probe(config, snapshot)?)?;
    let selection = orchestrator.select_resource().await?;

    if let Some(handle) = &selection.release {
        info!(
            key = %handle.lease().key(),
            ttl_ms = handle.lease().ttl().as_millis() as u64,
            "Lease left to expire"
        );
    }

    println!("{}", selection.resource_id);
    Ok(ExitCode::SUCCESS)
}

/// Lock a GPU, run `command` with it visible, then release the lease
pub async fn run(
    config: &GpulockConfig,
    snapshot: Option<&Path>,
    command: &[String],
) -> Result<ExitCode> {
    if gpus_hidden() {
        debug!("{} is empty, running without a GPU", VISIBLE_DEVICES);
        return Ok(exit_code(spawn(command, "").await?));
    }

    let orchestrator = LeaseOrchestrator::from_config(config, build_probe(config, snapshot)?)?;
    let selection = orchestrator.select_resource().await?;

    let status = spawn(command, &selection.resource_id.to_string()).await;

    if let Some(handle) = &selection.release {
        handle.release().await;
    }

    Ok(exit_code(status?))
}

/// Run `command` with no GPU visible
pub async fn hide(command: &[String]) -> Result<ExitCode> {
    Ok(exit_code(spawn(command, "").await?))
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Run `command` with `visible` advertised and return its exit code
async fn spawn(command: &[String], visible: &str) -> Result<i32> {
    let (program, args) = command
        .split_first()
        .context("No command given")?;

    info!(program = %program, gpu = %visible, "Starting command");

    let status = Command::new(program)
        .args(args)
        .env(VISIBLE_DEVICES, visible)
        .status()
        .await
        .with_context(|| format!("Failed to start '{}'", program))?;

    Ok(status.code().unwrap_or(1))
}

/// Show the GPU process snapshot
pub async fn probe(config: &GpulockConfig, snapshot: Option<&Path>, json: bool) -> Result<ExitCode> {
    let records = build_probe(config, snapshot)?.records().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(ExitCode::SUCCESS);
    }

    if records.is_empty() {
        println!("No GPUs reported");
    } else {
        println!("{:<6} {:<10} {:<8}", "GPU", "PID", "STATE");
        println!("{}", "-".repeat(26));
        for record in &records {
            let pid = record
                .occupying_pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            let state = if record.is_idle { "idle" } else { "busy" };
            println!("{:<6} {:<10} {:<8}", record.resource_id, pid, state);
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpulock_core::GpulockError;
    use std::io::Write;

    #[tokio::test]
    async fn test_build_probe_from_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# gpu pid type sm mem enc dec command").unwrap();
        writeln!(file, "# Idx # C/G % % % % name").unwrap();
        writeln!(file, "    0 - - - - - - -").unwrap();

        let probe = build_probe(&GpulockConfig::default(), Some(file.path())).unwrap();
        let records = probe.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_idle);
    }

    #[test]
    fn test_build_probe_missing_snapshot() {
        let result = build_probe(
            &GpulockConfig::default(),
            Some(Path::new("/nonexistent/gpulock/pmon.txt")),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_select_rejects_empty_store_list() {
        if gpus_hidden() {
            return;
        }
        let config = GpulockConfig {
            stores: Vec::new(),
            ..Default::default()
        };
        let err = select(&config, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GpulockError>(),
            Some(GpulockError::StoreConfiguration { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_reports_child_status() {
        assert_eq!(spawn(&["true".to_string()], "").await.unwrap(), 0);

        let code = spawn(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()], "")
            .await
            .unwrap();
        assert_eq!(code, 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_advertises_gpu() {
        let check = |expected: &str| {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("[ \"${}\" = \"{}\" ]", VISIBLE_DEVICES, expected),
            ]
        };
        assert_eq!(spawn(&check("1"), "1").await.unwrap(), 0);
        assert_eq!(spawn(&check(""), "").await.unwrap(), 0);
        assert_ne!(spawn(&check("1"), "").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawn_requires_command() {
        assert!(spawn(&[], "0").await.is_err());
    }
}
