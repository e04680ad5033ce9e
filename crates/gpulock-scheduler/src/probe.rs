//! GPU process probes
//!
//! A probe produces the raw snapshot text; parsing lives in gpulock-core.

use async_trait::async_trait;
use gpulock_core::{parse_probe_output, GpulockError, GpulockResult, ProbeConfig, ResourceRecord};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Source of GPU process snapshots
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Take one snapshot of the GPU process table
    async fn snapshot(&self) -> GpulockResult<String>;

    /// Get the probe name
    fn name(&self) -> &'static str;

    /// Take a snapshot and parse it
    async fn records(&self) -> GpulockResult<Vec<ResourceRecord>> {
        let text = self.snapshot().await?;
        parse_probe_output(&text)
    }
}

/// Probe that runs an external command, `nvidia-smi pmon -c 1` by default
pub struct CommandProbe {
    config: ProbeConfig,
}

impl CommandProbe {
    /// Create a new command probe
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Build the probe command
    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::new(ProbeConfig::default())
    }
}

#[async_trait]
impl ResourceProbe for CommandProbe {
    async fn snapshot(&self) -> GpulockResult<String> {
        debug!(
            command = %self.config.command,
            args = ?self.config.args,
            "Running GPU probe"
        );

        let output = self.build_command().output().await.map_err(|e| {
            GpulockError::Probe(format!("Failed to run '{}': {}", self.config.command, e))
        })?;

        if !output.status.success() {
            return Err(GpulockError::Probe(format!(
                "'{}' exited with {}: {}",
                self.config.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            GpulockError::Probe(format!(
                "'{}' printed invalid UTF-8: {}",
                self.config.command, e
            ))
        })
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

/// Probe replaying a captured snapshot
pub struct StaticProbe {
    text: String,
}

impl StaticProbe {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Replay a snapshot saved to a file
    pub fn from_file(path: &Path) -> GpulockResult<Self> {
        Ok(Self::new(std::fs::read_to_string(path)?))
    }
}

#[async_trait]
impl ResourceProbe for StaticProbe {
    async fn snapshot(&self) -> GpulockResult<String> {
        Ok(self.text.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAPSHOT: &str = "\
# gpu        pid  type    sm   mem   enc   dec   command
# Idx          #   C/G     %     %     %     %   name
    0      25729     C    94    57     0     0   python
    1          -     -     -     -     -     -   -
";

    #[tokio::test]
    async fn test_static_probe_records() {
        let probe = StaticProbe::new(SNAPSHOT);
        let records = probe.records().await.unwrap();
        assert_eq!(
            records,
            vec![ResourceRecord::busy(0, 25729), ResourceRecord::idle(1)]
        );
        assert_eq!(probe.name(), "static");
    }

    #[tokio::test]
    async fn test_static_probe_malformed() {
        let probe = StaticProbe::new("garbage\n");
        let err = probe.records().await.unwrap_err();
        assert!(matches!(err, GpulockError::MalformedProbeOutput { .. }));
    }

    #[test]
    fn test_command_probe_default() {
        let probe = CommandProbe::default();
        assert_eq!(probe.config.command, "nvidia-smi");
        assert_eq!(probe.name(), "command");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_runs_command() {
        let probe = CommandProbe::new(ProbeConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), format!("echo '{}'", SNAPSHOT)],
        });
        let records = probe.records().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[1].is_idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_failure() {
        let probe = CommandProbe::new(ProbeConfig {
            command: "false".to_string(),
            args: Vec::new(),
        });
        assert!(matches!(
            probe.snapshot().await,
            Err(GpulockError::Probe(_))
        ));
    }

    #[tokio::test]
    async fn test_command_probe_missing_binary() {
        let probe = CommandProbe::new(ProbeConfig {
            command: "gpulock-no-such-probe".to_string(),
            args: Vec::new(),
        });
        let err = probe.snapshot().await.unwrap_err();
        assert!(err.is_environment());
    }
}
