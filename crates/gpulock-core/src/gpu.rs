//! GPU process snapshot parsing

use crate::{GpulockError, GpulockResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Token the probe prints in the pid column of a GPU with no process
pub const IDLE_PLACEHOLDER: &str = "-";

/// Number of header lines preceding the data rows
const HEADER_LINES: usize = 2;

/// One row of the GPU process snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Device index
    pub resource_id: u32,
    /// Process running on the device, if any
    pub occupying_pid: Option<u32>,
    /// Whether no process is running on the device
    pub is_idle: bool,
}

impl ResourceRecord {
    /// Record for a device with no process
    pub fn idle(resource_id: u32) -> Self {
        Self {
            resource_id,
            occupying_pid: None,
            is_idle: true,
        }
    }

    /// Record for a device running `pid`
    pub fn busy(resource_id: u32, pid: u32) -> Self {
        Self {
            resource_id,
            occupying_pid: Some(pid),
            is_idle: false,
        }
    }
}

impl std::fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.occupying_pid {
            Some(pid) => write!(f, "gpu{} busy (pid {})", self.resource_id, pid),
            None => write!(f, "gpu{} idle", self.resource_id),
        }
    }
}

/// Parse a process snapshot as printed by `nvidia-smi pmon -c 1`
///
/// ```text
/// # gpu        pid  type    sm   mem   enc   dec   command
/// # Idx          #   C/G     %     %     %     %   name
///     0      25729     C    94    57     0     0   python
///     1          -     -     -     -     -     -   -
/// ```
///
/// The column count is taken from the first header line and every data row
/// must match it. Any row that does not parse fails the whole snapshot.
pub fn parse_probe_output(text: &str) -> GpulockResult<Vec<ResourceRecord>> {
    let lines: Vec<&str> = text.lines().collect();

    if lines.len() < HEADER_LINES {
        return Err(GpulockError::MalformedProbeOutput {
            line: lines.len() + 1,
            reason: format!("expected {} header lines", HEADER_LINES),
        });
    }

    let mut columns = 0;
    for (idx, header) in lines[..HEADER_LINES].iter().enumerate() {
        let fields = header.trim_start().strip_prefix('#').ok_or_else(|| {
            GpulockError::MalformedProbeOutput {
                line: idx + 1,
                reason: "header line does not start with '#'".to_string(),
            }
        })?;
        if idx == 0 {
            columns = fields.split_whitespace().count();
        }
    }

    if columns < 2 {
        return Err(GpulockError::MalformedProbeOutput {
            line: 1,
            reason: format!("header names {} column(s), at least 2 required", columns),
        });
    }

    let mut records = Vec::new();
    for (idx, row) in lines.iter().enumerate().skip(HEADER_LINES) {
        if row.trim().is_empty() {
            continue;
        }
        records.push(parse_row(row, idx + 1, columns)?);
    }

    Ok(records)
}

fn parse_row(row: &str, line: usize, columns: usize) -> GpulockResult<ResourceRecord> {
    let fields: Vec<&str> = row.split_whitespace().collect();
    if fields.len() != columns {
        return Err(GpulockError::MalformedProbeOutput {
            line,
            reason: format!("expected {} columns, found {}", columns, fields.len()),
        });
    }

    let resource_id = fields[0]
        .parse::<u32>()
        .map_err(|_| GpulockError::MalformedProbeOutput {
            line,
            reason: format!("invalid device index '{}'", fields[0]),
        })?;

    if fields[1] == IDLE_PLACEHOLDER {
        return Ok(ResourceRecord::idle(resource_id));
    }

    let pid = fields[1]
        .parse::<u32>()
        .map_err(|_| GpulockError::MalformedProbeOutput {
            line,
            reason: format!("invalid pid '{}'", fields[1]),
        })?;

    Ok(ResourceRecord::busy(resource_id, pid))
}

/// Find the device already running the process `pid`
pub fn find_self_occupied(records: &[ResourceRecord], pid: u32) -> Option<u32> {
    records
        .iter()
        .find(|r| r.occupying_pid == Some(pid))
        .map(|r| r.resource_id)
}

/// Idle device indices in snapshot order
///
/// A device listed busy on any row is excluded, and each index appears once.
pub fn idle_resource_ids(records: &[ResourceRecord]) -> Vec<u32> {
    let busy: HashSet<u32> = records
        .iter()
        .filter(|r| !r.is_idle)
        .map(|r| r.resource_id)
        .collect();

    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| r.is_idle && !busy.contains(&r.resource_id))
        .map(|r| r.resource_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Lock key naming `resource_id` on `host`
pub fn resource_key(host: &str, resource_id: u32) -> String {
    format!("{}:gpu{}", host, resource_id)
}
