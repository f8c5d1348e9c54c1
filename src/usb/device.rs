//! Block device inspection and validation.
//!
//! Everything here is read-only: devices are described with `lsblk -J` and
//! checked against the rules a USB target must satisfy before anything
//! destructive is allowed to touch it.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::process::Cmd;

/// Columns requested from `lsblk`.
pub const LSBLK_COLUMNS: &str = "NAME,PATH,TYPE,SIZE,RM,TRAN,MODEL,MOUNTPOINTS";

/// Why a device cannot be used as an install target.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{0} does not exist")]
    NotFound(PathBuf),

    #[error("{0} is not a block device")]
    NotBlockDevice(PathBuf),

    #[error("{path} is a partition; pass the whole disk ({parent}) instead")]
    Partition { path: PathBuf, parent: String },

    #[error("{path} is too small: {size} available, at least {min} required")]
    TooSmall {
        path: PathBuf,
        size: String,
        min: String,
    },

    #[error("{path} is mounted at {mountpoint}; unmount it first")]
    Mounted { path: PathBuf, mountpoint: String },

    #[error("{0} holds the running system's root filesystem")]
    HostRoot(PathBuf),

    #[error("failed to inspect {path}: {reason}")]
    Inspect { path: PathBuf, reason: String },
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

/// One row of `lsblk -J -b` output.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDevice {
    pub name: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "flexible_u64")]
    pub size: u64,
    #[serde(default, deserialize_with = "flexible_bool")]
    pub rm: bool,
    #[serde(default)]
    pub tran: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// util-linux >= 2.37
    #[serde(default)]
    pub mountpoints: Vec<Option<String>>,
    /// Older util-linux
    #[serde(default)]
    pub mountpoint: Option<String>,
    #[serde(default)]
    pub children: Vec<BlockDevice>,
}

impl BlockDevice {
    /// Device node, falling back to `/dev/<name>` when `PATH` is unavailable.
    pub fn dev_path(&self) -> PathBuf {
        match &self.path {
            Some(p) => PathBuf::from(p),
            None => PathBuf::from("/dev").join(&self.name),
        }
    }

    pub fn is_partition(&self) -> bool {
        self.kind == "part"
    }

    pub fn is_whole_disk(&self) -> bool {
        matches!(self.kind.as_str(), "disk" | "loop")
    }

    pub fn is_usb(&self) -> bool {
        self.tran.as_deref() == Some("usb")
    }

    /// Mount points of this device and all of its descendants.
    pub fn all_mountpoints(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .mountpoints
            .iter()
            .flatten()
            .chain(self.mountpoint.iter())
            .filter(|m| !m.is_empty())
            .cloned()
            .collect();
        for child in &self.children {
            out.extend(child.all_mountpoints());
        }
        out.dedup();
        out
    }

    pub fn model_or_unknown(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or("unknown model")
    }

    /// One-line summary for listings and confirmation prompts.
    pub fn summary(&self) -> String {
        format!(
            "{} ({}, {}, {}{})",
            self.dev_path().display(),
            self.model_or_unknown(),
            format_size(self.size),
            self.tran.as_deref().unwrap_or("?"),
            if self.rm { ", removable" } else { "" }
        )
    }
}

impl fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flexible {
    Bool(bool),
    Num(u64),
    Str(String),
}

// lsblk emits numbers and booleans as strings on older util-linux.
fn flexible_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    use serde::de::Error;
    match Option::<Flexible>::deserialize(d)? {
        Some(Flexible::Num(n)) => Ok(n),
        Some(Flexible::Str(s)) => s.trim().parse().map_err(D::Error::custom),
        Some(Flexible::Bool(_)) => Err(D::Error::custom("expected a size, got a boolean")),
        None => Ok(0),
    }
}

fn flexible_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    match Option::<Flexible>::deserialize(d)? {
        Some(Flexible::Bool(b)) => Ok(b),
        Some(Flexible::Num(n)) => Ok(n != 0),
        Some(Flexible::Str(s)) => Ok(matches!(s.trim(), "1" | "true")),
        None => Ok(false),
    }
}

/// Parse `lsblk -J` output.
pub fn parse_lsblk(json: &str) -> Result<Vec<BlockDevice>> {
    let output: LsblkOutput =
        serde_json::from_str(json).context("Failed to parse lsblk JSON output")?;
    Ok(output.blockdevices)
}

/// Describe a single device (with its partitions).
pub fn inspect(device: &Path) -> Result<BlockDevice> {
    let result = Cmd::new("lsblk")
        .args(["-J", "-b", "-o", LSBLK_COLUMNS])
        .arg_path(device)
        .error_msg(format!("lsblk failed for {}", device.display()))
        .run()?;
    parse_lsblk(&result.stdout)?
        .into_iter()
        .next()
        .with_context(|| format!("lsblk returned nothing for {}", device.display()))
}

/// All whole-disk devices on the host.
pub fn list_disks() -> Result<Vec<BlockDevice>> {
    let result = Cmd::new("lsblk")
        .args(["-J", "-b", "-o", LSBLK_COLUMNS])
        .error_msg("lsblk failed")
        .run()?;
    Ok(parse_lsblk(&result.stdout)?
        .into_iter()
        .filter(|d| d.kind == "disk")
        .collect())
}

/// A device that passed validation, plus any warnings worth showing.
#[derive(Debug, Clone)]
pub struct ValidatedDevice {
    pub device: BlockDevice,
    pub warnings: Vec<String>,
}

/// Check that `path` is an acceptable install target of at least `min_bytes`.
pub fn validate_device(path: &Path, min_bytes: u64) -> std::result::Result<ValidatedDevice, DeviceError> {
    let metadata =
        std::fs::metadata(path).map_err(|_| DeviceError::NotFound(path.to_path_buf()))?;
    if !metadata.file_type().is_block_device() {
        return Err(DeviceError::NotBlockDevice(path.to_path_buf()));
    }

    let device = inspect(path).map_err(|e| DeviceError::Inspect {
        path: path.to_path_buf(),
        reason: format!("{:#}", e),
    })?;
    let parent = if device.is_partition() {
        parent_disk(path)
    } else {
        None
    };
    let warnings = check_device(&device, parent.as_deref(), min_bytes)?;
    Ok(ValidatedDevice { device, warnings })
}

/// The validation rules, on an already inspected device.
///
/// `parent` names the owning disk when `device` is a partition.
pub fn check_device(
    device: &BlockDevice,
    parent: Option<&str>,
    min_bytes: u64,
) -> std::result::Result<Vec<String>, DeviceError> {
    let path = device.dev_path();

    if device.is_partition() {
        return Err(DeviceError::Partition {
            path,
            parent: parent.unwrap_or("the parent disk").to_string(),
        });
    }
    if !device.is_whole_disk() {
        return Err(DeviceError::NotBlockDevice(path));
    }

    let mountpoints = device.all_mountpoints();
    if mountpoints.iter().any(|m| m == "/") {
        return Err(DeviceError::HostRoot(path));
    }
    if let Some(mountpoint) = mountpoints.into_iter().next() {
        return Err(DeviceError::Mounted { path, mountpoint });
    }

    if device.size < min_bytes {
        return Err(DeviceError::TooSmall {
            path,
            size: format_size(device.size),
            min: format_size(min_bytes),
        });
    }

    let mut warnings = Vec::new();
    if !device.rm {
        warnings.push(format!("{} is not a removable device", path.display()));
    }
    if !device.is_usb() {
        warnings.push(format!(
            "{} is attached via {}, not USB",
            path.display(),
            device.tran.as_deref().unwrap_or("an unknown transport")
        ));
    }
    Ok(warnings)
}

fn parent_disk(partition: &Path) -> Option<String> {
    let result = Cmd::new("lsblk")
        .args(["-n", "-d", "-o", "PKNAME"])
        .arg_path(partition)
        .allow_fail()
        .run()
        .ok()?;
    let name = result.stdout_trimmed();
    (!name.is_empty()).then(|| format!("/dev/{}", name))
}

/// Path of partition `n` on `device`.
///
/// Device names ending in a digit (`nvme0n1`, `mmcblk0`, `loop0`) take a
/// `p` separator.
pub fn partition_path(device: &Path, n: u32) -> PathBuf {
    let base = device.to_string_lossy();
    if base.ends_with(|c: char| c.is_ascii_digit()) {
        PathBuf::from(format!("{}p{}", base, n))
    } else {
        PathBuf::from(format!("{}{}", base, n))
    }
}

/// Human-readable size using binary units.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
