//! Persistent USB installer.
//!
//! Writes the live filesystem of an archlive ISO onto a USB stick as a real,
//! bootable installation: FAT32 `/boot` with syslinux, and an ext4, btrfs
//! or f2fs root (optionally inside LUKS).
//!
//! Nothing destructive runs until the device passed [`validate_device`] and
//! the user confirmed, unless `--yes` was given.

pub mod device;
pub mod layout;
pub mod plan;

pub use device::{
    check_device, inspect, list_disks, parse_lsblk, partition_path, validate_device, BlockDevice,
    DeviceError, ValidatedDevice,
};
pub use layout::{DiskUuids, Filesystem};
pub use plan::{install_pipeline, InstallPlan};

use anyhow::{bail, Context, Result};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::common::newest_with_extension;
use crate::config::Config;
use crate::pipeline::Executor;
use crate::preflight::{self, Target};
use crate::process::{self, Cmd};

/// Microcode images archiso may ship next to the kernel.
pub const MICROCODE_IMAGES: &[&str] = &["intel-ucode.img", "amd-ucode.img"];

/// Options of `archlive usb write`.
#[derive(Debug, Clone)]
pub struct UsbOptions {
    pub device: PathBuf,
    pub iso: Option<PathBuf>,
    pub encrypt: bool,
    pub filesystem: Filesystem,
    pub hostname: Option<String>,
    pub yes: bool,
    pub dry_run: bool,
}

/// What an ISO image contains, from its file listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IsoContents {
    pub has_airootfs: bool,
    pub has_kernel: bool,
    pub microcode: Vec<String>,
}

impl IsoContents {
    /// Read the listing with `bsdtar -tf`.
    pub fn read(iso: &Path) -> Result<Self> {
        let result = Cmd::new("bsdtar")
            .arg("-tf")
            .arg_path(iso)
            .error_msg(format!("Failed to list {}", iso.display()))
            .run()?;
        Ok(Self::from_listing(&result.stdout))
    }

    pub fn from_listing(listing: &str) -> Self {
        let entries: Vec<&str> = listing
            .lines()
            .map(|l| l.trim().trim_start_matches("./"))
            .collect();
        let has = |path: &str| entries.iter().any(|e| *e == path);
        Self {
            has_airootfs: has(plan::ISO_AIROOTFS),
            has_kernel: has(plan::ISO_KERNEL),
            microcode: MICROCODE_IMAGES
                .iter()
                .filter(|img| has(&format!("{}/{}", plan::ISO_BOOT_DIR, img)))
                .map(|img| img.to_string())
                .collect(),
        }
    }

    /// Fail unless this is an archiso image we know how to install.
    pub fn ensure_installable(&self, iso: &Path) -> Result<()> {
        if !self.has_airootfs {
            bail!(
                "{} has no {}; is it an archiso image?",
                iso.display(),
                plan::ISO_AIROOTFS
            );
        }
        if !self.has_kernel {
            bail!("{} has no {}", iso.display(), plan::ISO_KERNEL);
        }
        Ok(())
    }
}

/// ISO given on the command line, or the newest one in the output directory.
pub fn locate_iso(config: &Config, explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => {
            if !path.is_file() {
                bail!("ISO not found: {}", path.display());
            }
            Ok(path.to_path_buf())
        }
        None => newest_with_extension(&config.output_dir, "iso").with_context(|| {
            format!(
                "No ISO found in {}. Run 'archlive iso build' first or pass --iso.",
                config.output_dir.display()
            )
        }),
    }
}

/// Tools the install needs beyond the preflight set, with their packages.
///
/// Checked before the device is touched: a missing `cryptsetup` would
/// otherwise surface only after the partition table was rewritten.
pub fn missing_install_tools(
    filesystem: Filesystem,
    encrypt: bool,
    exists: impl Fn(&str) -> bool,
) -> Vec<(String, &'static str)> {
    let mut needed = vec![(format!("mkfs.{}", filesystem), filesystem.package())];
    if encrypt {
        needed.push(("cryptsetup".to_string(), "cryptsetup"));
    }
    needed.retain(|(tool, _)| !exists(tool));
    needed
}

/// Ask the user to type `YES` before `device` is erased.
pub fn confirm_erase<R: BufRead, W: Write>(
    device: &BlockDevice,
    input: &mut R,
    output: &mut W,
) -> Result<bool> {
    writeln!(output, "\nALL DATA on {} will be destroyed.", device.summary())?;
    write!(output, "Type YES to continue: ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim() == "YES")
}

/// `archlive usb write`.
pub fn write_usb(config: &Config, options: &UsbOptions) -> Result<()> {
    let iso = locate_iso(config, options.iso.as_deref())?;
    println!("Using ISO: {}", iso.display());

    if !options.dry_run {
        preflight::run_preflight_or_fail(Target::Usb, config, Some(&options.device))?;
        let missing = missing_install_tools(options.filesystem, options.encrypt, process::exists);
        if !missing.is_empty() {
            let tools: Vec<&str> = missing.iter().map(|(tool, _)| tool.as_str()).collect();
            let packages: Vec<&str> = missing.iter().map(|(_, pkg)| *pkg).collect();
            bail!(
                "{} not found. Install: sudo pacman -S {}",
                tools.join(", "),
                packages.join(" ")
            );
        }
    }

    let contents = IsoContents::read(&iso)?;
    contents.ensure_installable(&iso)?;

    let validated = validate_device(&options.device, config.min_device_bytes())?;
    for warning in &validated.warnings {
        println!("  [WARN] {}", warning);
    }

    if !options.yes && !options.dry_run {
        let stdin = std::io::stdin();
        let mut input = stdin.lock();
        let mut stdout = std::io::stdout();
        if !confirm_erase(&validated.device, &mut input, &mut stdout)? {
            bail!("Aborted: {} left untouched", options.device.display());
        }
    }

    let uuids = DiskUuids::generate()?;
    tracing::debug!(?uuids, "generated identifiers");

    let mount_base = config.work_dir.join("usb");
    let plan = InstallPlan {
        device: options.device.clone(),
        iso,
        filesystem: options.filesystem,
        encrypt: options.encrypt,
        hostname: options
            .hostname
            .clone()
            .unwrap_or_else(|| config.hostname.clone()),
        microcode: contents.microcode,
        target_mount: mount_base.join("root"),
        iso_mount: mount_base.join("iso"),
    };

    let pipeline = install_pipeline(&plan, &uuids);
    Executor::new(options.dry_run).execute(&pipeline)?;

    if options.dry_run {
        println!("\nDry run complete. Nothing was written to {}.", plan.device.display());
    } else {
        println!("\n{} is ready. Boot it in BIOS/legacy mode.", plan.device.display());
        if plan.encrypt {
            println!("The root filesystem is encrypted; you will be asked for the passphrase at boot.");
        }
    }
    Ok(())
}
