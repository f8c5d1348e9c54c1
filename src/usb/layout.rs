//! On-disk layout of a persistent USB installation.
//!
//! Pure rendering of the partition script and the configuration files the
//! installed system boots with. Identifiers are generated once up front
//! ([`DiskUuids`]) so every file agrees on them.

use anyhow::{bail, Result};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::process::Cmd;

/// Size of the FAT32 boot partition.
pub const BOOT_SIZE_MIB: u64 = 512;
/// First usable sector of partition 1 (1 MiB alignment).
pub const FIRST_SECTOR: u64 = 2048;
pub const BOOT_LABEL: &str = "ARCHBOOT";
pub const ROOT_LABEL: &str = "ARCHROOT";
/// Device-mapper name of the opened LUKS container.
pub const CRYPT_NAME: &str = "cryptroot";
/// Where the `syslinux` package installs its BIOS modules.
pub const SYSLINUX_BIOS_DIR: &str = "/usr/lib/syslinux/bios";
/// Modules `menu.c32` needs next to `syslinux.cfg`.
pub const SYSLINUX_MODULES: &[&str] = &["menu.c32", "libutil.c32", "libcom32.c32"];

/// Root filesystem of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filesystem {
    #[default]
    Ext4,
    Btrfs,
    F2fs,
}

impl Filesystem {
    pub fn name(&self) -> &'static str {
        match self {
            Filesystem::Ext4 => "ext4",
            Filesystem::Btrfs => "btrfs",
            Filesystem::F2fs => "f2fs",
        }
    }

    /// `mkfs` invocation formatting `device` with a fixed UUID.
    pub fn mkfs(&self, device: &Path, uuid: &str) -> Cmd {
        let cmd = Cmd::new(format!("mkfs.{}", self.name()));
        match self {
            Filesystem::Ext4 => cmd.args(["-F", "-L", ROOT_LABEL, "-U", uuid]),
            Filesystem::Btrfs => cmd.args(["-f", "-L", ROOT_LABEL, "-U", uuid]),
            Filesystem::F2fs => cmd.args(["-f", "-l", ROOT_LABEL, "-U", uuid]),
        }
        .arg_path(device)
    }

    /// Mount options used in fstab.
    pub fn mount_options(&self) -> &'static str {
        match self {
            Filesystem::Ext4 => "rw,relatime",
            Filesystem::Btrfs => "rw,relatime,compress=zstd",
            Filesystem::F2fs => "rw,relatime,lazytime",
        }
    }

    /// fsck pass number; only ext4 gets checked at boot.
    pub fn fsck_pass(&self) -> u8 {
        match self {
            Filesystem::Ext4 => 1,
            _ => 0,
        }
    }

    /// Arch package providing the userspace tools.
    pub fn package(&self) -> &'static str {
        match self {
            Filesystem::Ext4 => "e2fsprogs",
            Filesystem::Btrfs => "btrfs-progs",
            Filesystem::F2fs => "f2fs-tools",
        }
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Filesystem {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ext4" => Ok(Filesystem::Ext4),
            "btrfs" => Ok(Filesystem::Btrfs),
            "f2fs" => Ok(Filesystem::F2fs),
            other => bail!("Unknown filesystem '{}'. Choose one of: ext4, btrfs, f2fs", other),
        }
    }
}

/// Identifiers baked into the partitions and every config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskUuids {
    /// UUID of the root filesystem.
    pub root_fs: String,
    /// FAT volume serial of the boot partition, `XXXX-XXXX`.
    pub boot_serial: String,
    /// UUID of the LUKS header (unused without encryption).
    pub luks: String,
}

impl DiskUuids {
    /// Generate fresh identifiers with `uuidgen`.
    pub fn generate() -> Result<Self> {
        let root_fs = uuidgen()?;
        let luks = uuidgen()?;
        let serial_source = uuidgen()?;
        Ok(Self {
            root_fs,
            boot_serial: boot_serial_from(&serial_source)?,
            luks,
        })
    }

    /// Boot serial without the dash, as `mkfs.fat -i` expects it.
    pub fn boot_volume_id(&self) -> String {
        self.boot_serial.replace('-', "")
    }
}

fn uuidgen() -> Result<String> {
    let result = Cmd::new("uuidgen")
        .error_msg("uuidgen failed (install util-linux)")
        .run()?;
    Ok(result.stdout_trimmed().to_lowercase())
}

/// FAT serial (`ABCD-1234`) from the first eight hex digits of a UUID.
fn boot_serial_from(uuid: &str) -> Result<String> {
    let hex: String = uuid.chars().filter(|c| c.is_ascii_hexdigit()).take(8).collect();
    if hex.len() != 8 {
        bail!("Cannot derive a volume serial from '{}'", uuid);
    }
    let hex = hex.to_uppercase();
    Ok(format!("{}-{}", &hex[..4], &hex[4..]))
}

/// `sfdisk` script: DOS label, bootable FAT32 boot partition, Linux root
/// partition filling the rest of the disk.
pub fn sfdisk_script() -> String {
    let boot_sectors = BOOT_SIZE_MIB * 1024 * 1024 / 512;
    format!(
        "label: dos\n\
         start={}, size={}, type=c, bootable\n\
         start={}, type=83\n",
        FIRST_SECTOR,
        boot_sectors,
        FIRST_SECTOR + boot_sectors
    )
}

pub fn fstab(uuids: &DiskUuids, filesystem: Filesystem) -> String {
    format!(
        "# Static information about the filesystems.\n\
         # <file system>\t<dir>\t<type>\t<options>\t<dump>\t<pass>\n\
         UUID={}\t/\t{}\t{}\t0\t{}\n\
         UUID={}\t/boot\tvfat\trw,relatime,fmask=0022,dmask=0022\t0\t2\n",
        uuids.root_fs,
        filesystem.name(),
        filesystem.mount_options(),
        filesystem.fsck_pass(),
        uuids.boot_serial
    )
}

/// Kernel command line locating the root filesystem.
pub fn kernel_cmdline(uuids: &DiskUuids, encrypted: bool) -> String {
    if encrypted {
        format!(
            "cryptdevice=UUID={}:{} root=/dev/mapper/{} rw",
            uuids.luks, CRYPT_NAME, CRYPT_NAME
        )
    } else {
        format!("root=UUID={} rw", uuids.root_fs)
    }
}

/// `syslinux.cfg` living in `/boot/syslinux`. Microcode images are loaded
/// before the initramfs.
pub fn syslinux_cfg(cmdline: &str, microcode: &[String]) -> String {
    let initrd = |image: &str| -> String {
        microcode
            .iter()
            .map(|m| format!("../{}", m))
            .chain(std::iter::once(format!("../{}", image)))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        "DEFAULT arch\n\
         PROMPT 0\n\
         TIMEOUT 50\n\
         UI menu.c32\n\
         MENU TITLE Arch Linux (persistent)\n\
         \n\
         LABEL arch\n\
         \x20   MENU LABEL Arch Linux\n\
         \x20   LINUX ../vmlinuz-linux\n\
         \x20   APPEND {cmdline}\n\
         \x20   INITRD {default}\n\
         \n\
         LABEL archfallback\n\
         \x20   MENU LABEL Arch Linux (fallback initramfs)\n\
         \x20   LINUX ../vmlinuz-linux\n\
         \x20   APPEND {cmdline}\n\
         \x20   INITRD {fallback}\n",
        cmdline = cmdline,
        default = initrd("initramfs-linux.img"),
        fallback = initrd("initramfs-linux-fallback.img"),
    )
}

/// `mkinitcpio.conf` for the installed system.
///
/// No `autodetect` hook in the default image: the stick has to boot on any
/// machine, not just the one it was written on.
pub fn mkinitcpio_conf(encrypted: bool) -> String {
    let mut hooks = vec![
        "base", "udev", "microcode", "modconf", "kms", "keyboard", "keymap", "consolefont", "block",
    ];
    if encrypted {
        hooks.push("encrypt");
    }
    hooks.extend(["filesystems", "fsck"]);
    format!(
        "MODULES=()\nBINARIES=()\nFILES=()\nHOOKS=({})\n",
        hooks.join(" ")
    )
}

/// Standard `linux.preset`, replacing the archiso one.
pub fn linux_preset() -> String {
    "# mkinitcpio preset file for the 'linux' package\n\
     \n\
     ALL_kver=\"/boot/vmlinuz-linux\"\n\
     \n\
     PRESETS=('default' 'fallback')\n\
     \n\
     default_image=\"/boot/initramfs-linux.img\"\n\
     \n\
     fallback_image=\"/boot/initramfs-linux-fallback.img\"\n\
     fallback_options=\"-S autodetect\"\n"
        .to_string()
}
