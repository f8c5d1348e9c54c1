//! Host tool and package availability checks.

use crate::process::{self, Cmd};

use super::types::CheckResult;
use super::Target;

/// A binary one of the operations shells out to.
#[derive(Debug, Clone, Copy)]
pub struct Tool {
    pub name: &'static str,
    /// Arch package providing it.
    pub package: &'static str,
    pub purpose: &'static str,
    pub required: bool,
}

const fn tool(name: &'static str, package: &'static str, purpose: &'static str) -> Tool {
    Tool {
        name,
        package,
        purpose,
        required: true,
    }
}

const fn optional(name: &'static str, package: &'static str, purpose: &'static str) -> Tool {
    Tool {
        name,
        package,
        purpose,
        required: false,
    }
}

const ISO_TOOLS: &[Tool] = &[
    tool("mkarchiso", "archiso", "Builds the live image"),
    tool("pacman", "pacman", "Installs packages into the image"),
];

const USB_TOOLS: &[Tool] = &[
    tool("lsblk", "util-linux", "Inspects the target device"),
    tool("wipefs", "util-linux", "Clears old signatures"),
    tool("sfdisk", "util-linux", "Partitions the device"),
    tool("uuidgen", "util-linux", "Generates filesystem identifiers"),
    tool("udevadm", "systemd", "Waits for partition nodes"),
    tool("partprobe", "parted", "Re-reads the partition table"),
    tool("mkfs.fat", "dosfstools", "Formats the boot partition"),
    tool("mkfs.ext4", "e2fsprogs", "Formats an ext4 root"),
    optional("mkfs.btrfs", "btrfs-progs", "Needed for --filesystem btrfs"),
    optional("mkfs.f2fs", "f2fs-tools", "Needed for --filesystem f2fs"),
    optional("cryptsetup", "cryptsetup", "Needed for --encrypt"),
    tool("bsdtar", "libarchive", "Lists the ISO contents"),
    tool("unsquashfs", "squashfs-tools", "Extracts the live filesystem"),
    tool("arch-chroot", "arch-install-scripts", "Regenerates the initramfs"),
    tool("syslinux", "syslinux", "Installs the bootloader"),
];

const ZFS_TOOLS: &[Tool] = &[
    tool("mkarchroot", "devtools", "Creates the clean build chroot"),
    tool("arch-nspawn", "devtools", "Updates the build chroot"),
    tool("makechrootpkg", "devtools", "Builds packages in the chroot"),
    tool("repo-add", "pacman", "Creates the local repository"),
    tool("gpg", "gnupg", "Verifies source signatures"),
    tool("pacman", "pacman", "Queries the repository kernel version"),
];

/// Pacman packages each target expects to be installed.
pub fn required_packages(target: Target) -> &'static [&'static str] {
    match target {
        Target::Iso => &["archiso"],
        Target::Usb => &["arch-install-scripts", "syslinux", "squashfs-tools", "dosfstools"],
        Target::Zfs => &["devtools", "base-devel", "gnupg"],
        Target::All => &[
            "archiso",
            "arch-install-scripts",
            "syslinux",
            "squashfs-tools",
            "dosfstools",
            "devtools",
            "base-devel",
            "gnupg",
        ],
    }
}

/// Tools each target shells out to, without duplicates.
pub fn tools_for(target: Target) -> Vec<Tool> {
    let groups: &[&[Tool]] = match target {
        Target::Iso => &[ISO_TOOLS],
        Target::Usb => &[USB_TOOLS],
        Target::Zfs => &[ZFS_TOOLS],
        Target::All => &[ISO_TOOLS, USB_TOOLS, ZFS_TOOLS],
    };
    let mut tools: Vec<Tool> = Vec::new();
    for tool in groups.iter().flat_map(|g| g.iter()) {
        if !tools.iter().any(|t| t.name == tool.name) {
            tools.push(*tool);
        }
    }
    tools
}

/// Check host tools are installed.
pub fn check_host_tools(target: Target) -> Vec<CheckResult> {
    tools_for(target)
        .into_iter()
        .map(|t| check_tool_exists(t.name, t.package, t.purpose, t.required))
        .collect()
}

/// Check if a tool exists in PATH.
fn check_tool_exists(tool: &str, package: &str, purpose: &str, required: bool) -> CheckResult {
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", package, purpose);
            if required {
                CheckResult::fail(tool, &msg)
            } else {
                CheckResult::warn(tool, &msg)
            }
        }
    }
}

/// Check required pacman packages with `pacman -Q`.
pub fn check_packages(target: Target) -> Vec<CheckResult> {
    if !process::exists("pacman") {
        return vec![CheckResult::fail(
            "pacman packages",
            "pacman not found - archlive must run on Arch Linux",
        )];
    }
    required_packages(target)
        .iter()
        .map(|pkg| check_package(pkg))
        .collect()
}

fn check_package(package: &str) -> CheckResult {
    let name = format!("package {}", package);
    match Cmd::new("pacman").args(["-Q", package]).allow_fail().run() {
        Ok(result) if result.success() => CheckResult::pass_with(&name, result.stdout_trimmed()),
        // base-devel is a group on older systems; pacman -Qg covers that
        _ if package == "base-devel" && group_installed(package) => {
            CheckResult::pass_with(&name, "group installed")
        }
        _ => CheckResult::fail(&name, &format!("Not installed. Run: pacman -S {}", package)),
    }
}

fn group_installed(group: &str) -> bool {
    Cmd::new("pacman")
        .args(["-Qg", group])
        .allow_fail()
        .run()
        .map(|r| r.success())
        .unwrap_or(false)
}
