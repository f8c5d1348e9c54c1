//! Target kernel identification.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;

use crate::process::Cmd;

/// Architecture every package is built for.
pub const ARCH: &str = "x86_64";

/// Arch kernel package the modules are built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelFlavor {
    #[default]
    Linux,
    Lts,
    Zen,
    Hardened,
}

impl KernelFlavor {
    pub fn all() -> &'static [KernelFlavor] {
        &[
            KernelFlavor::Linux,
            KernelFlavor::Lts,
            KernelFlavor::Zen,
            KernelFlavor::Hardened,
        ]
    }

    /// Kernel package name.
    pub fn package(&self) -> &'static str {
        match self {
            KernelFlavor::Linux => "linux",
            KernelFlavor::Lts => "linux-lts",
            KernelFlavor::Zen => "linux-zen",
            KernelFlavor::Hardened => "linux-hardened",
        }
    }

    /// Matching headers package name.
    pub fn headers_package(&self) -> String {
        format!("{}-headers", self.package())
    }

    /// Name of the ZFS module package for this kernel.
    pub fn zfs_package(&self) -> String {
        format!("zfs-{}", self.package())
    }

    /// Suffix `uname -r` carries for this flavor.
    fn release_suffix(&self) -> &'static str {
        match self {
            KernelFlavor::Linux => "",
            KernelFlavor::Lts => "-lts",
            KernelFlavor::Zen => "-zen",
            KernelFlavor::Hardened => "-hardened",
        }
    }
}

impl fmt::Display for KernelFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.package())
    }
}

impl FromStr for KernelFlavor {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let name = lower.strip_prefix("linux-").unwrap_or(&lower);
        match name {
            "linux" => Ok(KernelFlavor::Linux),
            "lts" => Ok(KernelFlavor::Lts),
            "zen" => Ok(KernelFlavor::Zen),
            "hardened" => Ok(KernelFlavor::Hardened),
            _ => bail!(
                "Unknown kernel flavor '{}'. Choose linux, linux-lts, linux-zen or linux-hardened",
                s
            ),
        }
    }
}

/// Arch package version of a kernel, `pkgver-pkgrel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelVersion {
    pub pkgver: String,
    pub pkgrel: String,
}

impl KernelVersion {
    /// Parse `6.6.8.arch1-1`.
    pub fn parse(version: &str) -> Result<Self> {
        let version = version.trim();
        if version.chars().any(|c| c.is_whitespace() || c == ':' || c == '/') {
            bail!("Invalid kernel version '{}'", version);
        }
        let Some((pkgver, pkgrel)) = version.rsplit_once('-') else {
            bail!(
                "Kernel version '{}' has no pkgrel; expected <pkgver>-<pkgrel>, e.g. 6.6.8.arch1-1",
                version
            );
        };
        if pkgver.is_empty() || pkgrel.is_empty() {
            bail!("Kernel version '{}' has an empty pkgver or pkgrel", version);
        }
        if pkgver.contains('-') {
            bail!("Kernel pkgver '{}' must not contain '-'", pkgver);
        }
        if !pkgrel.chars().all(|c| c.is_ascii_digit() || c == '.') {
            bail!("Kernel pkgrel '{}' must be numeric", pkgrel);
        }
        Ok(Self {
            pkgver: pkgver.to_string(),
            pkgrel: pkgrel.to_string(),
        })
    }

    /// `pkgver-pkgrel`
    pub fn full(&self) -> String {
        format!("{}-{}", self.pkgver, self.pkgrel)
    }

    /// `uname -r` of this kernel, i.e. its `/usr/lib/modules` directory name.
    pub fn uname_release(&self, flavor: KernelFlavor) -> String {
        let base = match self.pkgver.rsplit_once('.') {
            Some((head, tail)) if tail.starts_with(|c: char| c.is_ascii_alphabetic()) => {
                format!("{}-{}", head, tail)
            }
            _ => self.pkgver.clone(),
        };
        format!("{}-{}{}", base, self.pkgrel, flavor.release_suffix())
    }

    /// File name of the headers package in the Arch Linux Archive.
    pub fn headers_filename(&self, flavor: KernelFlavor) -> String {
        format!("{}-{}-{}.pkg.tar.zst", flavor.headers_package(), self.full(), ARCH)
    }

    /// Archive URL of the headers package.
    pub fn headers_url(&self, archive_url: &str, flavor: KernelFlavor) -> String {
        let package = flavor.headers_package();
        let first = &package[..1];
        format!(
            "{}/{}/{}/{}",
            archive_url.trim_end_matches('/'),
            first,
            package,
            self.headers_filename(flavor)
        )
    }

    /// Version token for package versions (no `-` allowed there).
    pub fn pkgver_token(&self) -> String {
        self.full().replace('-', ".")
    }
}

impl fmt::Display for KernelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full())
    }
}

/// Extract `Version` from `pacman -Si` output.
pub fn parse_pacman_version(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "Version").then(|| value.trim().to_string())
    })
}

/// Version of `flavor` currently in the sync repositories.
pub fn repository_version(flavor: KernelFlavor) -> Result<KernelVersion> {
    let result = Cmd::new("pacman")
        .args(["-Si", flavor.package()])
        .env("LC_ALL", "C")
        .error_msg(format!("pacman -Si {} failed", flavor.package()))
        .run()?;
    let version = parse_pacman_version(&result.stdout)
        .with_context(|| format!("pacman -Si {} printed no Version", flavor.package()))?;
    KernelVersion::parse(&version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let v = KernelVersion::parse("6.6.8.arch1-1").unwrap();
        assert_eq!(v.pkgver, "6.6.8.arch1");
        assert_eq!(v.pkgrel, "1");
        assert_eq!(v.full(), "6.6.8.arch1-1");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["6.6.8", "-1", "6.6.8-", "6.6.8-arch1-1", "6.6 .8-1", "1:6.6.8-1", "6.6.8-x"] {
            assert!(KernelVersion::parse(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn test_uname_release_per_flavor() {
        let arch = KernelVersion::parse("6.6.8.arch1-1").unwrap();
        assert_eq!(arch.uname_release(KernelFlavor::Linux), "6.6.8-arch1-1");

        let lts = KernelVersion::parse("6.1.69-1").unwrap();
        assert_eq!(lts.uname_release(KernelFlavor::Lts), "6.1.69-1-lts");

        let zen = KernelVersion::parse("6.6.8.zen1-1").unwrap();
        assert_eq!(zen.uname_release(KernelFlavor::Zen), "6.6.8-zen1-1-zen");

        let hardened = KernelVersion::parse("6.6.8.hardened1-2").unwrap();
        assert_eq!(hardened.uname_release(KernelFlavor::Hardened), "6.6.8-hardened1-2-hardened");
    }

    #[test]
    fn test_headers_url() {
        let v = KernelVersion::parse("6.6.8.arch1-1").unwrap();
        assert_eq!(
            v.headers_url("https://archive.archlinux.org/packages/", KernelFlavor::Linux),
            "https://archive.archlinux.org/packages/l/linux-headers/linux-headers-6.6.8.arch1-1-x86_64.pkg.tar.zst"
        );
    }

    #[test]
    fn test_flavor_from_str() {
        assert_eq!("linux".parse::<KernelFlavor>().unwrap(), KernelFlavor::Linux);
        assert_eq!("linux-lts".parse::<KernelFlavor>().unwrap(), KernelFlavor::Lts);
        assert_eq!("zen".parse::<KernelFlavor>().unwrap(), KernelFlavor::Zen);
        assert!("linux-rt".parse::<KernelFlavor>().is_err());
        for flavor in KernelFlavor::all() {
            assert_eq!(flavor.to_string().parse::<KernelFlavor>().unwrap(), *flavor);
        }
        assert_eq!(KernelFlavor::Hardened.zfs_package(), "zfs-linux-hardened");
    }

    #[test]
    fn test_parse_pacman_version() {
        let output = "Repository      : core\nName            : linux\nVersion         : 6.6.8.arch1-1\nDescription     : The Linux kernel and modules\n";
        assert_eq!(parse_pacman_version(output).as_deref(), Some("6.6.8.arch1-1"));
        assert_eq!(parse_pacman_version("Name : linux\n"), None);
    }

    #[test]
    fn test_pkgver_token() {
        let v = KernelVersion::parse("6.6.8.arch1-1").unwrap();
        assert_eq!(v.pkgver_token(), "6.6.8.arch1.1");
    }
}
