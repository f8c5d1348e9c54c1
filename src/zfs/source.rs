//! Fetching and verifying the OpenZFS release and kernel headers.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use super::kernel::{KernelFlavor, KernelVersion};
use crate::download::{self, DownloadOptions};
use crate::process::Cmd;

/// Keys OpenZFS signs release tarballs with.
pub const OPENZFS_SIGNING_KEYS: &[&str] = &[
    // Tony Hutter
    "4F3BA9AB6D1F8D683DC2DFB56AD860EED4598027",
    // Brian Behlendorf
    "C33DF142657ED1F7C328A2960AB9E991C6AF658B",
];

pub const KEYSERVER: &str = "hkps://keyserver.ubuntu.com";

/// Downloaded and checked inputs of a ZFS build.
#[derive(Debug, Clone)]
pub struct ZfsSources {
    pub tarball: PathBuf,
    pub signature: PathBuf,
    pub sha256: String,
    pub headers: PathBuf,
}

/// Release tarball URL for `version`.
pub fn tarball_url(base: &str, version: &str) -> String {
    format!(
        "{}/zfs-{}/zfs-{}.tar.gz",
        base.trim_end_matches('/'),
        version,
        version
    )
}

/// Cache directory for everything belonging to `version`.
pub fn source_dir(download_dir: &Path, version: &str) -> PathBuf {
    download_dir.join("zfs").join(version)
}

/// Checksum recorded once a tarball passed signature verification. Later
/// runs reuse the cached tarball only if it still matches.
pub fn verified_checksum_path(tarball: &Path) -> PathBuf {
    let mut name = tarball.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// True when the recorded checksum matches the tarball on disk.
pub fn already_verified(recorded: Option<&str>, sha256: &str) -> bool {
    recorded.is_some_and(|known| known.trim().eq_ignore_ascii_case(sha256))
}

/// Fetch the tarball, its signature and the kernel headers package.
pub fn fetch_sources(
    download_dir: &Path,
    source_url: &str,
    archive_url: &str,
    zfs_version: &str,
    kernel: &KernelVersion,
    flavor: KernelFlavor,
    skip_verify: bool,
) -> Result<ZfsSources> {
    println!("Fetching OpenZFS {} and {} headers...", zfs_version, kernel);
    let dir = source_dir(download_dir, zfs_version);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;

    let url = tarball_url(source_url, zfs_version);
    let tarball = dir.join(format!("zfs-{}.tar.gz", zfs_version));
    let sidecar = verified_checksum_path(&tarball);
    let verified = std::fs::read_to_string(&sidecar).ok();
    let options = match &verified {
        Some(known) => DownloadOptions::default().with_sha256(known.trim()),
        None => DownloadOptions::default(),
    };
    download::fetch(&url, &tarball, &options)?;

    let signature = dir.join(format!("zfs-{}.tar.gz.asc", zfs_version));
    download::fetch(&format!("{}.asc", url), &signature, &DownloadOptions::small())?;

    let headers_dir = download_dir.join("kernel");
    let headers = headers_dir.join(kernel.headers_filename(flavor));
    download::fetch(
        &kernel.headers_url(archive_url, flavor),
        &headers,
        &DownloadOptions::default(),
    )
    .with_context(|| format!("Failed to fetch {} {}", flavor.headers_package(), kernel))?;

    let sha256 = download::sha256_file(&tarball)?;
    if skip_verify {
        println!("  [SKIP] signature verification (--skip-verify)");
    } else if already_verified(verified.as_deref(), &sha256) {
        println!("  [SKIP] signature already verified for this tarball");
    } else {
        verify_signature(&tarball, &signature)?;
        std::fs::write(&sidecar, format!("{}\n", sha256))
            .with_context(|| format!("Failed to write {}", sidecar.display()))?;
    }
    tracing::info!(tarball = %tarball.display(), %sha256, "zfs sources ready");

    Ok(ZfsSources {
        tarball,
        signature,
        sha256,
        headers,
    })
}

/// `gpg --verify`, importing the OpenZFS keys first when they are missing.
pub fn verify_signature(tarball: &Path, signature: &Path) -> Result<()> {
    ensure_signing_keys()?;
    let result = Cmd::new("gpg")
        .args(["--batch", "--verify"])
        .arg_path(signature)
        .arg_path(tarball)
        .allow_fail()
        .run()?;
    if !result.success() {
        bail!(
            "Signature check failed for {}:\n{}\nRe-run with --skip-verify only if you trust the download.",
            tarball.display(),
            result.stderr_trimmed()
        );
    }
    println!("  Signature OK: {}", tarball.display());
    Ok(())
}

fn ensure_signing_keys() -> Result<()> {
    let missing: Vec<&str> = OPENZFS_SIGNING_KEYS
        .iter()
        .copied()
        .filter(|key| {
            !Cmd::new("gpg")
                .args(["--batch", "--list-keys", key])
                .allow_fail()
                .run()
                .map(|r| r.success())
                .unwrap_or(false)
        })
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    println!("  Importing OpenZFS signing keys from {}", KEYSERVER);
    Cmd::new("gpg")
        .args(["--batch", "--keyserver", KEYSERVER, "--recv-keys"])
        .args(&missing)
        .error_msg("Failed to import OpenZFS signing keys")
        .run()?;
    Ok(())
}
