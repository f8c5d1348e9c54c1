//! Configuration management for archlive.
//!
//! Reads configuration from a .env file and environment variables.
//! Environment variables take precedence over the .env file.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::profile::IsoProfile;

/// Base archiso profile shipped by the `archiso` package.
pub const DEFAULT_ARCHISO_CONFIG: &str = "/usr/share/archiso/configs/releng";

/// OpenZFS release used when none is requested.
pub const DEFAULT_ZFS_VERSION: &str = "2.2.6";

/// Where OpenZFS publishes release tarballs and signatures.
pub const DEFAULT_ZFS_SOURCE_URL: &str = "https://github.com/openzfs/zfs/releases/download";

/// Arch Linux Archive, used to fetch exact kernel headers.
pub const DEFAULT_ARCHIVE_URL: &str = "https://archive.archlinux.org/packages";

/// Remote archzfs repository server line.
pub const DEFAULT_ARCHZFS_SERVER: &str = "https://archzfs.com/$repo/$arch";

const GIB: u64 = 1024 * 1024 * 1024;

/// archlive configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory everything relative is resolved against.
    pub base_dir: PathBuf,
    /// Scratch space for mkarchiso, mounts and the build chroot.
    pub work_dir: PathBuf,
    /// Finished ISOs and packages.
    pub output_dir: PathBuf,
    /// Cached downloads (ZFS sources, kernel headers).
    pub download_dir: PathBuf,
    /// Profile used by `iso build` without `--profile`.
    pub default_profile: IsoProfile,
    /// archiso profile the live image is derived from.
    pub archiso_config: PathBuf,
    pub iso_name: String,
    pub iso_publisher: String,
    pub zfs_version: String,
    pub zfs_source_url: String,
    pub archive_url: String,
    pub archzfs_server: String,
    /// Optional directory with PKGBUILD templates overriding the built-in ones.
    pub zfs_recipe_dir: Option<PathBuf>,
    /// Root of the devtools clean chroot.
    pub chroot_dir: PathBuf,
    /// Hostname written into live images and USB installs.
    pub hostname: String,
    /// Smallest USB device accepted, in GiB.
    pub min_device_gb: u64,
}

impl Config {
    /// Load configuration from `<base_dir>/.env` and the environment.
    pub fn load(base_dir: &Path) -> Result<Self> {
        let mut vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            let iter = dotenvy::from_path_iter(&env_path)
                .with_context(|| format!("Failed to read {}", env_path.display()))?;
            for item in iter {
                let (key, value) =
                    item.with_context(|| format!("Malformed line in {}", env_path.display()))?;
                vars.insert(key, value);
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            if key.starts_with("ARCHLIVE_") {
                vars.insert(key, value);
            }
        }

        Self::from_vars(base_dir, &vars)
    }

    /// Build a configuration from already collected key/value pairs.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Result<Self> {
        let path = |key: &str, default: PathBuf| -> PathBuf {
            vars.get(key)
                .map(|s| resolve(base_dir, s))
                .unwrap_or(default)
        };
        let string = |key: &str, default: &str| -> String {
            vars.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let work_dir = path("ARCHLIVE_WORK_DIR", base_dir.join("work"));
        let download_default = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("archlive");

        let default_profile = match vars.get("ARCHLIVE_PROFILE") {
            Some(name) => name
                .parse()
                .with_context(|| format!("Invalid ARCHLIVE_PROFILE '{}'", name))?,
            None => IsoProfile::Xfce,
        };

        let min_device_gb: u64 = match vars.get("ARCHLIVE_MIN_DEVICE_GB") {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("ARCHLIVE_MIN_DEVICE_GB must be a number, got '{}'", value))?,
            None => 8,
        };
        if min_device_gb.checked_mul(GIB).is_none() {
            bail!("ARCHLIVE_MIN_DEVICE_GB is too large: {}", min_device_gb);
        }

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            chroot_dir: path("ARCHLIVE_CHROOT_DIR", work_dir.join("chroot")),
            work_dir,
            output_dir: path("ARCHLIVE_OUTPUT_DIR", base_dir.join("output")),
            download_dir: path("ARCHLIVE_DOWNLOAD_DIR", download_default),
            default_profile,
            archiso_config: path("ARCHLIVE_ARCHISO_CONFIG", PathBuf::from(DEFAULT_ARCHISO_CONFIG)),
            iso_name: string("ARCHLIVE_ISO_NAME", "archlive"),
            iso_publisher: string("ARCHLIVE_ISO_PUBLISHER", "archlive"),
            zfs_version: string("ARCHLIVE_ZFS_VERSION", DEFAULT_ZFS_VERSION),
            zfs_source_url: string("ARCHLIVE_ZFS_SOURCE_URL", DEFAULT_ZFS_SOURCE_URL),
            archive_url: string("ARCHLIVE_ARCHIVE_URL", DEFAULT_ARCHIVE_URL),
            archzfs_server: string("ARCHLIVE_ARCHZFS_SERVER", DEFAULT_ARCHZFS_SERVER),
            zfs_recipe_dir: vars
                .get("ARCHLIVE_ZFS_RECIPE_DIR")
                .map(|s| resolve(base_dir, s)),
            hostname: string("ARCHLIVE_HOSTNAME", "archlive"),
            min_device_gb,
        })
    }

    /// Minimum USB device size in bytes.
    pub fn min_device_bytes(&self) -> u64 {
        self.min_device_gb.saturating_mul(GIB)
    }

    /// Directory finished ZFS packages and the local repository go to.
    pub fn zfs_repo_dir(&self) -> PathBuf {
        self.output_dir.join("zfs")
    }

    /// Print configuration for debugging.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  ARCHLIVE_WORK_DIR:       {}", self.work_dir.display());
        println!("  ARCHLIVE_OUTPUT_DIR:     {}", self.output_dir.display());
        println!("  ARCHLIVE_DOWNLOAD_DIR:   {}", self.download_dir.display());
        println!("  ARCHLIVE_PROFILE:        {}", self.default_profile);
        println!("  ARCHLIVE_ARCHISO_CONFIG: {}", self.archiso_config.display());
        println!("  ARCHLIVE_ISO_NAME:       {}", self.iso_name);
        println!("  ARCHLIVE_ISO_PUBLISHER:  {}", self.iso_publisher);
        println!("  ARCHLIVE_ZFS_VERSION:    {}", self.zfs_version);
        println!("  ARCHLIVE_ZFS_SOURCE_URL: {}", self.zfs_source_url);
        println!("  ARCHLIVE_ARCHIVE_URL:    {}", self.archive_url);
        println!("  ARCHLIVE_ARCHZFS_SERVER: {}", self.archzfs_server);
        match &self.zfs_recipe_dir {
            Some(dir) => println!("  ARCHLIVE_ZFS_RECIPE_DIR: {}", dir.display()),
            None => println!("  ARCHLIVE_ZFS_RECIPE_DIR: (built-in templates)"),
        }
        println!("  ARCHLIVE_CHROOT_DIR:     {}", self.chroot_dir.display());
        println!("  ARCHLIVE_HOSTNAME:       {}", self.hostname);
        println!("  ARCHLIVE_MIN_DEVICE_GB:  {}", self.min_device_gb);
        if self.archiso_config.join("profiledef.sh").exists() {
            println!("  archiso profile: FOUND");
        } else {
            println!("  archiso profile: NOT FOUND (install the 'archiso' package)");
        }
    }
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
