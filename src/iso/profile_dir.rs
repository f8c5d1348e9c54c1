//! Preparing an archiso profile directory.
//!
//! The base profile (releng by default) is copied into the work directory
//! and patched there; the installed copy under `/usr/share/archiso` is never
//! modified. Every patch function is pure and idempotent, so re-running a
//! build on an already prepared directory produces the same files.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use crate::common::shell::{double_quote, set_var};
use crate::common::{copy_tree, write_file_with_dirs};
use crate::profile::IsoProfile;

/// Name of the ZFS repository section in `pacman.conf`.
pub const ARCHZFS_SECTION: &str = "archzfs";

/// ISO 9660 volume labels are at most 32 characters.
pub const MAX_LABEL_LEN: usize = 32;

/// Shell expression archiso evaluates to the build month.
const LABEL_DATE: &str = "$(date --date=\"@${SOURCE_DATE_EPOCH:-$(date +%s)}\" +%Y%m)";

/// Where ZFS packages come from when the image ships ZFS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchzfsSource {
    /// Repository built by `archlive zfs build` (a directory with `archzfs.db`).
    Local(PathBuf),
    /// Remote archzfs mirror (`Server =` line value).
    Remote(String),
}

/// What to bake into the profile.
#[derive(Debug, Clone)]
pub struct ProfileSpec {
    pub profile: IsoProfile,
    /// `None` builds an image without ZFS.
    pub zfs: Option<ArchzfsSource>,
    pub iso_name: String,
    pub publisher: String,
    pub hostname: String,
}

impl ProfileSpec {
    pub fn packages(&self) -> Vec<&'static str> {
        self.profile.all_packages(self.zfs.is_some())
    }
}

/// Summary of a prepared profile.
#[derive(Debug, Clone)]
pub struct PreparedProfile {
    pub dir: PathBuf,
    pub files_copied: usize,
    pub packages_added: usize,
}

/// Copy the base profile `src` into `dst` and apply every patch for `spec`.
pub fn prepare_profile(src: &Path, dst: &Path, spec: &ProfileSpec) -> Result<PreparedProfile> {
    if !src.join("profiledef.sh").is_file() {
        bail!(
            "{} is not an archiso profile (no profiledef.sh). Install the 'archiso' package or set ARCHLIVE_ARCHISO_CONFIG.",
            src.display()
        );
    }

    let files_copied = copy_tree(src, dst)
        .with_context(|| format!("Failed to copy archiso profile {}", src.display()))?;
    tracing::debug!(files = files_copied, src = %src.display(), dst = %dst.display(), "copied base profile");

    let packages_path = dst.join("packages.x86_64");
    let original = read_optional(&packages_path)?;
    let heading = format!("archlive: {} profile", spec.profile);
    let merged = merge_packages(&original, &spec.packages(), &heading);
    let packages_added = package_names(&merged).len() - package_names(&original).len();
    fs::write(&packages_path, merged)
        .with_context(|| format!("Failed to write {}", packages_path.display()))?;

    if let Some(source) = &spec.zfs {
        let conf_path = dst.join("pacman.conf");
        let conf = fs::read_to_string(&conf_path)
            .with_context(|| format!("Failed to read {}", conf_path.display()))?;
        fs::write(&conf_path, set_archzfs_repo(&conf, source))
            .with_context(|| format!("Failed to write {}", conf_path.display()))?;
    }

    let profiledef_path = dst.join("profiledef.sh");
    let profiledef = fs::read_to_string(&profiledef_path)
        .with_context(|| format!("Failed to read {}", profiledef_path.display()))?;
    fs::write(&profiledef_path, patch_profiledef(&profiledef, spec))
        .with_context(|| format!("Failed to write {}", profiledef_path.display()))?;

    let airootfs = dst.join("airootfs");
    write_file_with_dirs(airootfs.join("etc/hostname"), format!("{}\n", spec.hostname))?;
    if let Some(unit) = spec.profile.display_manager() {
        enable_display_manager(&airootfs, unit)?;
    }

    Ok(PreparedProfile {
        dir: dst.to_path_buf(),
        files_copied,
        packages_added,
    })
}

fn read_optional(path: &Path) -> Result<String> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

/// Package names listed in a `packages.x86_64` file.
pub fn package_names(list: &str) -> Vec<&str> {
    list.lines()
        .map(|l| l.split('#').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Append the packages of `extra` missing from `existing` under a
/// `# heading` comment. Existing lines, order and comments are kept.
pub fn merge_packages(existing: &str, extra: &[&str], heading: &str) -> String {
    let present = package_names(existing);
    let mut missing: Vec<&str> = Vec::new();
    for pkg in extra {
        if !present.contains(pkg) && !missing.contains(pkg) {
            missing.push(pkg);
        }
    }

    let mut out = existing.to_string();
    if missing.is_empty() {
        return out;
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("\n# {}\n", heading));
    for pkg in missing {
        out.push_str(pkg);
        out.push('\n');
    }
    out
}

/// Render the `[archzfs]` repository section.
pub fn archzfs_section(source: &ArchzfsSource) -> String {
    match source {
        ArchzfsSource::Local(dir) => format!(
            "[{}]\nSigLevel = Optional TrustAll\nServer = file://{}\n",
            ARCHZFS_SECTION,
            dir.display()
        ),
        ArchzfsSource::Remote(server) => format!(
            "[{}]\nSigLevel = Optional TrustedOnly\nServer = {}\n",
            ARCHZFS_SECTION, server
        ),
    }
}

/// Replace (or add) the `[archzfs]` section of a `pacman.conf`.
pub fn set_archzfs_repo(pacman_conf: &str, source: &ArchzfsSource) -> String {
    let header = format!("[{}]", ARCHZFS_SECTION);
    let mut kept: Vec<&str> = Vec::new();
    let mut in_section = false;
    for line in pacman_conf.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_section = trimmed == header;
        }
        if !in_section {
            kept.push(line);
        }
    }
    while kept.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        kept.pop();
    }

    let mut out = kept.join("\n");
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(&archzfs_section(source));
    out
}

/// Volume label prefix from the ISO name and profile: upper-case,
/// `[A-Z0-9_]` only, short enough to leave room for `_YYYYMM`.
pub fn iso_label_prefix(iso_name: &str, profile: IsoProfile) -> String {
    let raw = format!("{}_{}", iso_name, profile.name()).to_uppercase();
    let mut label: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    label.truncate(MAX_LABEL_LEN - "_YYYYMM".len());
    label
}

/// Patch the identity variables of `profiledef.sh`.
pub fn patch_profiledef(profiledef: &str, spec: &ProfileSpec) -> String {
    let iso_name = format!("{}-{}", spec.iso_name, spec.profile);
    let label = format!("\"{}_{}\"", iso_label_prefix(&spec.iso_name, spec.profile), LABEL_DATE);
    let application = format!("{} live/rescue image ({})", spec.iso_name, spec.profile);

    let patched = set_var(profiledef, "iso_name", &double_quote(&iso_name));
    let patched = set_var(&patched, "iso_label", &label);
    let patched = set_var(&patched, "iso_publisher", &double_quote(&spec.publisher));
    set_var(&patched, "iso_application", &double_quote(&application))
}

/// Point `display-manager.service` at `unit` inside the live root.
fn enable_display_manager(airootfs: &Path, unit: &str) -> Result<()> {
    let link = airootfs.join("etc/systemd/system/display-manager.service");
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)
            .with_context(|| format!("Failed to replace {}", link.display()))?;
    }
    let target = Path::new("/usr/lib/systemd/system").join(unit);
    symlink(&target, &link)
        .with_context(|| format!("Failed to link {} -> {}", link.display(), target.display()))?;
    Ok(())
}
