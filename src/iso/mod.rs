//! Live ISO builder.
//!
//! # Pipeline
//!
//! ```text
//! releng profile ──copy──> work/profile ──patch──> mkarchiso ──> output/*.iso
//!                                                                     │
//!                                                              output/*.iso.sha256
//! ```

pub mod profile_dir;

pub use profile_dir::{prepare_profile, ArchzfsSource, PreparedProfile, ProfileSpec};

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::common::{newest_with_extension, prepare_work_dir};
use crate::config::Config;
use crate::download::sha256_file;
use crate::pipeline::{Executor, Pipeline, Stage, Step};
use crate::preflight::{self, Target};
use crate::process::Cmd;
use crate::profile::IsoProfile;

/// Options of `archlive iso build`.
#[derive(Debug, Clone)]
pub struct IsoOptions {
    pub profile: IsoProfile,
    pub zfs: bool,
    /// Local repository to take ZFS packages from (implies `zfs`).
    pub zfs_repo: Option<PathBuf>,
    pub keep_work: bool,
    pub dry_run: bool,
}

/// Decide where ZFS packages come from.
///
/// An explicit `--zfs-repo` wins; otherwise a repository left behind by
/// `archlive zfs build` is used, and the remote archzfs server last.
pub fn archzfs_source(config: &Config, options: &IsoOptions) -> Option<ArchzfsSource> {
    if let Some(repo) = &options.zfs_repo {
        return Some(ArchzfsSource::Local(absolute(&config.base_dir, repo)));
    }
    if !options.zfs {
        return None;
    }
    let local = config.zfs_repo_dir();
    if local.join("archzfs.db").exists() {
        Some(ArchzfsSource::Local(local))
    } else {
        Some(ArchzfsSource::Remote(config.archzfs_server.clone()))
    }
}

fn absolute(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// mkarchiso and its cleanup, as a pipeline.
pub fn iso_pipeline(profile_dir: &Path, archiso_work: &Path, output: &Path, keep_work: bool) -> Pipeline {
    let build = Stage::new("Build image")
        .step(Step::Remove(archiso_work.to_path_buf()))
        .step(Step::Mkdir(output.to_path_buf()))
        .step(Step::Interactive(
            Cmd::new("mkarchiso")
                .arg("-v")
                .arg("-w")
                .arg_path(archiso_work)
                .arg("-o")
                .arg_path(output)
                .arg_path(profile_dir)
                .error_msg("mkarchiso failed"),
        ));

    let mut pipeline = Pipeline::new("Live ISO").stage(build);
    if !keep_work {
        pipeline.push(
            Stage::new("Remove work files")
                .step(Step::Remove(archiso_work.to_path_buf()))
                .step(Step::Remove(profile_dir.to_path_buf())),
        );
    }
    pipeline
}

/// `<iso>.sha256` next to the image.
pub fn checksum_path(iso: &Path) -> PathBuf {
    let mut name = iso.as_os_str().to_owned();
    name.push(".sha256");
    PathBuf::from(name)
}

/// Write a `sha256sum`-compatible checksum file for `iso`.
pub fn write_checksum(iso: &Path) -> Result<PathBuf> {
    let hash = sha256_file(iso)?;
    let file_name = iso
        .file_name()
        .with_context(|| format!("{} has no file name", iso.display()))?
        .to_string_lossy();
    let path = checksum_path(iso);
    fs::write(&path, format!("{}  {}\n", hash, file_name))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Kernel module package the live image installs from the repository.
const LIVE_ZFS_MODULE: &str = "zfs-linux";

/// Warn when a local repository cannot satisfy [`ZFS_PACKAGES`]: the live
/// image boots `linux`, so a repo built only for another flavor breaks pacstrap.
///
/// [`ZFS_PACKAGES`]: crate::profile::ZFS_PACKAGES
pub fn local_repo_warning(package_files: &[String]) -> Option<String> {
    let is_module = |name: &str| {
        name.strip_prefix(LIVE_ZFS_MODULE)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
    };
    if package_files.iter().any(|f| is_module(f)) {
        return None;
    }
    let mut others: Vec<&str> = package_files
        .iter()
        .filter(|f| f.starts_with("zfs-linux-") && f.contains(".pkg.tar"))
        .map(String::as_str)
        .collect();
    others.sort();
    let found = if others.is_empty() {
        "no kernel module packages".to_string()
    } else {
        others.join(", ")
    };
    Some(format!(
        "local ZFS repository has no {} package (found: {}); run 'archlive zfs build --flavor linux'",
        LIVE_ZFS_MODULE, found
    ))
}

fn package_files(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.contains(".pkg.tar"))
                .collect()
        })
        .unwrap_or_default()
}

/// `archlive iso build`. Returns the built image (`None` on dry runs).
pub fn build_iso(config: &Config, options: &IsoOptions) -> Result<Option<PathBuf>> {
    println!("=== Building {} live ISO ===\n", options.profile);

    if !options.dry_run {
        preflight::run_preflight_or_fail(Target::Iso, config, None)?;
    }

    let spec = ProfileSpec {
        profile: options.profile,
        zfs: archzfs_source(config, options),
        iso_name: config.iso_name.clone(),
        publisher: config.iso_publisher.clone(),
        hostname: config.hostname.clone(),
    };
    match &spec.zfs {
        Some(ArchzfsSource::Local(dir)) => {
            println!("ZFS packages: local repository {}", dir.display());
            if let Some(warning) = local_repo_warning(&package_files(dir)) {
                println!("  [WARN] {}", warning);
                tracing::warn!(repo = %dir.display(), "{}", warning);
            }
        }
        Some(ArchzfsSource::Remote(server)) => println!("ZFS packages: {}", server),
        None => println!("ZFS packages: not included"),
    }

    let profile_dir = config.work_dir.join("profile");
    let archiso_work = config.work_dir.join("archiso");

    if options.dry_run {
        println!(
            "  [DRY-RUN] prepare {} from {} ({} extra packages)",
            profile_dir.display(),
            config.archiso_config.display(),
            spec.packages().len()
        );
    } else {
        let dir = prepare_work_dir(&config.work_dir, "profile")?;
        let prepared = prepare_profile(&config.archiso_config, &dir, &spec)?;
        println!(
            "Prepared profile: {} files, {} packages added",
            prepared.files_copied, prepared.packages_added
        );
    }

    let pipeline = iso_pipeline(&profile_dir, &archiso_work, &config.output_dir, options.keep_work);
    Executor::new(options.dry_run).execute(&pipeline)?;

    if options.dry_run {
        return Ok(None);
    }

    let iso = newest_with_extension(&config.output_dir, "iso").with_context(|| {
        format!("mkarchiso finished but no ISO is in {}", config.output_dir.display())
    })?;
    let checksum = write_checksum(&iso)?;
    println!("\nISO:      {}", iso.display());
    println!("Checksum: {}", checksum.display());
    if options.keep_work {
        println!("Work files kept in {}", config.work_dir.display());
    }
    Ok(Some(iso))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn options(zfs: bool, zfs_repo: Option<&str>) -> IsoOptions {
        IsoOptions {
            profile: IsoProfile::Base,
            zfs,
            zfs_repo: zfs_repo.map(PathBuf::from),
            keep_work: false,
            dry_run: true,
        }
    }

    #[test]
    fn test_pipeline_runs_mkarchiso_then_cleans() {
        let p = iso_pipeline(
            Path::new("/w/profile"),
            Path::new("/w/archiso"),
            Path::new("/out"),
            false,
        );
        let mkarchiso = p.position("mkarchiso -v -w /w/archiso -o /out /w/profile").unwrap();
        let cleanup = p.position("remove /w/profile").unwrap();
        assert!(mkarchiso < cleanup);
    }

    #[test]
    fn test_keep_work_skips_cleanup() {
        let p = iso_pipeline(Path::new("/w/profile"), Path::new("/w/archiso"), Path::new("/out"), true);
        assert!(p.position("remove /w/profile").is_none());
        assert_eq!(p.stages.len(), 1);
    }

    #[test]
    fn test_local_repo_for_other_flavor_warns() {
        let lts_only = vec![
            "zfs-utils-2.2.6-1-x86_64.pkg.tar.zst".to_string(),
            "zfs-linux-lts-2.2.6_6.6.30.1-1-x86_64.pkg.tar.zst".to_string(),
        ];
        let warning = local_repo_warning(&lts_only).unwrap();
        assert!(warning.contains("no zfs-linux package"));
        assert!(warning.contains("zfs-linux-lts-2.2.6_6.6.30.1-1-x86_64.pkg.tar.zst"));

        let mut with_linux = lts_only.clone();
        with_linux.push("zfs-linux-2.2.6_6.9.7.arch1.1-1-x86_64.pkg.tar.zst".to_string());
        assert!(local_repo_warning(&with_linux).is_none());

        let empty = local_repo_warning(&[]).unwrap();
        assert!(empty.contains("no kernel module packages"));
    }

    #[test]
    fn test_archzfs_source_selection() {
        let tmp = TempDir::new().unwrap();
        let config = Config::from_vars(tmp.path(), &HashMap::new()).unwrap();

        assert_eq!(archzfs_source(&config, &options(false, None)), None);
        assert_eq!(
            archzfs_source(&config, &options(true, None)),
            Some(ArchzfsSource::Remote(config.archzfs_server.clone()))
        );
        assert_eq!(
            archzfs_source(&config, &options(false, Some("repo"))),
            Some(ArchzfsSource::Local(tmp.path().join("repo")))
        );

        fs::create_dir_all(config.zfs_repo_dir()).unwrap();
        fs::write(config.zfs_repo_dir().join("archzfs.db"), b"").unwrap();
        assert_eq!(
            archzfs_source(&config, &options(true, None)),
            Some(ArchzfsSource::Local(config.zfs_repo_dir()))
        );
    }

    #[test]
    fn test_write_checksum_sha256sum_format() {
        let tmp = TempDir::new().unwrap();
        let iso = tmp.path().join("archlive-base-2024.06.01-x86_64.iso");
        fs::write(&iso, b"hello world").unwrap();

        let path = write_checksum(&iso).unwrap();
        assert_eq!(path, tmp.path().join("archlive-base-2024.06.01-x86_64.iso.sha256"));
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9  archlive-base-2024.06.01-x86_64.iso\n"
        );
    }
}
