//! Pipeline executor - interprets Step variants and performs actual operations.
//!
//! Steps run strictly in order and the first failure stops the pipeline.
//! Before the error is returned, every mount and LUKS mapping still
//! registered is undone in reverse order.

use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{Pipeline, Step};
use crate::common::remove_tree;
use crate::process::Cmd;
use crate::timing::Timer;

/// What a cleanup entry undoes.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CleanupKey {
    Mount(PathBuf),
    Crypt(String),
}

#[derive(Debug, Clone)]
struct Cleanup {
    key: CleanupKey,
    cmd: Cmd,
}

/// Runs pipelines, or prints them when `dry_run` is set.
pub struct Executor {
    dry_run: bool,
    cleanup: Vec<Cleanup>,
}

impl Executor {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            cleanup: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute every stage of `pipeline`.
    pub fn execute(&mut self, pipeline: &Pipeline) -> Result<()> {
        let total = pipeline.len();
        let timer = Timer::start(&pipeline.name);
        if self.dry_run {
            println!("=== {} (dry run) ===\n", pipeline.name);
        } else {
            println!("=== {} ===\n", pipeline.name);
        }

        let result = self.run_stages(pipeline, total);
        let cleanup_result = self.run_cleanup();
        match result {
            Ok(()) => {
                cleanup_result?;
                timer.finish();
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup_err) = cleanup_result {
                    eprintln!("  [WARN] Cleanup incomplete: {:#}", cleanup_err);
                }
                Err(e)
            }
        }
    }

    fn run_stages(&mut self, pipeline: &Pipeline, total: usize) -> Result<()> {
        let mut n = 0;
        for stage in &pipeline.stages {
            println!("{}...", stage.name);
            for step in &stage.steps {
                n += 1;
                if self.dry_run {
                    println!("  [DRY-RUN] [{}/{}] {}", n, total, step.describe());
                    continue;
                }
                println!("  [{}/{}] {}", n, total, step.describe());
                self.execute_step(step)
                    .with_context(|| format!("in stage '{}': {}", stage.name, step.describe()))?;
            }
        }
        Ok(())
    }

    /// Execute a single step by routing to the appropriate handler.
    fn execute_step(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Run(cmd) => {
                cmd.clone().run()?;
            }
            Step::Interactive(cmd) => {
                cmd.clone().run_interactive()?;
            }
            Step::Mkdir(path) => {
                fs::create_dir_all(path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
            }
            Step::WriteFile {
                path,
                contents,
                mode,
            } => write_file(path, contents, *mode)?,
            Step::AppendFile { path, contents } => append_file(path, contents)?,
            Step::Remove(path) => remove_path(path)?,
            Step::Mount {
                source,
                target,
                fstype,
                options,
            } => {
                fs::create_dir_all(target)
                    .with_context(|| format!("Failed to create mount point {}", target.display()))?;
                let mut cmd = Cmd::new("mount");
                if let Some(fstype) = fstype {
                    cmd = cmd.args(["-t", fstype.as_str()]);
                }
                if let Some(options) = options {
                    cmd = cmd.args(["-o", options.as_str()]);
                }
                cmd.arg_path(source).arg_path(target).run()?;
                self.cleanup.push(Cleanup {
                    key: CleanupKey::Mount(target.clone()),
                    cmd: Cmd::new("umount").arg("-l").arg_path(target),
                });
            }
            Step::Unmount(target) => {
                Cmd::new("umount").arg_path(target).run()?;
                self.forget(&CleanupKey::Mount(target.clone()));
            }
            Step::CryptOpen { device, name } => {
                Cmd::new("cryptsetup")
                    .arg("open")
                    .arg_path(device)
                    .arg(name)
                    .error_msg(format!("Failed to open LUKS container {}", device.display()))
                    .run_interactive()?;
                self.cleanup.push(Cleanup {
                    key: CleanupKey::Crypt(name.clone()),
                    cmd: Cmd::new("cryptsetup").args(["close", name.as_str()]),
                });
            }
            Step::CryptClose(name) => {
                Cmd::new("cryptsetup").args(["close", name.as_str()]).run()?;
                self.forget(&CleanupKey::Crypt(name.clone()));
            }
            Step::Sync => {
                Cmd::new("sync").run()?;
            }
        }
        Ok(())
    }

    /// Drop the newest cleanup entry matching `key`.
    fn forget(&mut self, key: &CleanupKey) {
        if let Some(pos) = self.cleanup.iter().rposition(|c| &c.key == key) {
            self.cleanup.remove(pos);
        }
    }

    /// Undo everything still registered, newest first. Keeps going on errors
    /// and reports the first one.
    fn run_cleanup(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(entry) = self.cleanup.pop() {
            println!("  [CLEANUP] {}", entry.cmd.display());
            if let Err(e) = entry.cmd.clone().run() {
                tracing::warn!(command = %entry.cmd.display(), error = %e, "cleanup failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn write_file(path: &Path, contents: &str, mode: Option<u32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to set permissions: {}", path.display()))?;
    }
    Ok(())
}

fn append_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for append", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    Ok(())
}

fn remove_path(path: &Path) -> Result<()> {
    // symlink_metadata so dangling symlinks are removed too
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => remove_tree(path),
        Ok(_) => fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display())),
        Err(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;
    use tempfile::TempDir;

    fn touch(path: &Path) -> Cmd {
        Cmd::new("touch").arg_path(path)
    }

    #[test]
    fn test_file_steps() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let pipeline = Pipeline::new("files").stage(
            Stage::new("configure")
                .step(Step::Mkdir(root.join("etc/conf.d")))
                .step(Step::WriteFile {
                    path: root.join("etc/hostname"),
                    contents: "archlive\n".into(),
                    mode: Some(0o600),
                })
                .step(Step::AppendFile {
                    path: root.join("etc/fstab"),
                    contents: "UUID=a / ext4 rw 0 1\n".into(),
                })
                .step(Step::AppendFile {
                    path: root.join("etc/fstab"),
                    contents: "UUID=b /boot vfat rw 0 2\n".into(),
                }),
        );

        Executor::new(false).execute(&pipeline).unwrap();

        assert!(root.join("etc/conf.d").is_dir());
        assert_eq!(fs::read_to_string(root.join("etc/hostname")).unwrap(), "archlive\n");
        let mode = fs::metadata(root.join("etc/hostname")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(
            fs::read_to_string(root.join("etc/fstab")).unwrap(),
            "UUID=a / ext4 rw 0 1\nUUID=b /boot vfat rw 0 2\n"
        );
    }

    #[test]
    fn test_remove_missing_path_is_ok() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("archiso.conf");
        fs::write(&file, "HOOKS=(archiso)").unwrap();
        let pipeline = Pipeline::new("rm").stage(
            Stage::new("remove")
                .step(Step::Remove(file.clone()))
                .step(Step::Remove(dir.path().join("never-existed"))),
        );
        Executor::new(false).execute(&pipeline).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let pipeline = Pipeline::new("dry").stage(
            Stage::new("all")
                .step(Step::Run(touch(&marker)))
                .step(Step::write(dir.path().join("file"), "x"))
                .step(Step::Run(Cmd::new("false"))),
        );

        let mut executor = Executor::new(true);
        assert!(executor.is_dry_run());
        executor.execute(&pipeline).unwrap();
        assert!(!marker.exists());
        assert!(!dir.path().join("file").exists());
    }

    #[test]
    fn test_stops_at_first_failure() {
        let dir = TempDir::new().unwrap();
        let after = dir.path().join("after");
        let pipeline = Pipeline::new("fail").stage(
            Stage::new("Partition")
                .step(Step::Run(Cmd::new("false").error_msg("sfdisk failed")))
                .step(Step::Run(touch(&after))),
        );

        let err = Executor::new(false).execute(&pipeline).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("in stage 'Partition'"));
        assert!(msg.contains("sfdisk failed"));
        assert!(!after.exists(), "steps after a failure must not run");
    }

    fn log_to(log: &Path, line: &str) -> Cmd {
        Cmd::new("sh")
            .arg("-c")
            .arg(format!("echo {} >> \"$1\"", line))
            .arg("sh")
            .arg_path(log)
    }

    #[test]
    fn test_failure_undoes_registered_entries_in_reverse() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("undo.log");
        let mut executor = Executor::new(false);
        executor.cleanup.push(Cleanup {
            key: CleanupKey::Mount(dir.path().join("root")),
            cmd: log_to(&log, "umount-root"),
        });
        executor.cleanup.push(Cleanup {
            key: CleanupKey::Crypt("cryptroot".into()),
            cmd: Cmd::new("false"),
        });
        executor.cleanup.push(Cleanup {
            key: CleanupKey::Mount(dir.path().join("root/boot")),
            cmd: log_to(&log, "umount-boot"),
        });

        let pipeline = Pipeline::new("install").stage(
            Stage::new("Bootloader")
                .step(Step::Run(Cmd::new("false").error_msg("syslinux install failed"))),
        );
        let err = executor.execute(&pipeline).unwrap_err();

        assert_eq!(
            fs::read_to_string(&log).unwrap(),
            "umount-boot\numount-root\n"
        );
        let msg = format!("{:#}", err);
        assert!(msg.contains("syslinux install failed"));
        assert!(msg.contains("in stage 'Bootloader'"));
        // the failed LUKS close is reported as a warning, not returned
        assert!(!msg.contains("'false' failed"));
        assert!(executor.cleanup.is_empty());
    }

    #[test]
    fn test_forget_drops_newest_matching_entry() {
        let mut executor = Executor::new(false);
        for target in ["/mnt", "/mnt/boot", "/mnt"] {
            executor.cleanup.push(Cleanup {
                key: CleanupKey::Mount(PathBuf::from(target)),
                cmd: Cmd::new("umount").arg(target),
            });
        }
        executor.forget(&CleanupKey::Mount(PathBuf::from("/mnt")));
        let remaining: Vec<_> = executor.cleanup.iter().map(|c| c.key.clone()).collect();
        assert_eq!(
            remaining,
            vec![
                CleanupKey::Mount(PathBuf::from("/mnt")),
                CleanupKey::Mount(PathBuf::from("/mnt/boot")),
            ]
        );
    }
}
