//! Declarative pipelines of system operations.
//!
//! Every archlive operation (ISO build, USB install, ZFS build) is a linear
//! sequence of shell-outs and small file edits. Instead of running them inline,
//! the operation builds a [`Pipeline`] describing WHAT must happen, and the
//! [`executor`] decides HOW: for real, or as a dry run.
//!
//! ```text
//! Pipeline (DATA)                      Executor (LOGIC)
//! ─────────────────                    ─────────────────
//! Stage "Partition" {                  for stage in pipeline.stages {
//!   Run(wipefs -a /dev/sdb),             for step in stage.steps {
//!   Run(sfdisk /dev/sdb <<< script),       execute_step(step)?;
//! }                                      }
//! Stage "Mount" {                      }
//!   Mount(/dev/sdb2 -> /mnt),          undo remaining mounts in reverse
//! }
//! ```
//!
//! Mounts and LUKS mappings register cleanup entries,
//! so a failure halfway through never leaves a device mounted.

pub mod executor;

pub use executor::Executor;

use std::fmt;
use std::path::PathBuf;

use crate::process::Cmd;

/// A single operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Run a command, capturing output. Fails on non-zero exit.
    Run(Cmd),
    /// Run a command attached to the terminal (prompts, long builds).
    Interactive(Cmd),
    /// Create a directory and its parents.
    Mkdir(PathBuf),
    /// Write a file, creating parent directories. `mode` is applied when set.
    WriteFile {
        path: PathBuf,
        contents: String,
        mode: Option<u32>,
    },
    /// Append to a file, creating it if missing.
    AppendFile { path: PathBuf, contents: String },
    /// Remove a file or directory tree. Missing paths are not an error.
    Remove(PathBuf),
    /// Mount `source` on `target` (created if missing). Registers an unmount.
    Mount {
        source: PathBuf,
        target: PathBuf,
        fstype: Option<String>,
        options: Option<String>,
    },
    /// Unmount a target mounted earlier in the pipeline.
    Unmount(PathBuf),
    /// Open a LUKS container as `/dev/mapper/<name>`. Registers a close.
    CryptOpen { device: PathBuf, name: String },
    /// Close a LUKS mapping opened earlier in the pipeline.
    CryptClose(String),
    /// Flush filesystem buffers.
    Sync,
}

impl Step {
    pub fn run(cmd: Cmd) -> Self {
        Step::Run(cmd)
    }

    pub fn write(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Step::WriteFile {
            path: path.into(),
            contents: contents.into(),
            mode: None,
        }
    }

    pub fn mount(source: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Step::Mount {
            source: source.into(),
            target: target.into(),
            fstype: None,
            options: None,
        }
    }

    /// Human-readable one-line description.
    pub fn describe(&self) -> String {
        match self {
            Step::Run(cmd) | Step::Interactive(cmd) => cmd.display(),
            Step::Mkdir(path) => format!("mkdir -p {}", path.display()),
            Step::WriteFile { path, mode, .. } => match mode {
                Some(mode) => format!("write {} (mode {:o})", path.display(), mode),
                None => format!("write {}", path.display()),
            },
            Step::AppendFile { path, .. } => format!("append to {}", path.display()),
            Step::Remove(path) => format!("remove {}", path.display()),
            Step::Mount {
                source,
                target,
                fstype,
                options,
            } => {
                let mut line = format!("mount {} -> {}", source.display(), target.display());
                if let Some(fstype) = fstype {
                    line.push_str(&format!(" [{}]", fstype));
                }
                if let Some(options) = options {
                    line.push_str(&format!(" ({})", options));
                }
                line
            }
            Step::Unmount(target) => format!("umount {}", target.display()),
            Step::CryptOpen { device, name } => {
                format!("cryptsetup open {} {}", device.display(), name)
            }
            Step::CryptClose(name) => format!("cryptsetup close {}", name),
            Step::Sync => "sync".to_string(),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A named group of steps, reported as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Total number of steps across all stages.
    pub fn len(&self) -> usize {
        self.stages.iter().map(|s| s.steps.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All steps in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.stages.iter().flat_map(|s| s.steps.iter())
    }

    /// Commands run by the pipeline, in order (deferred ones excluded).
    pub fn commands(&self) -> Vec<&Cmd> {
        self.steps()
            .filter_map(|step| match step {
                Step::Run(cmd) | Step::Interactive(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    /// Index of the first step whose description contains `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.steps().position(|s| s.describe().contains(needle))
    }

    /// Multi-line listing of every stage and step.
    pub fn describe(&self) -> String {
        let mut out = format!("{}\n", self.name);
        let mut n = 0;
        for stage in &self.stages {
            out.push_str(&format!("  {}\n", stage.name));
            for step in &stage.steps {
                n += 1;
                out.push_str(&format!("    {:>2}. {}\n", n, step.describe()));
            }
        }
        out
    }
}
