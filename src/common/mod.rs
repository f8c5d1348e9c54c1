//! Shared utilities across archlive modules.

pub mod files;
pub mod mounts;
pub mod shell;
pub mod temp;

pub use files::{copy_tree, newest_with_extension, write_file_with_dirs};
pub use mounts::{ensure_unmounted, remove_tree};
pub use temp::prepare_work_dir;
