// Licensed under the Apache-2.0 license

//! Combines a bootloader, a firmware metadata header and an application into
//! a single flash image, and checks images built that way.

pub mod board;
pub mod bootloader;
mod combine;
pub mod error;
pub mod format;
pub mod header;
pub mod memory_image;
mod verify;

pub use board::{parse_address, AppConfig, Board, BoardTable};
pub use bootloader::{find_bootloader, DEFAULT_BOOTLOADER_DIR};
pub use combine::{
    combine, default_firmware_version, resolve, CombineArgs, CombinePlan, CombineSummary,
    ImageSource,
};
pub use error::{CombineError, FileRole};
pub use format::ImageFormat;
pub use header::create_header;
pub use memory_image::{MemoryImage, StartAddress, FLAT_FILL_BYTE};
pub use update_header::{FirmwareHeader, FIRMWARE_HEADER_SIZE};
pub use verify::{verify_file, verify_image};

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Workspace root, for tooling that runs from inside the tree.
pub static PROJECT_ROOT: LazyLock<PathBuf> = LazyLock::new(|| {
    let current_dir = std::env::current_dir().unwrap_or_default();
    option_env!("CARGO_MANIFEST_DIR")
        .map(Path::new)
        .filter(|p| p.exists())
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or(current_dir)
});
