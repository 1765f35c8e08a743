// Licensed under the Apache-2.0 license

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use walkdir::WalkDir;

use crate::board::normalize_board_name;
use crate::error::CombineError;

/// Directory searched for prebuilt bootloaders when none is given.
pub const DEFAULT_BOOTLOADER_DIR: &str = "tools";

/// File name prefix of the prebuilt bootloader for `mcu`.
pub fn bootloader_prefix(mcu: &str) -> String {
    format!("mbed-bootloader-{}-", normalize_board_name(mcu))
}

/// Finds the single `mbed-bootloader-<mcu>-*` file directly inside `dir`.
pub fn find_bootloader(dir: &Path, mcu: &str) -> Result<PathBuf> {
    let prefix = bootloader_prefix(mcu);
    let mut candidates: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .map(|entry| entry.into_path())
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => bail!(CombineError::BootloaderNotFound {
            mcu: mcu.to_string(),
            dir: dir.to_path_buf(),
        }),
        1 => Ok(candidates.remove(0)),
        _ => bail!(CombineError::AmbiguousBootloader {
            mcu: mcu.to_string(),
            candidates,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"bootloader").unwrap();
        path
    }

    #[test]
    fn test_single_match() {
        let dir = TempDir::new().unwrap();
        let expected = touch(&dir, "mbed-bootloader-k64f-v3_4_0.bin");
        touch(&dir, "mbed-bootloader-nucleo_f429zi-v3_4_0.bin");
        touch(&dir, "combine_bootloader_with_app.py");
        assert_eq!(find_bootloader(dir.path(), "K64F").unwrap(), expected);
    }

    #[test]
    fn test_no_match() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "mbed-bootloader-nucleo_f429zi-v3_4_0.bin");
        let err = find_bootloader(dir.path(), "k64f").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CombineError>(),
            Some(CombineError::BootloaderNotFound { .. })
        ));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = find_bootloader(&dir.path().join("absent"), "k64f").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CombineError>(),
            Some(CombineError::BootloaderNotFound { .. })
        ));
    }

    #[test]
    fn test_ambiguous_match() {
        let dir = TempDir::new().unwrap();
        let a = touch(&dir, "mbed-bootloader-k64f-v3_3_0.bin");
        let b = touch(&dir, "mbed-bootloader-k64f-v3_4_0.hex");
        let err = find_bootloader(dir.path(), "k64f").unwrap_err();
        match err.downcast_ref::<CombineError>() {
            Some(CombineError::AmbiguousBootloader { candidates, .. }) => {
                assert_eq!(candidates, &vec![a, b]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_subdirectories_are_not_searched() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("old")).unwrap();
        std::fs::write(
            dir.path().join("old").join("mbed-bootloader-k64f-v1.bin"),
            b"old",
        )
        .unwrap();
        let expected = touch(&dir, "mbed-bootloader-k64f-v3.bin");
        assert_eq!(find_bootloader(dir.path(), "k64f").unwrap(), expected);
    }
}
