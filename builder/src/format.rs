// Licensed under the Apache-2.0 license

use std::path::Path;

use anyhow::{bail, Result};

use crate::error::{CombineError, FileRole};

/// Physical encoding of an input or output file, chosen by extension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    /// Flat binary, no address information.
    Binary,
    /// Intel HEX records.
    Hex,
}

impl ImageFormat {
    pub fn from_path(path: &Path, role: FileRole) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("bin") => Ok(ImageFormat::Binary),
            Some("hex") => Ok(ImageFormat::Hex),
            _ => bail!(CombineError::UnsupportedFormat {
                role,
                path: path.to_path_buf(),
            }),
        }
    }
}
