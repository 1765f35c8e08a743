// Licensed under the Apache-2.0 license

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which input or output a path was supplied for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileRole {
    Bootloader,
    Application,
    Output,
    /// A combined image given to `verify`.
    Image,
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileRole::Bootloader => "Bootloader",
            FileRole::Application => "Application",
            FileRole::Output => "Output",
            FileRole::Image => "Image",
        })
    }
}

/// Errors raised while resolving, combining or verifying an image.
#[derive(Error, Debug)]
pub enum CombineError {
    #[error("{role} format can only be .bin or .hex (got {path:?})")]
    UnsupportedFormat { role: FileRole, path: PathBuf },
    #[error("--no-bootloader option requires the output format to be .hex")]
    NoBootloaderRequiresHex,
    #[error("Please specify bootloader location -b or MCU -m")]
    NoBootloaderSource,
    #[error(
        "Specified MCU {mcu} does not have a bootloader in {dir:?}. \
         Please specify bootloader location with -b"
    )]
    BootloaderNotFound { mcu: String, dir: PathBuf },
    #[error(
        "Specified MCU {mcu} has more than one bootloader: {candidates:?}. \
         Please specify bootloader location with -b"
    )]
    AmbiguousBootloader { mcu: String, candidates: Vec<PathBuf> },
    #[error("Please specify {what} address or MCU")]
    MissingAddress { what: &'static str },
    #[error("MCU {mcu} has no configured {key}")]
    BoardMissingAddress { mcu: String, key: &'static str },
    #[error("Unknown MCU {0}")]
    UnknownBoard(String),
    #[error("Invalid address literal {0:?}: expected decimal or 0x-prefixed hex")]
    InvalidAddress(String),
    #[error("Writing {len} bytes at 0x{address:x} overflows the address space")]
    AddressOverflow { address: u64, len: usize },
    #[error("Address 0x{0:x} cannot be represented in Intel HEX")]
    HexAddressOutOfRange(u64),
    #[error("{path:?}: malformed Intel HEX: {reason}")]
    HexParse { path: PathBuf, reason: String },
    #[error("Header not found at 0x{0:08x}")]
    HeaderMissing(u64),
    #[error("Invalid header at 0x{address:08x}: {reason}")]
    InvalidHeader { address: u64, reason: String },
    #[error("Application at 0x{address:08x} is shorter than the {size} bytes the header describes")]
    ApplicationTruncated { address: u64, size: u64 },
    #[error("Application hash mismatch: header {expected}, image {actual}")]
    HashMismatch { expected: String, actual: String },
}
