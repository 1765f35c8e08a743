// Licensed under the Apache-2.0 license

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};
use update_header::FirmwareHeader;
use zerocopy::IntoBytes;

use crate::board::{Board, BoardTable, APP_START_KEY, HEADER_ADDRESS_KEY};
use crate::bootloader::{find_bootloader, DEFAULT_BOOTLOADER_DIR};
use crate::error::{CombineError, FileRole};
use crate::format::ImageFormat;
use crate::header::create_header;
use crate::memory_image::MemoryImage;

/// Options for a combine run, as given on the command line.
#[derive(Clone, Copy, Debug)]
pub struct CombineArgs<'a> {
    pub mcu: Option<&'a str>,
    pub bootloader: Option<&'a Path>,
    pub bootloader_addr: Option<u64>,
    pub bootloader_dir: Option<&'a Path>,
    pub app: &'a Path,
    pub app_addr: Option<u64>,
    pub header_addr: Option<u64>,
    pub output: &'a Path,
    pub version: Option<u64>,
    pub no_bootloader: bool,
}

impl<'a> CombineArgs<'a> {
    pub fn new(app: &'a Path, output: &'a Path) -> Self {
        Self {
            mcu: None,
            bootloader: None,
            bootloader_addr: None,
            bootloader_dir: None,
            app,
            app_addr: None,
            header_addr: None,
            output,
            version: None,
            no_bootloader: false,
        }
    }
}

/// An input file and where its bytes go.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImageSource {
    /// Flat binary placed at `address`.
    Binary { path: PathBuf, address: u64 },
    /// Intel HEX, placed at the addresses it carries.
    Hex { path: PathBuf },
}

impl ImageSource {
    fn new(path: PathBuf, role: FileRole, address: impl FnOnce() -> Result<u64>) -> Result<Self> {
        Ok(match ImageFormat::from_path(&path, role)? {
            ImageFormat::Hex => ImageSource::Hex { path },
            ImageFormat::Binary => ImageSource::Binary {
                path,
                address: address()?,
            },
        })
    }

    pub fn path(&self) -> &Path {
        match self {
            ImageSource::Binary { path, .. } | ImageSource::Hex { path } => path,
        }
    }

    /// Reads the file into its own image. Also returns the payload bytes: the
    /// file contents for a binary, or the flattened contents for HEX.
    pub fn load(&self) -> Result<(Vec<u8>, MemoryImage)> {
        match self {
            ImageSource::Binary { path, address } => {
                let blob = std::fs::read(path)
                    .map_err(|e| anyhow!("Cannot read file '{}': {}", path.display(), e))?;
                let mut image = MemoryImage::new();
                image.load_binary(&blob, *address)?;
                Ok((blob, image))
            }
            ImageSource::Hex { path } => {
                let image = MemoryImage::from_hex_file(path)?;
                Ok((image.to_flat_binary()?, image))
            }
        }
    }
}

/// Fully resolved combine job. Building one performs every check that can
/// fail before output is written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinePlan {
    pub bootloader: Option<ImageSource>,
    pub application: ImageSource,
    pub header_address: u64,
    pub output: PathBuf,
    pub output_format: ImageFormat,
    pub firmware_version: u64,
}

#[derive(Clone, Debug)]
pub struct CombineSummary {
    pub header: FirmwareHeader,
    pub header_address: u64,
    pub output: PathBuf,
    /// Written ranges as (start, length).
    pub segments: Vec<(u64, usize)>,
}

/// Current UNIX time in seconds, the default firmware version.
pub fn default_firmware_version() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

fn board_address(
    explicit: Option<u64>,
    board: Option<(&str, &Board)>,
    what: &'static str,
    key: &'static str,
    configured: impl FnOnce(&Board) -> Option<u64>,
) -> Result<u64> {
    if let Some(address) = explicit {
        return Ok(address);
    }
    let Some((mcu, board)) = board else {
        bail!(CombineError::MissingAddress { what });
    };
    configured(board).ok_or_else(|| {
        anyhow!(CombineError::BoardMissingAddress {
            mcu: mcu.to_string(),
            key,
        })
    })
}

pub fn resolve(args: &CombineArgs, boards: &BoardTable) -> Result<CombinePlan> {
    let output_format = ImageFormat::from_path(args.output, FileRole::Output)?;
    if args.no_bootloader && output_format == ImageFormat::Binary {
        bail!(CombineError::NoBootloaderRequiresHex);
    }

    let board = match args.mcu {
        Some(mcu) => Some((mcu, boards.get(mcu)?)),
        None => None,
    };

    let bootloader = if args.no_bootloader {
        None
    } else {
        let path = match (args.bootloader, board) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some((mcu, _))) => find_bootloader(
                args.bootloader_dir
                    .unwrap_or(Path::new(DEFAULT_BOOTLOADER_DIR)),
                mcu,
            )?,
            (None, None) => bail!(CombineError::NoBootloaderSource),
        };
        Some(ImageSource::new(path, FileRole::Bootloader, || {
            board_address(args.bootloader_addr, board, "bootloader", "mem_start", |b| {
                Some(b.mem_start)
            })
        })?)
    };

    let application = ImageSource::new(args.app.to_path_buf(), FileRole::Application, || {
        board_address(args.app_addr, board, "app", APP_START_KEY, |b| {
            b.application_start
        })
    })?;

    let header_address = board_address(
        args.header_addr,
        board,
        "header",
        HEADER_ADDRESS_KEY,
        |b| b.header_address,
    )?;

    Ok(CombinePlan {
        bootloader,
        application,
        header_address,
        output: args.output.to_path_buf(),
        output_format,
        firmware_version: args.version.unwrap_or_else(default_firmware_version),
    })
}

fn describe_load(role: FileRole, source: &ImageSource) {
    match source {
        ImageSource::Binary { path, address } => log::info!(
            "Loading {} {} to address 0x{:08x}.",
            role,
            path.display(),
            address
        ),
        ImageSource::Hex { path } => {
            log::info!("Loading {} from hex file {}.", role, path.display())
        }
    }
}

/// Bootloader, then header, then application, then one export.
pub fn combine(plan: &CombinePlan) -> Result<CombineSummary> {
    let mut image = MemoryImage::new();

    if let Some(bootloader) = &plan.bootloader {
        describe_load(FileRole::Bootloader, bootloader);
        let (_, loaded) = bootloader.load()?;
        image.merge(&loaded)?;
    }

    let (app_blob, application) = plan.application.load()?;
    let header = create_header(&app_blob, plan.firmware_version);
    log::info!("Writing header to address 0x{:08x}.", plan.header_address);
    image.store_at_address(header.as_bytes(), plan.header_address)?;

    describe_load(FileRole::Application, &plan.application);
    image.merge(&application)?;

    image.export(&plan.output, plan.output_format)?;

    let segments: Vec<(u64, usize)> = image
        .segments()
        .map(|(start, bytes)| (start, bytes.len()))
        .collect();
    for (start, len) in &segments {
        log::debug!(
            "0x{:08x}..0x{:08x} {:>8} bytes",
            start,
            start + *len as u64,
            len
        );
    }

    Ok(CombineSummary {
        header,
        header_address: plan.header_address,
        output: plan.output.clone(),
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::AppConfig;

    fn boards() -> BoardTable {
        let mut boards = BoardTable::builtin();
        boards
            .apply_app_config(
                &AppConfig::from_json_str(
                    r#"{ "target_overrides": { "K64F": {
                        "target.mbed_app_start": "0x20400",
                        "update-client.application-details": "0x20000"
                    } } }"#,
                )
                .unwrap(),
            )
            .unwrap();
        boards
    }

    fn error_of(result: Result<CombinePlan>) -> CombineError {
        match result.unwrap_err().downcast::<CombineError>() {
            Ok(err) => err,
            Err(err) => panic!("unexpected error {err:#}"),
        }
    }

    #[test]
    fn test_explicit_addresses() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.bin"));
        args.bootloader = Some(Path::new("boot.bin"));
        args.bootloader_addr = Some(0x0);
        args.app_addr = Some(0x8400);
        args.header_addr = Some(0x8000);
        args.version = Some(1000);

        let plan = resolve(&args, &BoardTable::default()).unwrap();
        assert_eq!(
            plan,
            CombinePlan {
                bootloader: Some(ImageSource::Binary {
                    path: "boot.bin".into(),
                    address: 0
                }),
                application: ImageSource::Binary {
                    path: "app.bin".into(),
                    address: 0x8400
                },
                header_address: 0x8000,
                output: "out.bin".into(),
                output_format: ImageFormat::Binary,
                firmware_version: 1000,
            }
        );
    }

    #[test]
    fn test_board_addresses() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.hex"));
        args.mcu = Some("K64F");
        args.bootloader = Some(Path::new("boot.bin"));

        let plan = resolve(&args, &boards()).unwrap();
        assert_eq!(
            plan.bootloader,
            Some(ImageSource::Binary {
                path: "boot.bin".into(),
                address: 0
            })
        );
        assert_eq!(
            plan.application,
            ImageSource::Binary {
                path: "app.bin".into(),
                address: 0x20400
            }
        );
        assert_eq!(plan.header_address, 0x20000);
        assert_eq!(plan.output_format, ImageFormat::Hex);
        assert!(plan.firmware_version > 1_600_000_000);
    }

    #[test]
    fn test_explicit_address_beats_board() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.bin"));
        args.mcu = Some("k64f");
        args.bootloader = Some(Path::new("boot.bin"));
        args.app_addr = Some(0x30000);
        args.header_addr = Some(0x2FF00);
        let plan = resolve(&args, &boards()).unwrap();
        assert_eq!(plan.header_address, 0x2FF00);
        assert_eq!(plan.application.path(), Path::new("app.bin"));
        assert!(matches!(
            plan.application,
            ImageSource::Binary {
                address: 0x30000,
                ..
            }
        ));
    }

    #[test]
    fn test_hex_inputs_need_no_address() {
        let mut args = CombineArgs::new(Path::new("app.hex"), Path::new("out.hex"));
        args.bootloader = Some(Path::new("boot.hex"));
        args.header_addr = Some(0x8000);
        let plan = resolve(&args, &BoardTable::default()).unwrap();
        assert_eq!(
            plan.bootloader,
            Some(ImageSource::Hex {
                path: "boot.hex".into()
            })
        );
        assert_eq!(
            plan.application,
            ImageSource::Hex {
                path: "app.hex".into()
            }
        );
    }

    #[test]
    fn test_format_errors() {
        let mut args = CombineArgs::new(Path::new("app.elf"), Path::new("out.bin"));
        args.bootloader = Some(Path::new("boot.bin"));
        args.bootloader_addr = Some(0);
        args.header_addr = Some(0);
        args.app_addr = Some(0);
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::UnsupportedFormat {
                role: FileRole::Application,
                ..
            }
        ));

        args.app = Path::new("app.bin");
        args.output = Path::new("out.srec");
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::UnsupportedFormat {
                role: FileRole::Output,
                ..
            }
        ));

        args.output = Path::new("out.bin");
        args.bootloader = Some(Path::new("boot.axf"));
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::UnsupportedFormat {
                role: FileRole::Bootloader,
                ..
            }
        ));
    }

    #[test]
    fn test_no_bootloader_requires_hex() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.bin"));
        args.no_bootloader = true;
        args.app_addr = Some(0x400);
        args.header_addr = Some(0);
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::NoBootloaderRequiresHex
        ));

        args.output = Path::new("out.hex");
        let plan = resolve(&args, &BoardTable::default()).unwrap();
        assert_eq!(plan.bootloader, None);
    }

    #[test]
    fn test_bootloader_source_required() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.hex"));
        args.app_addr = Some(0x400);
        args.header_addr = Some(0);
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::NoBootloaderSource
        ));
    }

    #[test]
    fn test_bin_bootloader_needs_address() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.hex"));
        args.bootloader = Some(Path::new("boot.bin"));
        args.app_addr = Some(0x400);
        args.header_addr = Some(0);
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::MissingAddress { what: "bootloader" }
        ));
    }

    #[test]
    fn test_missing_addresses() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.hex"));
        args.no_bootloader = true;
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::MissingAddress { what: "app" }
        ));

        args.app_addr = Some(0x400);
        assert!(matches!(
            error_of(resolve(&args, &BoardTable::default())),
            CombineError::MissingAddress { what: "header" }
        ));
    }

    #[test]
    fn test_board_without_configured_address() {
        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.hex"));
        args.no_bootloader = true;
        args.mcu = Some("nucleo_f429zi");
        assert!(matches!(
            error_of(resolve(&args, &boards())),
            CombineError::BoardMissingAddress {
                key: APP_START_KEY,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_board() {
        let mut args = CombineArgs::new(Path::new("app.hex"), Path::new("out.hex"));
        args.mcu = Some("rpi_pico");
        args.no_bootloader = true;
        assert!(matches!(
            error_of(resolve(&args, &boards())),
            CombineError::UnknownBoard(_)
        ));
    }

    #[test]
    fn test_bootloader_discovery() {
        let dir = tempfile::TempDir::new().unwrap();
        let bootloader = dir.path().join("mbed-bootloader-k64f-v3_4_0.bin");
        std::fs::write(&bootloader, [0u8; 4]).unwrap();

        let mut args = CombineArgs::new(Path::new("app.bin"), Path::new("out.bin"));
        args.mcu = Some("k64f");
        args.bootloader_dir = Some(dir.path());
        let plan = resolve(&args, &boards()).unwrap();
        assert_eq!(
            plan.bootloader,
            Some(ImageSource::Binary {
                path: bootloader,
                address: 0
            })
        );
    }
}
