// Licensed under the Apache-2.0 license

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use combine_builder::{
    combine, parse_address, resolve, verify_file, AppConfig, BoardTable, CombineArgs,
    DEFAULT_BOOTLOADER_DIR,
};
use log::LevelFilter;
use simple_logger::SimpleLogger;

/// Default location of the application configuration.
const DEFAULT_APP_CONFIG: &str = "mbed_app.json";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Print segment-level detail
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Combine bootloader, metadata header and application into one image
    Combine {
        /// Board name; supplies default addresses and the bootloader
        #[arg(short, long)]
        mcu: Option<String>,

        /// Bootloader image (.bin or .hex)
        #[arg(short, long)]
        bootloader: Option<PathBuf>,

        /// Load address of a .bin bootloader
        #[arg(long, value_parser = parse_address)]
        bootloader_addr: Option<u64>,

        /// Application image (.bin or .hex)
        #[arg(short, long)]
        app: PathBuf,

        /// Load address of a .bin application
        #[arg(short = 'c', long, value_parser = parse_address)]
        app_addr: Option<u64>,

        /// Address of the firmware metadata header
        #[arg(short = 'd', long, value_parser = parse_address)]
        header_addr: Option<u64>,

        /// Output image (.bin or .hex)
        #[arg(short, long)]
        output: PathBuf,

        /// Firmware version stored in the header [default: current UNIX time]
        #[arg(short = 's', long = "set-version")]
        version: Option<u64>,

        /// Leave the bootloader out; requires .hex output
        #[arg(long, visible_alias = "nb", default_value_t = false)]
        no_bootloader: bool,

        /// mbed_app.json with per-board address overrides
        #[arg(long)]
        app_config: Option<PathBuf>,

        /// JSON board table replacing the built-in one
        #[arg(long)]
        boards: Option<PathBuf>,

        /// Directory searched for mbed-bootloader-<mcu>-* files
        #[arg(long, default_value = DEFAULT_BOOTLOADER_DIR)]
        bootloader_dir: PathBuf,
    },
    /// Check the metadata header (and optionally the application) in an image
    Verify {
        /// Combined image (.bin or .hex)
        #[arg(long)]
        image: PathBuf,

        /// Address of the firmware metadata header
        #[arg(long, value_parser = parse_address)]
        header_addr: u64,

        /// Also check size and hash of the application at this address
        #[arg(long, value_parser = parse_address)]
        app_addr: Option<u64>,

        /// Address of the first byte of a .bin image
        #[arg(long, value_parser = parse_address, default_value = "0")]
        base: u64,
    },
}

fn load_boards(boards: Option<&Path>, app_config: Option<&Path>) -> Result<BoardTable> {
    let mut table = match boards {
        Some(path) => BoardTable::from_json_file(path)?,
        None => BoardTable::builtin(),
    };
    let config = match app_config {
        Some(path) => Some(AppConfig::from_file(path)?),
        None if Path::new(DEFAULT_APP_CONFIG).is_file() => {
            Some(AppConfig::from_file(Path::new(DEFAULT_APP_CONFIG))?)
        }
        None => None,
    };
    if let Some(config) = config {
        table.apply_app_config(&config)?;
    }
    Ok(table)
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = SimpleLogger::new().with_level(level).init();

    let result = match &cli.command {
        Commands::Combine {
            mcu,
            bootloader,
            bootloader_addr,
            app,
            app_addr,
            header_addr,
            output,
            version,
            no_bootloader,
            app_config,
            boards,
            bootloader_dir,
        } => load_boards(boards.as_deref(), app_config.as_deref()).and_then(|boards| {
            let args = CombineArgs {
                mcu: mcu.as_deref(),
                bootloader: bootloader.as_deref(),
                bootloader_addr: *bootloader_addr,
                bootloader_dir: Some(bootloader_dir.as_path()),
                app,
                app_addr: *app_addr,
                header_addr: *header_addr,
                output,
                version: *version,
                no_bootloader: *no_bootloader,
            };
            let plan = resolve(&args, &boards)?;
            let summary = combine(&plan)?;
            println!("Combined binary: {}", summary.output.display());
            Ok(())
        }),
        Commands::Verify {
            image,
            header_addr,
            app_addr,
            base,
        } => verify_file(image, *base, *header_addr, *app_addr).map(|header| {
            println!(
                "{}: header OK (version {}, size {}, sha256 {})",
                image.display(),
                header.firmware_version.get(),
                header.firmware_size.get(),
                hex::encode(header.firmware_hash)
            );
        }),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    });
}
