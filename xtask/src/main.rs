// Licensed under the Apache-2.0 license

use clap::{Parser, Subcommand};

mod cargo;
mod header;
mod smoke;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Xtask {
    #[command(subcommand)]
    xtask: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run clippy on all targets
    Clippy,
    /// Check that all files are formatted
    Format,
    /// Run pre-check-in checks
    Precheckin,
    /// Check cargo lock
    CargoLock,
    /// Check files for Apache license header
    HeaderCheck,
    /// Add Apache license header to files where it is missing
    HeaderFix,
    /// Run unit and integration tests, then the combine smoke test
    Test,
    /// Run only the combine smoke test
    Smoke,
}

fn precheckin() -> anyhow::Result<()> {
    cargo::cargo_lock()?;
    cargo::format()?;
    cargo::clippy()?;
    header::check()?;
    cargo::test()
}

fn main() {
    let cli = Xtask::parse();
    let result = match &cli.xtask {
        Commands::Clippy => cargo::clippy(),
        Commands::Format => cargo::format(),
        Commands::Precheckin => precheckin(),
        Commands::CargoLock => cargo::cargo_lock(),
        Commands::HeaderCheck => header::check(),
        Commands::HeaderFix => header::fix(),
        Commands::Test => cargo::test(),
        Commands::Smoke => smoke::combine_smoke(),
    };
    result.unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
}
