// Licensed under the Apache-2.0 license

use std::process::{Command, Stdio};

use anyhow::{bail, Result};
use combine_builder::PROJECT_ROOT;

fn cargo(args: &[&str], quiet: bool) -> Result<()> {
    println!("Running: cargo {}", args.join(" "));
    let mut command = Command::new("cargo");
    command.current_dir(&*PROJECT_ROOT).args(args);
    if quiet {
        command.stdout(Stdio::null());
    }
    let status = command.status()?;
    if !status.success() {
        bail!("cargo {} failed", args[0]);
    }
    Ok(())
}

pub(crate) fn cargo_lock() -> Result<()> {
    cargo(&["tree", "--locked"], true).map_err(|_| {
        anyhow::anyhow!(
            "cargo tree --locked failed; Please include required changes to Cargo.lock in your pull request"
        )
    })
}

pub(crate) fn format() -> Result<()> {
    cargo(&["fmt", "--check", "--all"], false)
}

pub(crate) fn clippy() -> Result<()> {
    cargo(
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
            "--no-deps",
        ],
        false,
    )
}

pub(crate) fn test() -> Result<()> {
    cargo(&["test", "--workspace"], false)?;
    crate::smoke::combine_smoke()
}
