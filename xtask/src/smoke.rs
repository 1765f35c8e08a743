// Licensed under the Apache-2.0 license

//! End-to-end run of the released CLI on synthetic inputs.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Result};
use combine_builder::{ImageFormat, MemoryImage, PROJECT_ROOT};
use tempfile::TempDir;

const BOOTLOADER_ADDR: u64 = 0x0800_0000;
const HEADER_ADDR: u64 = 0x0802_0000;
const APP_ADDR: u64 = 0x0802_0400;

fn combine_image(args: &[&str]) -> Result<String> {
    let output = Command::new("cargo")
        .current_dir(&*PROJECT_ROOT)
        .args(["run", "--quiet", "-p", "combine-image", "--"])
        .args(args)
        .output()?;
    if !output.status.success() {
        bail!(
            "combine-image {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn write_inputs(dir: &Path) -> Result<()> {
    let mut bootloader = MemoryImage::new();
    bootloader.load_binary(&[0x5A; 0x1000], BOOTLOADER_ADDR)?;
    bootloader.export(&dir.join("bootloader.hex"), ImageFormat::Hex)?;

    let app: Vec<u8> = (0..=255u8).cycle().take(0x2345).collect();
    std::fs::write(dir.join("app.bin"), app)?;
    Ok(())
}

pub(crate) fn combine_smoke() -> Result<()> {
    println!("Running: combine smoke test");
    let dir = TempDir::new()?;
    write_inputs(dir.path())?;

    let path = |name: &str| dir.path().join(name).display().to_string();
    let (header, app) = (format!("{HEADER_ADDR:#x}"), format!("{APP_ADDR:#x}"));

    for output in ["combined.hex", "combined.bin"] {
        combine_image(&[
            "combine",
            "-b",
            &path("bootloader.hex"),
            "-a",
            &path("app.bin"),
            "-c",
            &app,
            "-d",
            &header,
            "-o",
            &path(output),
            "-s",
            "42",
        ])?;
        let base = format!("{BOOTLOADER_ADDR:#x}");
        let report = combine_image(&[
            "verify",
            "--image",
            &path(output),
            "--base",
            &base,
            "--header-addr",
            &header,
            "--app-addr",
            &app,
        ])?;
        if !report.contains("version 42, size 9029") {
            bail!("Unexpected verify output for {output}: {report}");
        }
    }

    let hex = MemoryImage::from_hex_file(&dir.path().join("combined.hex"))?;
    let flat = std::fs::read(dir.path().join("combined.bin"))?;
    if hex.to_flat_binary()? != flat {
        bail!("combined.hex and combined.bin disagree");
    }
    Ok(())
}
