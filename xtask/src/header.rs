// Licensed under the Apache-2.0 license

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use combine_builder::PROJECT_ROOT;
use walkdir::{DirEntry, WalkDir};

const REQUIRED_TEXT: &str = "Licensed under the Apache-2.0 license";
/// The header must appear within this many lines.
const HEADER_LINES: usize = 3;
const EXTENSIONS: &[&str] = &["rs", "toml", "sh", "py", "yml", "yaml"];
const IGNORED_DIRS: &[&str] = &[".git", "examples", "target"];

fn relative(path: &Path) -> String {
    path.strip_prefix(&*PROJECT_ROOT)
        .unwrap_or(path)
        .display()
        .to_string()
}

fn check_contents(path: &Path, contents: impl BufRead) -> Result<()> {
    for line in contents.lines().take(HEADER_LINES) {
        let line = line.with_context(|| format!("{:?}", relative(path)))?;
        if line.contains(REQUIRED_TEXT) {
            return Ok(());
        }
    }
    bail!(
        "File {:?} doesn't contain {REQUIRED_TEXT:?} in the first {HEADER_LINES} lines",
        relative(path)
    )
}

fn check_file(path: &Path) -> Result<()> {
    let file = File::open(path).with_context(|| format!("{:?}", relative(path)))?;
    check_contents(path, BufReader::new(file))
}

fn header_line(path: &Path) -> Result<String> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("rs") => Ok(format!("// {REQUIRED_TEXT}\n")),
        Some("toml" | "sh" | "py" | "yml" | "yaml") => Ok(format!("# {REQUIRED_TEXT}\n")),
        other => Err(anyhow!("Unknown extension {other:?}")),
    }
}

fn fix_file(path: &Path) -> Result<()> {
    let mut contents = header_line(path)?.into_bytes();
    let previous = std::fs::read(path)?;
    if previous.first() != Some(&b'\n') {
        contents.push(b'\n');
    }
    contents.extend(previous);
    std::fs::write(path, contents)?;
    Ok(())
}

fn allow(entry: &DirEntry) -> bool {
    !(entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name)))
}

fn find_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];
    for entry in WalkDir::new(dir).into_iter().filter_entry(allow) {
        let entry = entry?;
        let matches = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| EXTENSIONS.contains(&ext));
        if entry.file_type().is_file() && matches {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn check() -> Result<()> {
    println!("Running: license header check");
    let mut failed = false;
    for file in find_files(&PROJECT_ROOT)? {
        if let Err(e) = check_file(&file) {
            println!("{e}");
            failed = true;
        }
    }
    if failed {
        bail!("Some files failed to have the correct license header; to fix, run \"cargo xtask header-fix\" from the repo root");
    }
    Ok(())
}

pub(crate) fn fix() -> Result<()> {
    println!("Running: license header fix");
    let mut failed = false;
    for file in find_files(&PROJECT_ROOT)? {
        if check_file(&file).is_err() {
            println!("Fixing header in {}", relative(&file));
            fix_file(&file)?;
        }
        if let Err(e) = check_file(&file) {
            println!("{e}");
            failed = true;
        }
    }
    if failed {
        bail!("License header fix failed; please fix the above files manually.");
    }
    Ok(())
}
