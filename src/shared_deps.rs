//! Shared-library dependency listing via the system linker tool
//!
//! Used only when dependency-following is enabled: each input's directly
//! linked libraries are appended to the scan queue.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Paths of the shared libraries `binary` links against, as reported by
/// `ldd`. Lines without a resolved path (vdso, statically linked notices)
/// are ignored.
pub fn linked_libraries(binary: &Path) -> Result<Vec<PathBuf>> {
    let output = Command::new("ldd")
        .arg(binary)
        .output()
        .context("Failed to run ldd")?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ldd_output(&stdout)
}

fn parse_ldd_output(stdout: &str) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(r".* => (.*) \(.*\)").context("Invalid ldd pattern")?;
    Ok(pattern
        .captures_iter(stdout)
        .filter_map(|captures| captures.get(1))
        .map(|m| PathBuf::from(m.as_str()))
        .filter(|p| !p.as_os_str().is_empty())
        .collect())
}
