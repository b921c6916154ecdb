//! Unit stream and multi-binary scan driver
//!
//! Processes binaries strictly one at a time, and each binary's compilation
//! units strictly one at a time. Every `evict_every` units the driver
//! flushes the store and drops the reader's parse caches; that checkpoint is
//! what keeps memory bounded on debug sections with hundreds of thousands of
//! units.

use anyhow::Result;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::aggregate::Aggregator;
use crate::classify::classify_unit;
use crate::dwarf::DwarfIndex;
use crate::shared_deps;
use crate::store::StatsStore;

/// Scan configuration, built once at startup and passed everywhere; no
/// component reaches for global state.
pub struct ScanConfig {
    /// Flush and evict caches after this many compilation units.
    pub evict_every: usize,
    /// Compilation units whose resolved source path matches are skipped.
    pub exclude_unit: Regex,
    /// Input files whose path matches are skipped.
    pub exclude_file: Regex,
    /// Follow each input's shared-library dependencies.
    pub follow_shared: bool,
    /// Raised (by the signal handler) to stop the scan. Polled at the
    /// per-unit checkpoint so an interrupted run unwinds normally and the
    /// store commits on the regular exit path.
    pub stop: &'static AtomicBool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub units_processed: usize,
    pub units_skipped: usize,
}

pub struct Scanner<'a> {
    store: &'a StatsStore,
    config: &'a ScanConfig,
}

impl<'a> Scanner<'a> {
    pub fn new(store: &'a StatsStore, config: &'a ScanConfig) -> Self {
        Scanner { store, config }
    }

    /// Scan every input (and, with dependency-following, every discovered
    /// shared library), sequentially and deduplicated by path. A failure is
    /// fatal for its input only; the run continues with the next one.
    pub fn run(&self, inputs: &[PathBuf]) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut queue: VecDeque<PathBuf> = inputs.iter().cloned().collect();
        let mut processed: HashSet<PathBuf> = HashSet::new();

        while let Some(path) = queue.pop_front() {
            if self.config.stop.load(Ordering::Relaxed) {
                debug!("stop requested, ending scan");
                break;
            }
            if self.config.exclude_file.is_match(&path.to_string_lossy()) {
                eprintln!("Skipping file {}", path.display());
                summary.files_skipped += 1;
                continue;
            }
            if !processed.insert(path.clone()) {
                continue;
            }

            if self.config.follow_shared {
                match shared_deps::linked_libraries(&path) {
                    Ok(libraries) => {
                        for library in libraries {
                            if !processed.contains(&library) {
                                queue.push_back(library);
                            }
                        }
                    }
                    Err(e) => eprintln!("Failed to list dependencies of {}: {e}", path.display()),
                }
            }

            match self.scan_binary(&path, &mut summary) {
                Ok(()) => summary.files_scanned += 1,
                Err(e) => {
                    eprintln!("Failed to process {}: {e:#}", path.display());
                    summary.files_failed += 1;
                }
            }
        }

        self.store.flush()?;
        Ok(summary)
    }

    fn scan_binary(&self, path: &Path, summary: &mut ScanSummary) -> Result<()> {
        eprintln!("Processing file: {}", path.display());

        let index = match DwarfIndex::load(path)? {
            Some(index) => index,
            None => {
                eprintln!("  file has no debug info");
                return Ok(());
            }
        };
        debug!(units = index.unit_count(), "loaded debug info");

        let mut since_evict = 0usize;
        for offset in index.unit_offsets() {
            if self.config.stop.load(Ordering::Relaxed) {
                break;
            }
            let unit = index.materialize_unit(offset)?;
            let unit_path = unit.path.to_string_lossy();
            if self.config.exclude_unit.is_match(&unit_path) {
                eprintln!("Skipping {} ({:#x})", unit_path, unit.offset);
                summary.units_skipped += 1;
            } else {
                debug!(path = %unit_path, offset = unit.offset, "processing unit");
                let mut agg = Aggregator::new(self.store);
                classify_unit(&unit.root, &index, &mut agg)?;
                summary.units_processed += 1;
            }

            since_evict += 1;
            if since_evict >= self.config.evict_every {
                since_evict = 0;
                self.store.flush()?;
                index.evict();
            }
        }

        self.store.flush()?;
        Ok(())
    }
}
