//! Persistent statistics store
//!
//! Four sled trees hold the collected counts, one per logical table:
//! `call_sites` and `inlined_subprograms` map a function name to an
//! occurrence count; their `*_arguments` companions map (function, argument)
//! to (occurrence count, location-available count). Every write is an
//! insert-or-increment upsert; nothing is replaced or deleted mid-run.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Failed to encode record: {0}")]
    Codec(#[from] bincode::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Which of the two record families a write belongs to. A function can
/// appear in both; the identity spaces are separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Direct call sites (`call_sites` / `call_site_arguments`).
    CallSite,
    /// Inlined call instances (`inlined_subprograms` /
    /// `inlined_subprogram_arguments`).
    Inlined,
}

/// Per-argument counters. `loc_count <= count` holds by construction: the
/// only writes are seed-at-zero and increment-count-maybe-increment-loc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgCounts {
    pub count: u64,
    pub loc_count: u64,
}

#[derive(Clone)]
pub struct StatsStore {
    db: sled::Db,
    call_sites: sled::Tree,
    call_site_arguments: sled::Tree,
    inlined_subprograms: sled::Tree,
    inlined_subprogram_arguments: sled::Tree,
}

impl StatsStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// An in-memory-backed store for isolated scans in tests.
    pub fn temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> StoreResult<Self> {
        let call_sites = db.open_tree("call_sites")?;
        let call_site_arguments = db.open_tree("call_site_arguments")?;
        let inlined_subprograms = db.open_tree("inlined_subprograms")?;
        let inlined_subprogram_arguments = db.open_tree("inlined_subprogram_arguments")?;
        Ok(StatsStore {
            db,
            call_sites,
            call_site_arguments,
            inlined_subprograms,
            inlined_subprogram_arguments,
        })
    }

    fn functions_tree(&self, family: Family) -> &sled::Tree {
        match family {
            Family::CallSite => &self.call_sites,
            Family::Inlined => &self.inlined_subprograms,
        }
    }

    fn arguments_tree(&self, family: Family) -> &sled::Tree {
        match family {
            Family::CallSite => &self.call_site_arguments,
            Family::Inlined => &self.inlined_subprogram_arguments,
        }
    }

    fn argument_key(function: &str, argument: &str) -> StoreResult<Vec<u8>> {
        Ok(bincode::serialize(&(function, argument))?)
    }

    /// Insert a function record with count 1, or increment on conflict.
    pub fn bump_function(&self, family: Family, function: &str) -> StoreResult<()> {
        let key = bincode::serialize(&function)?;
        self.functions_tree(family).update_and_fetch(key, |old| {
            let count = old
                .and_then(|bytes| bincode::deserialize::<u64>(bytes).ok())
                .unwrap_or(0);
            bincode::serialize(&(count + 1)).ok()
        })?;
        Ok(())
    }

    /// Pre-seed an argument record at (0, 0) unless one already exists.
    /// Never touches an existing record's counts.
    pub fn seed_argument(&self, family: Family, function: &str, argument: &str) -> StoreResult<()> {
        let key = Self::argument_key(function, argument)?;
        let tree = self.arguments_tree(family);
        if tree.get(&key)?.is_none() {
            tree.insert(key, bincode::serialize(&ArgCounts::default())?)?;
        }
        Ok(())
    }

    /// Increment an argument record's occurrence count, and its location
    /// count iff the observed parameter carried location info.
    pub fn bump_argument(
        &self,
        family: Family,
        function: &str,
        argument: &str,
        has_location: bool,
    ) -> StoreResult<()> {
        let key = Self::argument_key(function, argument)?;
        self.arguments_tree(family).update_and_fetch(key, |old| {
            let mut counts = old
                .and_then(|bytes| bincode::deserialize::<ArgCounts>(bytes).ok())
                .unwrap_or_default();
            counts.count += 1;
            if has_location {
                counts.loc_count += 1;
            }
            bincode::serialize(&counts).ok()
        })?;
        Ok(())
    }

    pub fn function_count(&self, family: Family, function: &str) -> StoreResult<Option<u64>> {
        let key = bincode::serialize(&function)?;
        Ok(self
            .functions_tree(family)
            .get(key)?
            .and_then(|bytes| bincode::deserialize(&bytes).ok()))
    }

    pub fn argument_counts(
        &self,
        family: Family,
        function: &str,
        argument: &str,
    ) -> StoreResult<Option<ArgCounts>> {
        let key = Self::argument_key(function, argument)?;
        Ok(self
            .arguments_tree(family)
            .get(key)?
            .and_then(|bytes| bincode::deserialize(&bytes).ok()))
    }

    /// All function records of a family, unordered.
    pub fn functions(&self, family: Family) -> StoreResult<Vec<(String, u64)>> {
        let mut rows = Vec::new();
        for item in self.functions_tree(family).iter() {
            let (key, value) = item?;
            let name: String = bincode::deserialize(&key)?;
            let count: u64 = bincode::deserialize(&value)?;
            rows.push((name, count));
        }
        Ok(rows)
    }

    /// All argument records of a family, unordered.
    pub fn arguments(&self, family: Family) -> StoreResult<Vec<(String, String, ArgCounts)>> {
        let mut rows = Vec::new();
        for item in self.arguments_tree(family).iter() {
            let (key, value) = item?;
            let (function, argument): (String, String) = bincode::deserialize(&key)?;
            let counts: ArgCounts = bincode::deserialize(&value)?;
            rows.push((function, argument, counts));
        }
        Ok(rows)
    }

    /// Argument records for one function. The bincode tuple encoding is
    /// length-prefixed, so the encoded function name is a key prefix.
    pub fn arguments_for(
        &self,
        family: Family,
        function: &str,
    ) -> StoreResult<Vec<(String, ArgCounts)>> {
        let prefix = bincode::serialize(&function)?;
        let mut rows = Vec::new();
        for item in self.arguments_tree(family).scan_prefix(prefix) {
            let (key, value) = item?;
            let (_, argument): (String, String) = bincode::deserialize(&key)?;
            let counts: ArgCounts = bincode::deserialize(&value)?;
            rows.push((argument, counts));
        }
        Ok(rows)
    }

    /// Empty all four tables. Start-of-run only; nothing is deleted during
    /// a scan.
    pub fn clear(&self) -> StoreResult<()> {
        self.inlined_subprogram_arguments.clear()?;
        self.inlined_subprograms.clear()?;
        self.call_site_arguments.clear()?;
        self.call_sites.clear()?;
        self.db.flush()?;
        Ok(())
    }

    /// Commit pending writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
