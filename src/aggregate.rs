//! Attribution aggregator
//!
//! Turns classified occurrences into store upserts. The ordering contract
//! lives here: a function record is written before any of its argument
//! records, and declared-parameter pre-seeding happens before argument
//! occurrences are applied, so a "never observed" argument is
//! distinguishable from a "never analyzed" one.

use anyhow::Result;

use crate::store::{Family, StatsStore};

pub struct Aggregator<'a> {
    store: &'a StatsStore,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a StatsStore) -> Self {
        Aggregator { store }
    }

    /// An inlined call or direct call site was found for `function`.
    pub fn function_occurrence(&mut self, family: Family, function: &str) -> Result<()> {
        self.store.bump_function(family, function)?;
        Ok(())
    }

    /// Seed zero-count rows for every parameter the function's canonical
    /// declaration enumerates. Existing rows are left untouched.
    pub fn seed_declared_arguments<I>(
        &mut self,
        family: Family,
        function: &str,
        arguments: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = String>,
    {
        for argument in arguments {
            self.store.seed_argument(family, function, &argument)?;
        }
        Ok(())
    }

    /// One parameter node observed on a concrete occurrence of `function`.
    pub fn argument_occurrence(
        &mut self,
        family: Family,
        function: &str,
        argument: &str,
        has_location: bool,
    ) -> Result<()> {
        self.store.bump_argument(family, function, argument, has_location)?;
        Ok(())
    }
}
