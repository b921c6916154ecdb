//! instats - DWARF argument location statistics collector
//!
//! This library walks the DWARF debug tree of compiled binaries, finds every
//! inlined call instance and direct call site, and tallies how often each
//! call's arguments carry location info (i.e. are recoverable by a debugger).
//! Counts accumulate in a persistent store keyed by function and argument
//! name.

pub mod aggregate;
pub mod classify;
pub mod cli;
pub mod dwarf;
pub mod model;
pub mod resolve;
pub mod scan;
pub mod shared_deps;
pub mod shutdown;
pub mod store;
