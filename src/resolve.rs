//! Stable-name resolution for debug nodes
//!
//! Mangled C++ names are the common case, so the linkage name wins over the
//! plain name. Entries without either carry a reference (abstract origin,
//! specification, or declared type) whose target is resolved with the same
//! procedure. Anything left over becomes the `<unknown>` sentinel: records
//! accumulating under it mark a blind spot, not a failure.

use anyhow::Result;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::warn;

use crate::model::{Die, DieId, DieIndex};

/// Sentinel for nodes whose reference chain yields no name.
pub const UNKNOWN_NAME: &str = "<unknown>";

/// Resolve a stable name for `die`: linkage name, then plain name, then the
/// first resolvable reference (origin, specification, type), recursively.
///
/// A visited set guards the chain; compiler output is not guaranteed acyclic,
/// and a cycle resolves to `<unknown>` rather than hanging.
pub fn resolve_name(die: &Rc<Die>, index: &dyn DieIndex) -> Result<String> {
    let mut visited: HashSet<DieId> = HashSet::new();
    let mut current = die.clone();
    loop {
        if !visited.insert(current.offset) {
            warn!(offset = current.offset.0, "reference cycle detected while resolving name");
            return Ok(UNKNOWN_NAME.to_string());
        }
        if let Some(linkage) = &current.linkage_name {
            return Ok(linkage.clone());
        }
        if let Some(name) = &current.name {
            return Ok(name.clone());
        }
        let mut next = None;
        for id in [current.origin, current.specification, current.type_ref] {
            if let Some(id) = id {
                if let Some(target) = index.lookup(id)? {
                    next = Some(target);
                    break;
                }
            }
        }
        match next {
            Some(target) => current = target,
            None => return Ok(UNKNOWN_NAME.to_string()),
        }
    }
}
