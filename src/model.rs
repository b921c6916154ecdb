//! Owned debug-node model
//!
//! The DWARF reader materializes one compilation unit at a time into these
//! owned nodes. Keeping nodes behind `Rc` means evicting the reader's caches
//! can never invalidate a node another component still holds.

use std::rc::Rc;

/// Global offset of a DIE within the `.debug_info` section.
///
/// Reference attributes (abstract origin, specification, type) are stored in
/// this form so they can point across compilation units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DieId(pub u64);

/// The node kinds the classifier cares about. Everything else is `Other` and
/// only contributes its children to the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DieTag {
    /// `DW_TAG_subprogram`
    Subprogram,
    /// `DW_TAG_inlined_subroutine`
    InlinedCall,
    /// `DW_TAG_GNU_call_site` or DWARF 5 `DW_TAG_call_site`
    CallSite,
    /// `DW_TAG_formal_parameter`
    FormalParameter,
    /// `DW_TAG_GNU_call_site_parameter` or DWARF 5 `DW_TAG_call_site_parameter`
    CallSiteParameter,
    Other,
}

/// One materialized debug-information entry.
#[derive(Debug, Clone)]
pub struct Die {
    pub offset: DieId,
    pub tag: DieTag,
    /// `DW_AT_name`
    pub name: Option<String>,
    /// `DW_AT_linkage_name` (mangled, preferred for overload disambiguation)
    pub linkage_name: Option<String>,
    /// Whether a `DW_AT_location` attribute is present on this entry.
    pub has_location: bool,
    /// `DW_AT_abstract_origin` (or `DW_AT_call_origin` on DWARF 5 call sites)
    pub origin: Option<DieId>,
    /// `DW_AT_specification`
    pub specification: Option<DieId>,
    /// `DW_AT_type`
    pub type_ref: Option<DieId>,
    pub children: Vec<Rc<Die>>,
}

impl Die {
    /// An empty node with the given identity; attributes are filled in by
    /// the reader (or by tests building synthetic trees).
    pub fn new(offset: DieId, tag: DieTag) -> Self {
        Die {
            offset,
            tag,
            name: None,
            linkage_name: None,
            has_location: false,
            origin: None,
            specification: None,
            type_ref: None,
            children: Vec::new(),
        }
    }
}

/// Resolves a reference attribute to the node it points at, materializing the
/// containing compilation unit if necessary.
///
/// `Ok(None)` means the offset does not name a known DIE (a dangling or
/// foreign reference); the resolver falls back to the next step in its chain.
pub trait DieIndex {
    fn lookup(&self, id: DieId) -> anyhow::Result<Option<Rc<Die>>>;
}
