//! gimli-backed DWARF reader
//!
//! Loads a binary's debug sections, iterates its compilation units, and
//! materializes each unit's DIE tree into owned [`Die`] nodes. A per-DIE
//! cache keyed by global `.debug_info` offset serves cross-unit references;
//! [`DwarfIndex::evict`] drops the cache to bound memory on binaries with
//! hundreds of thousands of units.

use anyhow::{Context, Result};
use gimli::Reader as _;
use object::{Object, ObjectSection};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::model::{Die, DieId, DieIndex, DieTag};

type Reader = gimli::EndianRcSlice<gimli::RunTimeEndian>;

/// A materialized compilation unit: its root node, resolved source path, and
/// offset within `.debug_info`.
#[derive(Clone)]
pub struct UnitTree {
    pub root: Rc<Die>,
    pub path: PathBuf,
    pub offset: u64,
}

pub struct DwarfIndex {
    dwarf: gimli::Dwarf<Reader>,
    headers: Vec<gimli::UnitHeader<Reader>>,
    /// Unit start offset -> index into `headers`, for exact lookups.
    unit_starts: HashMap<u64, usize>,
    /// `(start, end, index into headers)` in section order, for binary
    /// search of the unit containing an arbitrary DIE offset.
    unit_spans: Vec<(u64, u64, usize)>,
    /// Global DIE offset -> materialized node.
    dies: RefCell<HashMap<u64, Rc<Die>>>,
    /// Offsets of units whose trees have been materialized into `dies`.
    units_done: RefCell<HashSet<u64>>,
    roots: RefCell<HashMap<u64, UnitTree>>,
}

impl DwarfIndex {
    /// Load DWARF data from a compiled binary.
    ///
    /// Returns `Ok(None)` when the binary carries no debug information;
    /// callers report and skip it rather than failing the run.
    pub fn load(binary_path: &Path) -> Result<Option<Self>> {
        let file = File::open(binary_path)
            .with_context(|| format!("Failed to open binary: {}", binary_path.display()))?;

        let mmap = unsafe { memmap2::Mmap::map(&file) }.context("Failed to memory-map binary")?;

        let object = object::File::parse(&*mmap).context("Failed to parse object file")?;

        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> Result<Reader> {
            let data = object
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(std::borrow::Cow::Borrowed(&[]));
            let bytes: std::rc::Rc<[u8]> = std::rc::Rc::from(data.into_owned());
            Ok(gimli::EndianRcSlice::new(bytes, endian))
        };

        let dwarf = gimli::Dwarf::load(&load_section).context("Failed to load DWARF sections")?;

        let mut headers = Vec::new();
        let mut iter = dwarf.units();
        while let Some(header) = iter.next().context("Failed to read unit header")? {
            headers.push(header);
        }

        if headers.is_empty() {
            return Ok(None);
        }

        let mut unit_starts = HashMap::with_capacity(headers.len());
        let mut unit_spans = Vec::with_capacity(headers.len());
        for (i, header) in headers.iter().enumerate() {
            if let Some(o) = header.offset().as_debug_info_offset() {
                let start = o.0 as u64;
                unit_starts.insert(start, i);
                unit_spans.push((start, start + header.length_including_self() as u64, i));
            }
        }
        // Units appear in section order, but binary search must not rely on
        // the producer for that.
        unit_spans.sort_unstable();

        Ok(Some(DwarfIndex {
            dwarf,
            headers,
            unit_starts,
            unit_spans,
            dies: RefCell::new(HashMap::new()),
            units_done: RefCell::new(HashSet::new()),
            roots: RefCell::new(HashMap::new()),
        }))
    }

    pub fn unit_count(&self) -> usize {
        self.headers.len()
    }

    /// `.debug_info` offsets of all compilation units, in section order.
    pub fn unit_offsets(&self) -> Vec<u64> {
        self.headers
            .iter()
            .filter_map(|h| h.offset().as_debug_info_offset())
            .map(|o| o.0 as u64)
            .collect()
    }

    /// Materialize the unit at the given `.debug_info` offset, reusing the
    /// cached tree when it survives from a previous call.
    pub fn materialize_unit(&self, offset: u64) -> Result<UnitTree> {
        if let Some(tree) = self.roots.borrow().get(&offset) {
            return Ok(tree.clone());
        }
        let header = self
            .unit_starts
            .get(&offset)
            .map(|&i| self.headers[i].clone())
            .with_context(|| format!("No compilation unit at offset {:#x}", offset))?;
        self.build_unit(header)
    }

    /// Drop all materialized trees and DIE caches. Nodes already handed out
    /// stay alive through their `Rc`; a later lookup re-materializes the
    /// owning unit.
    pub fn evict(&self) {
        self.dies.borrow_mut().clear();
        self.units_done.borrow_mut().clear();
        self.roots.borrow_mut().clear();
    }

    fn build_unit(&self, header: gimli::UnitHeader<Reader>) -> Result<UnitTree> {
        let unit_offset = header
            .offset()
            .as_debug_info_offset()
            .map(|o| o.0 as u64)
            .context("Unit is not part of .debug_info")?;

        let unit = self
            .dwarf
            .unit(header)
            .context("Failed to parse compilation unit")?;

        let path = unit_path(&unit);

        let mut entries = unit.entries();
        let mut stack: Vec<Die> = Vec::new();
        let mut root: Option<Rc<Die>> = None;
        let mut depth: isize = 0;

        while let Some((delta, entry)) = entries.next_dfs().context("Failed to read DIE")? {
            depth += delta;
            while stack.len() as isize > depth {
                self.finish_die(&mut stack, &mut root);
            }
            stack.push(self.read_die(&unit, entry)?);
        }
        while !stack.is_empty() {
            self.finish_die(&mut stack, &mut root);
        }

        let root = root.context("Compilation unit has no root DIE")?;
        let tree = UnitTree {
            root,
            path,
            offset: unit_offset,
        };
        self.units_done.borrow_mut().insert(unit_offset);
        self.roots.borrow_mut().insert(unit_offset, tree.clone());
        Ok(tree)
    }

    /// Pop the deepest in-progress node, register it in the DIE cache, and
    /// attach it to its parent (or capture it as the unit root).
    fn finish_die(&self, stack: &mut Vec<Die>, root: &mut Option<Rc<Die>>) {
        if let Some(done) = stack.pop() {
            let rc = Rc::new(done);
            self.dies.borrow_mut().insert(rc.offset.0, rc.clone());
            match stack.last_mut() {
                Some(parent) => parent.children.push(rc),
                None => *root = Some(rc),
            }
        }
    }

    fn read_die(
        &self,
        unit: &gimli::Unit<Reader>,
        entry: &gimli::DebuggingInformationEntry<Reader>,
    ) -> Result<Die> {
        let offset = entry
            .offset()
            .to_debug_info_offset(&unit.header)
            .map(|o| DieId(o.0 as u64))
            .context("DIE is not part of .debug_info")?;

        let tag = match entry.tag() {
            gimli::DW_TAG_subprogram => DieTag::Subprogram,
            gimli::DW_TAG_inlined_subroutine => DieTag::InlinedCall,
            gimli::DW_TAG_call_site | gimli::DW_TAG_GNU_call_site => DieTag::CallSite,
            gimli::DW_TAG_formal_parameter => DieTag::FormalParameter,
            gimli::DW_TAG_call_site_parameter | gimli::DW_TAG_GNU_call_site_parameter => {
                DieTag::CallSiteParameter
            }
            _ => DieTag::Other,
        };

        let mut die = Die::new(offset, tag);
        die.name = self.attr_str(unit, entry, gimli::DW_AT_name)?;
        die.linkage_name = self.attr_str(unit, entry, gimli::DW_AT_linkage_name)?;
        die.has_location = entry
            .attr_value(gimli::DW_AT_location)
            .context("Failed to read DW_AT_location")?
            .is_some();
        die.origin = match self.attr_ref(unit, entry, gimli::DW_AT_abstract_origin)? {
            Some(id) => Some(id),
            None => self.attr_ref(unit, entry, gimli::DW_AT_call_origin)?,
        };
        die.specification = self.attr_ref(unit, entry, gimli::DW_AT_specification)?;
        die.type_ref = self.attr_ref(unit, entry, gimli::DW_AT_type)?;
        Ok(die)
    }

    fn attr_str(
        &self,
        unit: &gimli::Unit<Reader>,
        entry: &gimli::DebuggingInformationEntry<Reader>,
        at: gimli::DwAt,
    ) -> Result<Option<String>> {
        let value = match entry.attr_value(at).context("Failed to read attribute")? {
            Some(value) => value,
            None => return Ok(None),
        };
        // Non-string forms are treated as absent; the resolver's reference
        // chain covers those.
        match self.dwarf.attr_string(unit, value) {
            Ok(s) => Ok(Some(s.to_string_lossy()?.into_owned())),
            Err(_) => Ok(None),
        }
    }

    fn attr_ref(
        &self,
        unit: &gimli::Unit<Reader>,
        entry: &gimli::DebuggingInformationEntry<Reader>,
        at: gimli::DwAt,
    ) -> Result<Option<DieId>> {
        match entry.attr_value(at).context("Failed to read attribute")? {
            Some(gimli::AttributeValue::UnitRef(offset)) => Ok(offset
                .to_debug_info_offset(&unit.header)
                .map(|o| DieId(o.0 as u64))),
            Some(gimli::AttributeValue::DebugInfoRef(offset)) => Ok(Some(DieId(offset.0 as u64))),
            _ => Ok(None),
        }
    }

    /// Locate the unit whose `.debug_info` range contains `offset`.
    fn header_containing(&self, offset: u64) -> Option<gimli::UnitHeader<Reader>> {
        let i = self
            .unit_spans
            .partition_point(|&(start, _, _)| start <= offset);
        let (_, end, index) = *self.unit_spans.get(i.checked_sub(1)?)?;
        if offset < end {
            Some(self.headers[index].clone())
        } else {
            None
        }
    }
}

impl DieIndex for DwarfIndex {
    fn lookup(&self, id: DieId) -> Result<Option<Rc<Die>>> {
        if let Some(die) = self.dies.borrow().get(&id.0) {
            return Ok(Some(die.clone()));
        }
        let header = match self.header_containing(id.0) {
            Some(header) => header,
            None => return Ok(None),
        };
        let unit_offset = match header.offset().as_debug_info_offset() {
            Some(o) => o.0 as u64,
            None => return Ok(None),
        };
        if !self.units_done.borrow().contains(&unit_offset) {
            self.build_unit(header)?;
        }
        // A miss after materialization means the offset does not start a DIE.
        Ok(self.dies.borrow().get(&id.0).cloned())
    }
}

/// Resolved source path of a unit: `DW_AT_name` joined onto `DW_AT_comp_dir`
/// unless the name is already absolute.
fn unit_path(unit: &gimli::Unit<Reader>) -> PathBuf {
    let name = unit
        .name
        .as_ref()
        .and_then(|r| r.to_string_lossy().ok().map(|s| s.into_owned()));
    let comp_dir = unit
        .comp_dir
        .as_ref()
        .and_then(|r| r.to_string_lossy().ok().map(|s| s.into_owned()));
    match (comp_dir, name) {
        (_, Some(name)) if Path::new(&name).is_absolute() => PathBuf::from(name),
        (Some(dir), Some(name)) => Path::new(&dir).join(name),
        (Some(dir), None) => PathBuf::from(dir),
        (None, Some(name)) => PathBuf::from(name),
        (None, None) => PathBuf::from("<unknown>"),
    }
}
