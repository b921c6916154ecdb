//! Tree classifier
//!
//! Walks a compilation unit's DIE tree looking for inlined call instances
//! and direct call sites inside named subprograms, and feeds the resulting
//! occurrences to the aggregator. Traversal is iterative with an explicit
//! stack; degenerate debug trees can nest deeply enough to overflow a
//! recursive walk.

use anyhow::Result;
use std::rc::Rc;

use crate::aggregate::Aggregator;
use crate::model::{Die, DieIndex, DieTag};
use crate::resolve::resolve_name;
use crate::store::Family;

/// Classify every subprogram in the unit rooted at `root`.
pub fn classify_unit(root: &Rc<Die>, index: &dyn DieIndex, agg: &mut Aggregator) -> Result<()> {
    let mut stack: Vec<Rc<Die>> = vec![root.clone()];
    while let Some(die) = stack.pop() {
        if die.tag == DieTag::Subprogram {
            // Compilers emit anonymous subprogram shells (e.g. holding a
            // typedef nested inside a function); those must not pollute the
            // statistics.
            if die.name.is_some() {
                classify_subprogram(&die, index, agg)?;
            }
        } else {
            stack.extend(die.children.iter().cloned());
        }
    }
    Ok(())
}

/// Search the whole subtree of a named subprogram. A call can sit
/// arbitrarily deep inside lexical blocks, nested classes, or anonymous
/// scopes, so nothing short-circuits the descent except the calls
/// themselves, which are handled and then searched further.
fn classify_subprogram(
    subprogram: &Rc<Die>,
    index: &dyn DieIndex,
    agg: &mut Aggregator,
) -> Result<()> {
    let mut stack: Vec<Rc<Die>> = subprogram.children.iter().cloned().rev().collect();
    while let Some(die) = stack.pop() {
        match die.tag {
            DieTag::InlinedCall => classify_call(&die, Family::Inlined, index, agg, &mut stack)?,
            DieTag::CallSite => classify_call(&die, Family::CallSite, index, agg, &mut stack)?,
            _ => stack.extend(die.children.iter().cloned().rev()),
        }
    }
    Ok(())
}

/// Record one inlined-call or call-site occurrence: upsert the function
/// record, pre-seed argument rows from the canonical declaration if one is
/// referenced, record each directly attached parameter, and queue the
/// remaining children for further classification (an inlined call can wrap
/// deeper inlined calls and call sites, and vice versa).
fn classify_call(
    die: &Rc<Die>,
    family: Family,
    index: &dyn DieIndex,
    agg: &mut Aggregator,
    stack: &mut Vec<Rc<Die>>,
) -> Result<()> {
    let function = resolve_name(die, index)?;
    agg.function_occurrence(family, &function)?;

    if let Some(origin_id) = die.origin {
        if let Some(origin) = index.lookup(origin_id)? {
            let mut declared = Vec::new();
            for child in &origin.children {
                if matches!(child.tag, DieTag::FormalParameter | DieTag::CallSiteParameter) {
                    declared.push(resolve_name(child, index)?);
                }
            }
            agg.seed_declared_arguments(family, &function, declared)?;
        }
    }

    let argument_tag = match family {
        Family::Inlined => DieTag::FormalParameter,
        Family::CallSite => DieTag::CallSiteParameter,
    };
    for child in die.children.iter().rev() {
        if child.tag == argument_tag {
            let argument = resolve_name(child, index)?;
            agg.argument_occurrence(family, &function, &argument, child.has_location)?;
        } else {
            stack.push(child.clone());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DieId;
    use crate::store::{ArgCounts, StatsStore};
    use anyhow::Result;
    use std::collections::HashMap;

    struct MemIndex {
        dies: HashMap<DieId, Rc<Die>>,
    }

    impl MemIndex {
        fn new(dies: Vec<Rc<Die>>) -> Self {
            MemIndex {
                dies: dies.into_iter().map(|d| (d.offset, d)).collect(),
            }
        }
    }

    impl DieIndex for MemIndex {
        fn lookup(&self, id: DieId) -> Result<Option<Rc<Die>>> {
            Ok(self.dies.get(&id).cloned())
        }
    }

    fn die(offset: u64, tag: DieTag) -> Die {
        Die::new(DieId(offset), tag)
    }

    fn named(offset: u64, tag: DieTag, name: &str) -> Die {
        let mut d = die(offset, tag);
        d.name = Some(name.to_string());
        d
    }

    fn unit_with_subprogram(subprogram: Die) -> Rc<Die> {
        let mut root = die(0, DieTag::Other);
        root.children.push(Rc::new(subprogram));
        Rc::new(root)
    }

    #[test]
    fn test_inlined_call_with_located_parameter() {
        let mut param = named(3, DieTag::FormalParameter, "x");
        param.has_location = true;
        let mut inlined = named(2, DieTag::InlinedCall, "foo");
        inlined.children.push(Rc::new(param));
        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(inlined));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        assert_eq!(store.function_count(Family::Inlined, "foo").unwrap(), Some(1));
        assert_eq!(
            store.argument_counts(Family::Inlined, "foo", "x").unwrap(),
            Some(ArgCounts { count: 1, loc_count: 1 })
        );
        assert!(store.functions(Family::CallSite).unwrap().is_empty());
    }

    /// The same inlined call twice; the second parameter has no location.
    #[test]
    fn test_repeated_inlined_call_accumulates() {
        let mut located = named(3, DieTag::FormalParameter, "x");
        located.has_location = true;
        let mut first = named(2, DieTag::InlinedCall, "foo");
        first.children.push(Rc::new(located));

        let unlocated = named(5, DieTag::FormalParameter, "x");
        let mut second = named(4, DieTag::InlinedCall, "foo");
        second.children.push(Rc::new(unlocated));

        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(first));
        main.children.push(Rc::new(second));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        assert_eq!(store.function_count(Family::Inlined, "foo").unwrap(), Some(2));
        assert_eq!(
            store.argument_counts(Family::Inlined, "foo", "x").unwrap(),
            Some(ArgCounts { count: 2, loc_count: 1 })
        );
    }

    /// A call site whose abstract origin declares two parameters, only one
    /// of which is observed.
    #[test]
    fn test_call_site_preseeds_declared_arguments() {
        let mut origin = named(10, DieTag::Subprogram, "bar");
        origin.children.push(Rc::new(named(11, DieTag::FormalParameter, "a")));
        origin.children.push(Rc::new(named(12, DieTag::FormalParameter, "b")));
        let origin = Rc::new(origin);

        let mut observed = named(3, DieTag::CallSiteParameter, "a");
        observed.has_location = true;
        let mut call_site = die(2, DieTag::CallSite);
        call_site.origin = Some(DieId(10));
        call_site.children.push(Rc::new(observed));

        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(call_site));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![origin]), &mut agg).unwrap();

        // The call site itself has no name; it resolves through the origin.
        assert_eq!(store.function_count(Family::CallSite, "bar").unwrap(), Some(1));
        assert_eq!(
            store.argument_counts(Family::CallSite, "bar", "a").unwrap(),
            Some(ArgCounts { count: 1, loc_count: 1 })
        );
        assert_eq!(
            store.argument_counts(Family::CallSite, "bar", "b").unwrap(),
            Some(ArgCounts { count: 0, loc_count: 0 })
        );
    }

    #[test]
    fn test_unnamed_subprogram_contributes_nothing() {
        let mut inlined = named(3, DieTag::InlinedCall, "foo");
        inlined.children.push(Rc::new(named(4, DieTag::FormalParameter, "x")));
        let mut anonymous = die(1, DieTag::Subprogram);
        anonymous.children.push(Rc::new(inlined));
        let root = unit_with_subprogram(anonymous);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        assert!(store.functions(Family::Inlined).unwrap().is_empty());
        assert!(store.arguments(Family::Inlined).unwrap().is_empty());
    }

    #[test]
    fn test_call_found_deep_inside_nested_scopes() {
        let inlined = named(5, DieTag::InlinedCall, "leaf");
        let mut inner_block = die(4, DieTag::Other);
        inner_block.children.push(Rc::new(inlined));
        let mut outer_block = die(3, DieTag::Other);
        outer_block.children.push(Rc::new(inner_block));
        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(outer_block));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        assert_eq!(store.function_count(Family::Inlined, "leaf").unwrap(), Some(1));
    }

    #[test]
    fn test_inlined_call_nested_inside_call_site() {
        let nested = named(4, DieTag::InlinedCall, "inner");
        let mut call_site = named(3, DieTag::CallSite, "outer");
        call_site.children.push(Rc::new(nested));
        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(call_site));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        assert_eq!(store.function_count(Family::CallSite, "outer").unwrap(), Some(1));
        assert_eq!(store.function_count(Family::Inlined, "inner").unwrap(), Some(1));
    }

    #[test]
    fn test_inlined_call_nested_inside_inlined_call() {
        let mut inner_param = named(5, DieTag::FormalParameter, "v");
        inner_param.has_location = true;
        let mut inner = named(4, DieTag::InlinedCall, "inner");
        inner.children.push(Rc::new(inner_param));
        let mut outer = named(3, DieTag::InlinedCall, "outer");
        outer.children.push(Rc::new(inner));
        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(outer));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        assert_eq!(store.function_count(Family::Inlined, "outer").unwrap(), Some(1));
        assert_eq!(store.function_count(Family::Inlined, "inner").unwrap(), Some(1));
        assert_eq!(
            store.argument_counts(Family::Inlined, "inner", "v").unwrap(),
            Some(ArgCounts { count: 1, loc_count: 1 })
        );
    }

    #[test]
    fn test_unresolvable_call_counts_under_unknown() {
        let nameless = die(2, DieTag::InlinedCall);
        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(nameless));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        assert_eq!(
            store.function_count(Family::Inlined, "<unknown>").unwrap(),
            Some(1)
        );
    }

    #[test]
    fn test_every_argument_row_has_a_function_row() {
        let mut param = named(3, DieTag::FormalParameter, "x");
        param.has_location = true;
        let mut inlined = named(2, DieTag::InlinedCall, "foo");
        inlined.children.push(Rc::new(param));
        let mut main = named(1, DieTag::Subprogram, "main");
        main.children.push(Rc::new(inlined));
        let root = unit_with_subprogram(main);

        let store = StatsStore::temporary().unwrap();
        let mut agg = Aggregator::new(&store);
        classify_unit(&root, &MemIndex::new(vec![]), &mut agg).unwrap();

        for family in [Family::Inlined, Family::CallSite] {
            let functions: std::collections::HashSet<String> = store
                .functions(family)
                .unwrap()
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            for (function, _, counts) in store.arguments(family).unwrap() {
                assert!(functions.contains(&function));
                assert!(counts.loc_count <= counts.count);
            }
        }
    }
}
