//! Indirect-call value profiling
//!
//! The profiled binary may have promoted an indirect call to a direct call
//! and inlined the target; its samples then live under a callsite instead of
//! in the call's target histogram. Before annotation each indirect call is
//! refreshed with those inlined targets so the host can promote it again, at
//! most once per compilation.

use super::resolver::ProfileResolver;
use crate::ir::{BlockId, FunctionBody, Statement, StmtId};
use crate::profile::{CountInfo, FunctionInstance, StringTable};
use fxhash::FxHashSet;
use serde::Serialize;
use std::collections::BTreeMap;

/// Statements already promoted while compiling the current function.
pub type PromotedSet = FxHashSet<StmtId>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistogramTarget {
    pub name_index: u32,
    pub name: String,
    pub count: u64,
}

/// Top-2 view of an indirect call's targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndirectCallHistogram {
    pub total: u64,
    pub top1: HistogramTarget,
    pub top2: Option<HistogramTarget>,
}

impl IndirectCallHistogram {
    /// Build from a target map; `None` when there are no targets. Ties keep
    /// the lower name index.
    pub fn from_targets(strings: &StringTable, targets: &BTreeMap<u32, u64>) -> Option<Self> {
        let mut total = 0u64;
        let mut first: Option<(u32, u64)> = None;
        let mut second: Option<(u32, u64)> = None;

        for (&target, &count) in targets {
            total += count;
            match first {
                Some((_, best)) if best >= count => {
                    if second.map_or(true, |(_, c)| c < count) {
                        second = Some((target, count));
                    }
                }
                _ => {
                    second = first;
                    first = Some((target, count));
                }
            }
        }

        let entry = |(name_index, count): (u32, u64)| HistogramTarget {
            name_index,
            name: strings.get_name(name_index).unwrap_or_default().to_string(),
            count,
        };
        Some(IndirectCallHistogram {
            total,
            top1: entry(first?),
            top2: second.map(entry),
        })
    }

    /// Samples attributed to neither of the top two targets.
    pub fn remainder(&self) -> u64 {
        let top2 = self.top2.as_ref().map_or(0, |t| t.count);
        self.total.saturating_sub(self.top1.count).saturating_sub(top2)
    }
}

/// Inlined callees recorded at the call's own location, keyed by name index
/// with their total counts. Only callees the program defines and that can
/// take the call's arguments are kept.
pub fn find_icall_target_map(
    resolver: &ProfileResolver<'_>,
    instance: &FunctionInstance,
    stmt: &Statement,
) -> BTreeMap<u32, u64> {
    let mut map = BTreeMap::new();
    let Some(offset) = resolver.relative_location(stmt.location.as_ref()) else {
        return map;
    };
    let program = resolver.program();
    let strings = &resolver.profile().strings;
    let num_args = stmt.call_args().unwrap_or(0);

    for (&key, callee) in instance.callsites() {
        if key != offset {
            continue;
        }
        let Some(decl) = strings
            .get_name(callee.name())
            .and_then(|name| program.find_function(name))
        else {
            continue;
        };
        if !program.is_compatible_call_target(decl, num_args) {
            continue;
        }
        map.insert(callee.name(), callee.total_count());
    }
    map
}

/// Merge the inlined targets of `stmt` into `info`, whose count is the call
/// site's count. Rejected when the call's own recorded targets reach
/// `refresh_threshold` of that count, since the promoted target is then no
/// longer dominant, or when nothing was inlined there.
pub fn update_inlined_indirect_target(
    resolver: &ProfileResolver<'_>,
    stmt: &Statement,
    info: &mut CountInfo,
    refresh_threshold: f64,
) -> bool {
    let Some(location) = stmt.location.as_ref() else {
        return false;
    };
    if resolver.is_end_locus(location) {
        return false;
    }

    let old_total = resolver
        .count_info(Some(location))
        .map_or(0, CountInfo::targets_total);
    if old_total as f64 >= info.count as f64 * refresh_threshold {
        return false;
    }

    let stack = resolver.inline_stack(Some(location));
    let Some(instance) = resolver.instance_for_stack(&stack) else {
        return false;
    };
    let map = find_icall_target_map(resolver, instance, stmt);
    if map.values().sum::<u64>() == 0 {
        return false;
    }
    info.targets.extend(map);
    true
}

/// Refresh every indirect call not promoted yet and attach its histogram.
/// Returns whether any call was refreshed.
pub fn promote_indirect_calls(
    resolver: &ProfileResolver<'_>,
    body: &mut FunctionBody,
    promoted: &mut PromotedSet,
    refresh_threshold: f64,
) -> bool {
    if resolver.function_instance().is_none() {
        return false;
    }

    let mut refreshed: Vec<(StmtId, BTreeMap<u32, u64>)> = Vec::new();
    let blocks: Vec<BlockId> = body.real_blocks().to_vec();
    for block in blocks {
        let bb = body.block(block);
        if !bb.has_indirect_call() {
            continue;
        }

        let bb_count = bb
            .statements
            .iter()
            .filter_map(|s| resolver.count_info(s.location.as_ref()))
            .map(|info| info.count)
            .max()
            .unwrap_or(0);

        for stmt in &bb.statements {
            if !stmt.is_indirect_call() || promoted.contains(&stmt.id) {
                continue;
            }
            let mut info = resolver
                .count_info(stmt.location.as_ref())
                .cloned()
                .unwrap_or_default();
            info.count = bb_count;
            if update_inlined_indirect_target(resolver, stmt, &mut info, refresh_threshold) {
                promoted.insert(stmt.id);
                refreshed.push((stmt.id, info.targets));
            }
        }
    }

    let strings = &resolver.profile().strings;
    for (stmt, targets) in &refreshed {
        if let Some(histogram) = IndirectCallHistogram::from_targets(strings, targets) {
            log::trace!("promoting indirect call {:?} to {}", stmt, histogram.top1.name);
            body.histograms.insert(*stmt, histogram);
        }
    }
    !refreshed.is_empty()
}
