//! Records written alongside the compiled code
//!
//! Coverage records say how much of each profiled function was used.
//! Branch-annotation records compare the probability the profile assigned to
//! a hot branch with the one the compiler had predicted, keyed by a hash that
//! survives unrelated edits to the source file.

use super::propagate::BranchProbability;
use super::resolver::inline_stack;
use crate::ir::{DeclId, FunctionBody, Location, Program};
use crate::profile::{Profile, ProfileSummary};
use serde::Serialize;
use md5::{Digest, Md5};

pub const COVERAGE_SECTION: &str = ".gnu.switches.text.annotation";
pub const BRANCH_ANNOTATION_SECTION: &str = ".gnu.switches.text.branch.annotation";

/// Everything a whole-program run emits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotationOutput {
    /// `name:total:annotated`, one per profiled root
    pub coverage: Vec<String>,
    /// `file;line;count;expect;new;old;hash`, one per hot branch
    pub branch_annotations: Vec<String>,
}

/// `name:totalCount:totalAnnotatedCount` for every root with samples, in
/// name index order.
pub fn coverage_records(profile: &Profile) -> Vec<String> {
    profile
        .source
        .roots()
        .filter(|root| root.total_count() > 0)
        .map(|root| {
            format!(
                "{}:{}:{}",
                profile.instance_name(root),
                root.total_count(),
                root.total_annotated_count()
            )
        })
        .collect()
}

/// Hex MD5 of the function name followed by the little-endian function
/// length, branch offset and discriminator.
pub fn branch_hash(
    function_name: &str,
    function_length: u32,
    branch_offset: u32,
    discriminator: i32,
) -> String {
    let mut hasher = Md5::new();
    hasher.update(function_name.as_bytes());
    hasher.update(function_length.to_le_bytes());
    hasher.update(branch_offset.to_le_bytes());
    hasher.update(discriminator.to_le_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocusInformation {
    pub file_name: String,
    pub line: u32,
    pub hash: String,
}

/// File, line and branch hash of a location, attributed to the innermost
/// function it was inlined from.
pub fn locus_information(
    program: &Program,
    current: DeclId,
    location: Option<&Location>,
) -> Option<LocusInformation> {
    let location = location?;
    let file_name = program.source_map.file_name(location.file)?;
    let leaf = *inline_stack(program, current, Some(location)).first()?;

    let decl = program.decl(leaf.decl);
    let start = decl.start_line();
    let function_length = decl.end_line.map_or(0, |end| end.wrapping_sub(start));
    let branch_offset = location.line.wrapping_sub(start);
    let hash = branch_hash(
        decl.printable_name(),
        function_length,
        branch_offset,
        location.discriminator as i32,
    );

    Some(LocusInformation {
        file_name: file_name.to_string(),
        line: location.line,
        hash,
    })
}

/// Collects branch-annotation records for hot two-way branches.
pub struct BranchAnnotationRecorder<'a> {
    summary: &'a ProfileSummary,
    hot_permille: u32,
    count_threshold: u64,
    records: Vec<String>,
}

impl<'a> BranchAnnotationRecorder<'a> {
    pub fn new(summary: &'a ProfileSummary, hot_permille: u32, count_threshold: u64) -> Self {
        Self {
            summary,
            hot_permille,
            count_threshold,
            records: Vec::new(),
        }
    }

    /// Record the first-edge change of a block, if the block is a hot
    /// two-way branch with a known location.
    pub fn record(
        &mut self,
        program: &Program,
        function: DeclId,
        body: &FunctionBody,
        change: &BranchProbability,
    ) {
        let bb = body.block(change.block);
        if bb.succs.len() != 2
            || !self.summary.maybe_hot_count(bb.count, self.hot_permille)
            || bb.count < self.count_threshold
        {
            return;
        }

        let last_located = bb
            .statements
            .iter()
            .rev()
            .filter(|s| !s.is_debug())
            .find(|s| s.location.is_some())
            .and_then(|s| s.location.as_ref());
        let goto = body.edge(change.edge).goto_location.as_ref();
        let Some(li) = locus_information(program, function, goto)
            .or_else(|| locus_information(program, function, last_located))
        else {
            return;
        };

        self.records.push(format!(
            "{};{};{};{};{};{};{}",
            li.file_name,
            li.line,
            bb.count,
            u8::from(change.predicted_by_expect),
            change.new_probability,
            change.old_probability,
            li.hash
        ));
    }

    pub fn records(&self) -> &[String] {
        &self.records
    }

    pub fn into_records(self) -> Vec<String> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, CmpOp, FunctionDecl, Operand, StmtKind};
    use crate::profile::{location_key, CountInfo, FunctionInstance};

    #[test]
    fn hash_is_stable_and_input_sensitive() {
        let h = branch_hash("main", 20, 4, 0);
        assert_eq!(h, "5549795b03621c9b4648c64a19b9b7e3");
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(h, branch_hash("main", 20, 4, 0));
        assert_ne!(h, branch_hash("main", 20, 5, 0));
        assert_ne!(h, branch_hash("main", 20, 4, 1));
        assert_ne!(h, branch_hash("other", 20, 4, 0));
    }

    #[test]
    fn coverage_skips_empty_roots() {
        let mut profile = Profile::new();
        let hot = profile.strings.intern("hot");
        let cold = profile.strings.intern("cold");
        let mut root = FunctionInstance::new(hot, 3);
        root.add_position(location_key(1, 0), CountInfo::new(30));
        root.add_position(location_key(2, 0), CountInfo::new(12));
        root.count_info(location_key(1, 0)).unwrap().mark_annotated();
        profile.add_root(root);
        profile.add_root(FunctionInstance::new(cold, 0));

        assert_eq!(coverage_records(&profile), vec!["hot:42:30".to_string()]);
    }

    #[test]
    fn records_hot_two_way_branch() {
        let mut program = Program::new();
        let file = program.source_map.add_named("src/branch.c");
        let f = program.add_function(
            FunctionDecl::new("_Z1fv", file, 10)
                .with_debug_name("f")
                .with_end_line(30),
        );

        let mut body = FunctionBody::new();
        let head = body.add_block();
        let a = body.add_block();
        let b = body.add_block();
        body.add_edge(BlockId::ENTRY, head);
        let (t, _) = body.add_cond_edges(head, a, b);
        body.add_edge(a, BlockId::EXIT);
        body.add_edge(b, BlockId::EXIT);
        let v = body.new_value();
        body.push_stmt(
            head,
            StmtKind::Cond {
                lhs: Operand::Value(v),
                op: CmpOp::Eq,
                rhs: Operand::Const(0),
            },
            Some(Location::new(file, 14).with_discriminator(3)),
        );
        body.push_stmt(head, StmtKind::Debug, None);
        body.block_mut(head).count = 500;

        let summary = ProfileSummary::default();
        let change = BranchProbability {
            edge: t,
            block: head,
            old_probability: 5000,
            new_probability: 9000,
            predicted_by_expect: true,
        };

        let mut recorder = BranchAnnotationRecorder::new(&summary, 999, 0);
        recorder.record(&program, f, &body, &change);
        // Hashed under the source name "f", not the mangled one.
        assert_eq!(
            recorder.records(),
            &["src/branch.c;14;500;1;9000;5000;4609f56efb738c38b65d83c77ec5f452".to_string()]
        );

        let mut strict = BranchAnnotationRecorder::new(&summary, 999, 1000);
        strict.record(&program, f, &body, &change);
        assert!(strict.into_records().is_empty());
    }
}
