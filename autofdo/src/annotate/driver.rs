//! Per-function annotation pipeline and the hotness oracle.
//!
//! For every function with a body: replay the indirect-call promotions the
//! profiled binary made, let the host inline early, annotate the CFG from
//! the profile, and classify the function's hotness.

use super::propagate::{
    annotate_block, calculate_branch_probabilities, counts_to_frequencies, BranchProbability,
};
use super::report::{coverage_records, AnnotationOutput, BranchAnnotationRecorder};
use super::resolver::{
    find_instance_along_stack, function_instance, inline_stack, InlineStack, InlineStackEntry,
    ProfileResolver,
};
use super::value_profile::{self, PromotedSet};
use crate::config::AutoFdoConfig;
use crate::error::ProfileError;
use crate::ir::{
    BlockId, CfgAnalyses, DeclId, FunctionBody, FunctionFrequency, Location, ProfileStatus,
    Program,
};
use crate::profile::{
    read_profile_file, AuxModuleLimits, FunctionInstance, ModuleGroup, Profile,
};
use diagnostics::Diagnostics;
use log::{debug, error, info};

/// What the host compiler does around annotation.
///
/// Both hooks run with the function's body detached from `program`.
pub trait InlinerHooks {
    /// Run the early inliner on `function`. It may consult
    /// [`AutoProfile::is_hot_callsite`].
    fn early_inline(
        &mut self,
        _autofdo: &AutoProfile,
        _program: &mut Program,
        _function: DeclId,
        _body: &mut FunctionBody,
    ) {
    }

    /// Act on the histograms attached to `body`; returns whether any call
    /// was transformed.
    fn value_profile_transformations(
        &mut self,
        _program: &mut Program,
        _function: DeclId,
        _body: &mut FunctionBody,
    ) -> bool {
        false
    }
}

/// Host without an inliner or value-profile transformations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInliner;

impl InlinerHooks for NoopInliner {}

/// A call from `caller` to `callee` at `location`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallEdge {
    pub caller: DeclId,
    pub callee: DeclId,
    pub location: Option<Location>,
}

/// Result of running the pipeline on one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionOutcome {
    /// The function had a body and was processed
    pub processed: bool,
    /// The profile had samples for it
    pub profile_read: bool,
    /// Indirect calls promoted during early inlining
    pub promoted_calls: usize,
    pub branch_annotations: Vec<String>,
}

impl FunctionOutcome {
    pub fn skipped() -> Self {
        Self::default()
    }
}

/// A loaded profile with the options it is applied under.
#[derive(Debug)]
pub struct AutoProfile {
    profile: Profile,
    config: AutoFdoConfig,
}

impl AutoProfile {
    pub fn new(profile: Profile, config: AutoFdoConfig) -> Self {
        Self { profile, config }
    }

    /// Read `config.profile_file`.
    pub fn load(config: AutoFdoConfig) -> Result<Self, ProfileError> {
        let profile = read_profile_file(&config.profile_file)?;
        info!(
            "Loaded AutoFDO profile {} ({} functions)",
            config.profile_file.display(),
            profile.source.len()
        );
        Ok(Self::new(profile, config))
    }

    /// Read the profile, or report why not and compile without one.
    pub fn load_or_disable(config: AutoFdoConfig, diags: &mut Diagnostics) -> Option<Self> {
        match Self::load(config.clone()) {
            Ok(autofdo) => Some(autofdo),
            Err(e) => {
                error!("AutoFDO disabled: {}", e);
                diags.push(e.to_diagnostic(config.profile_file.display().to_string()));
                None
            }
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn config(&self) -> &AutoFdoConfig {
        &self.config
    }

    pub fn resolve_function(&self, program: &Program, decl: DeclId) -> Option<&FunctionInstance> {
        function_instance(&self.profile, program, decl)
    }

    /// Total of the callee inlined at `key`, else the sampled count there.
    pub fn total_count_at(&self, instance: &FunctionInstance, key: u32) -> Option<u64> {
        instance.total_count_at(key)
    }

    pub fn maybe_hot_count(&self, count: u64) -> bool {
        self.profile
            .summary
            .maybe_hot_count(count, self.config.hot_bb_count_ws_permille)
    }

    /// Samples of the callee as it was inlined at this call in the profiled
    /// binary; 0 when it was not inlined there or the call has no location.
    pub fn callsite_total_count(&self, program: &Program, edge: &CallEdge) -> u64 {
        let caller_stack = inline_stack(program, edge.caller, edge.location.as_ref());
        if caller_stack.is_empty() {
            return 0;
        }
        let mut stack = InlineStack::new();
        stack.push(InlineStackEntry {
            decl: edge.callee,
            key: 0,
        });
        stack.extend(caller_stack);
        find_instance_along_stack(&self.profile, program, &stack)
            .map_or(0, FunctionInstance::total_count)
    }

    /// Whether the early inliner should inline this call.
    pub fn is_hot_callsite(&self, program: &Program, edge: &CallEdge) -> bool {
        let count = self.callsite_total_count(program, edge);
        count > 0 && self.maybe_hot_count(count)
    }

    /// Refresh the indirect calls of `body` from the profile's inlined
    /// targets. Returns whether any call was refreshed.
    pub fn promote_indirect_calls(
        &self,
        program: &Program,
        decl: DeclId,
        body: &mut FunctionBody,
        promoted: &mut PromotedSet,
    ) -> bool {
        let resolver = ProfileResolver::new(&self.profile, program, decl, body.end_locus);
        value_profile::promote_indirect_calls(
            &resolver,
            body,
            promoted,
            self.config.promotion_refresh_threshold,
        )
    }

    /// Annotate block and edge counts and branch probabilities of `body`.
    /// Calls in `promoted` get no new histogram. Returns the first-edge
    /// probability changes.
    pub fn annotate_cfg(
        &self,
        program: &Program,
        decl: DeclId,
        body: &mut FunctionBody,
        promoted: &PromotedSet,
    ) -> Vec<BranchProbability> {
        let resolver = ProfileResolver::new(&self.profile, program, decl, body.end_locus);
        let Some(instance) = resolver.function_instance() else {
            return Vec::new();
        };

        let head_count = instance.head_count();
        body.count = head_count;
        body.block_mut(BlockId::ENTRY).count = head_count;
        let mut max_count = head_count;

        for block in body.real_blocks().to_vec() {
            let succs = {
                let bb = body.block_mut(block);
                bb.count = 0;
                bb.annotated = false;
                bb.succs.clone()
            };
            for e in succs {
                let edge = body.edge_mut(e);
                edge.count = 0;
                edge.annotated = false;
            }

            let count = annotate_block(&resolver, body, block, promoted);
            body.block_mut(block).count = count;
            max_count = max_count.max(count);
        }

        for block in [body.first_real_block(), body.last_real_block()]
            .into_iter()
            .flatten()
        {
            let bb = body.block_mut(block);
            if head_count > bb.count {
                bb.count = head_count;
                bb.annotated = true;
            }
        }

        resolver.mark_annotated(Some(&program.decl(decl).location));
        resolver.mark_annotated(body.start_locus.as_ref());
        resolver.mark_annotated(body.end_locus.as_ref());

        if max_count == 0 {
            return Vec::new();
        }

        body.profile_status = ProfileStatus::Read;
        let cfg = CfgAnalyses::compute(body);
        let changes =
            calculate_branch_probabilities(body, &cfg, self.config.max_propagate_iterations);
        counts_to_frequencies(body);
        changes
    }

    /// Classify the function from its block counts. Left alone when no
    /// profile was read for it.
    pub fn compute_function_frequency(&self, body: &mut FunctionBody) {
        if body.profile_status != ProfileStatus::Read {
            return;
        }
        let mut frequency = FunctionFrequency::Unlikely;
        for block in body.all_blocks() {
            let count = body.block(block).count;
            if self.maybe_hot_count(count) {
                frequency = FunctionFrequency::Hot;
                break;
            }
            if count > 0 {
                frequency = FunctionFrequency::Normal;
            }
        }
        body.frequency = frequency;
    }

    fn promote_for_early_inline(
        &self,
        program: &mut Program,
        decl: DeclId,
        body: &mut FunctionBody,
        promoted: &mut PromotedSet,
        hooks: &mut dyn InlinerHooks,
    ) -> bool {
        if !self.promote_indirect_calls(program, decl, body, promoted) {
            return false;
        }
        hooks.value_profile_transformations(program, decl, body)
    }

    /// Run the pipeline on one function. Builtins and functions without a
    /// body are skipped.
    pub fn run_on_function(
        &self,
        program: &mut Program,
        decl: DeclId,
        hooks: &mut dyn InlinerHooks,
    ) -> FunctionOutcome {
        if program.decl(decl).is_builtin {
            return FunctionOutcome::skipped();
        }
        let Some(mut body) = program.take_body(decl) else {
            return FunctionOutcome::skipped();
        };
        let outcome = self.annotate_function(program, decl, &mut body, hooks);
        program.set_body(decl, body);
        outcome
    }

    fn annotate_function(
        &self,
        program: &mut Program,
        decl: DeclId,
        body: &mut FunctionBody,
        hooks: &mut dyn InlinerHooks,
    ) -> FunctionOutcome {
        let has_instance = self.resolve_function(program, decl).is_some();
        let mut promoted = PromotedSet::default();

        for round in 0..self.config.early_inliner_max_iterations {
            if !self.config.value_profile_transformations
                || !self.promote_for_early_inline(program, decl, body, &mut promoted, hooks)
            {
                break;
            }
            tracing::debug!(function = %decl, round, promoted = promoted.len(), "early inline after promotion");
            hooks.early_inline(self, program, decl, body);
        }
        hooks.early_inline(self, program, decl, body);

        let changes = self.annotate_cfg(program, decl, body, &promoted);

        let mut branch_annotations = Vec::new();
        if self.config.check_branch_annotation && body.profile_status == ProfileStatus::Read {
            let mut recorder = BranchAnnotationRecorder::new(
                &self.profile.summary,
                self.config.hot_bb_count_ws_permille,
                self.config.check_branch_annotation_threshold,
            );
            for change in &changes {
                recorder.record(program, decl, body, change);
            }
            branch_annotations = recorder.into_records();
            for edge in body.edges_mut() {
                edge.predicted_by_expect = false;
            }
        }

        if has_instance && self.config.value_profile_transformations {
            hooks.value_profile_transformations(program, decl, body);
        }
        self.compute_function_frequency(body);

        let profile_read = body.profile_status == ProfileStatus::Read;
        tracing::debug!(
            function = %program.decl(decl).assembler_name,
            profile_read,
            entry_count = body.entry_count(),
            frequency = ?body.frequency,
            "annotated"
        );

        FunctionOutcome {
            processed: true,
            profile_read,
            promoted_calls: promoted.len(),
            branch_annotations,
        }
    }

    /// Run the pipeline on every function of `program`, in declaration order.
    pub fn run(&self, program: &mut Program, hooks: &mut dyn InlinerHooks) -> AnnotationOutput {
        let mut output = AnnotationOutput::default();
        let mut annotated = 0usize;

        for decl in program.decl_ids().collect::<Vec<_>>() {
            let outcome = self.run_on_function(program, decl, hooks);
            if outcome.profile_read {
                annotated += 1;
            }
            output.branch_annotations.extend(outcome.branch_annotations);
        }

        if self.config.record_coverage_in_output {
            output.coverage = coverage_records(&self.profile);
        }
        info!("AutoFDO annotated {} of {} functions", annotated, program.decl_count());
        output
    }

    /// Auxiliary modules to import for `primary`; only with dynamic IPA.
    pub fn select_aux_modules(&self, primary: &str, diags: &mut Diagnostics) -> Option<ModuleGroup> {
        if !self.config.dyn_ipa {
            return None;
        }
        let limits = AuxModuleLimits {
            max_group_size: self.config.max_module_group_size,
            disallow_asm_modules: self.config.disallow_asm_modules,
        };
        let group = self.profile.modules.select_aux_modules(primary, limits, diags);
        if group.is_none() {
            debug!("primary module {} not in profile", primary);
        }
        group
    }
}
