//! Applying a profile to the functions being compiled
//!
//! [`resolver`] maps compiled locations onto the profile forest,
//! [`value_profile`] replays indirect-call promotion, [`propagate`] turns
//! sampled counts into block and edge counts, and [`driver`] runs the whole
//! pipeline per function. [`report`] formats what gets written out.

pub mod driver;
pub mod propagate;
pub mod report;
pub mod resolver;
pub mod value_profile;

pub use driver::{AutoProfile, CallEdge, FunctionOutcome, InlinerHooks, NoopInliner};
pub use propagate::BranchProbability;
pub use report::{AnnotationOutput, BRANCH_ANNOTATION_SECTION, COVERAGE_SECTION};
pub use resolver::{InlineStack, InlineStackEntry, ProfileResolver};
pub use value_profile::{HistogramTarget, IndirectCallHistogram, PromotedSet};
