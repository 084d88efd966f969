#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! The automation engine.
//!
//! Rules are persisted policies scoped to one instance: a tracker scope, a
//! schedule, and a set of action subtrees, each carrying its own boolean
//! condition tree. On every tick the engine pulls the instance snapshot,
//! filters candidates by tracker scope, precomputes grouping partitions,
//! evaluates each action's condition tree against every candidate with
//! precompiled regexes, reconciles the resulting plan (deletes are
//! deduplicated across rules by sort order), and dispatches batches of
//! upstream actions while appending to the activity log. Dry-run rules run
//! the identical pipeline and log `would_have_*` outcomes without touching
//! any upstream.

mod condition;
mod engine;
mod error;
mod freespace;
mod grouping;
mod model;
mod planner;
mod program;
mod validate;

pub use condition::{
    CompiledCondition, Combinator, EvalContext, Field, Operator, RuleCondition, parse_byte_size,
    parse_duration_secs,
};
pub use engine::{RuleEngine, RuleEngineConfig, RunSummary};
pub use error::{RuleError, RuleResult};
pub use freespace::FreeSpaceSource;
pub use grouping::{GroupIndex, group_ids_referenced};
pub use model::{
    ActionConditions, CategoryAction, DeleteAction, DeleteMode, ExternalProgramAction,
    MoveAction, PauseAction, ResumeAction, Rule, RulePayload, ShareLimitsAction,
    SpeedLimitsAction, TagAction, TagMode, TrackerScope,
};
pub use planner::{PlannedAction, PlannedItem, RulePlan, plan_rule, reconcile};
pub use program::{expand_template, verify_allowed};
pub use validate::validate_payload;
