//! Core WAF subsystems: rule merging and compilation, request matching,
//! reputation tracking, enforcement, and the structured audit logger.

pub mod compiler;
pub mod enforcement;
pub mod event_log;
pub mod matcher;
pub mod merger;
pub mod reputation;

pub use compiler::{compile, CompiledSnapshot};
pub use enforcement::{Enforcer, Mode};
pub use matcher::{MatchingEngine, RequestInfo, Verdict};
pub use merger::{load_and_merge, MergedRuleSet, RuleSetError};
pub use reputation::ReputationStore;

use std::path::Path;

use crate::models::Config;

/// Merge the configured rule artifacts and compile them into a snapshot.
/// Any failure aborts the load; no partial snapshot is ever produced.
pub fn build_snapshot(config: &Config) -> Result<CompiledSnapshot, RuleSetError> {
    let entry = Path::new(&config.rules.rules_file);
    let root_dir = config.rules.root_dir.as_deref().map(Path::new);
    let merged = load_and_merge(entry, root_dir, config.rules.max_extends_depth)?;
    let snapshot = compile(&merged)?;
    log::info!(
        "compiled {} rules from {} (version {})",
        snapshot.rules().len(),
        config.rules.rules_file,
        snapshot.version.as_deref().unwrap_or("unversioned"),
    );
    Ok(snapshot)
}
