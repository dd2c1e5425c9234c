//! Rule document merger.
//!
//! Resolves `extends` chains across rule artifacts, applies per-artifact
//! disable filters, target-rewrite plans, and duplicate policies, and
//! produces one flat normalized rule list plus a passthrough policy
//! sub-document. Every failure carries its source file and a JSON-pointer
//! style location.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::core::compiler::{Action, MatchKind, Phase, Target};

/// Located merge/compile error. Fatal to the configuration load that raised
/// it; no partial snapshot is ever activated.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{file}{pointer}: {message}")]
pub struct RuleSetError {
    pub file: String,
    pub pointer: String,
    pub message: String,
}

impl RuleSetError {
    pub fn new(
        file: impl Into<String>,
        pointer: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            pointer: pointer.into(),
            message: message.into(),
        }
    }
}

/// How duplicate rule ids are resolved within one merge frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    Error,
    WarnSkip,
    WarnKeepLast,
}

impl DuplicatePolicy {
    fn from_token(s: &str) -> Option<Self> {
        match s {
            "error" => Some(Self::Error),
            "warn_skip" => Some(Self::WarnSkip),
            "warn_keep_last" => Some(Self::WarnKeepLast),
            _ => None,
        }
    }
}

/// One normalized rule, ready for compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRule {
    pub id: u64,
    pub targets: Vec<Target>,
    pub header_name: Option<String>,
    pub match_kind: MatchKind,
    pub patterns: Vec<String>,
    pub action: Action,
    pub phase: Option<Phase>,
    pub caseless: bool,
    pub negate: bool,
    pub score: u64,
    pub priority: i64,
    pub tags: Vec<String>,
    /// Artifact the rule was declared in, for located compile errors.
    pub file: String,
    pub pointer: String,
}

/// Merge output: the flat rule list plus entry-artifact passthrough fields.
#[derive(Debug, Clone, Default)]
pub struct MergedRuleSet {
    pub rules: Vec<MergedRule>,
    pub version: Option<String>,
    pub policies: Option<Value>,
}

/// Target-rewrite plan attached to one `extends` item. Applied to imported
/// rules after disable filtering and before merging.
#[derive(Debug, Clone, Default)]
struct RewritePlan {
    by_tag: Vec<(String, Vec<Target>)>,
    by_ids: Vec<(Vec<u64>, Vec<Target>)>,
}

impl RewritePlan {
    fn is_empty(&self) -> bool {
        self.by_tag.is_empty() && self.by_ids.is_empty()
    }
}

struct ExtendsItem {
    reference: String,
    plan: RewritePlan,
}

struct Merger<'a> {
    root_dir: Option<&'a Path>,
    max_depth: u32,
    /// Normalized paths of artifacts currently being resolved.
    stack: Vec<String>,
}

/// Load the entry artifact, resolve its `extends` graph depth-first, and
/// return the merged rule set. `max_depth == 0` means unlimited depth;
/// cycle detection is always on.
pub fn load_and_merge(
    entry_path: &Path,
    root_dir: Option<&Path>,
    max_depth: u32,
) -> Result<MergedRuleSet, RuleSetError> {
    let mut merger = Merger {
        root_dir,
        max_depth,
        stack: Vec::new(),
    };
    merger.merge_entry(entry_path)
}

impl<'a> Merger<'a> {
    fn merge_entry(&mut self, path: &Path) -> Result<MergedRuleSet, RuleSetError> {
        let rules = self.collect(path, 1)?;
        let file = path.display().to_string();
        let doc = read_artifact(path)?;
        let version = doc
            .get("version")
            .and_then(Value::as_str)
            .map(str::to_string);
        let policies = doc.get("policies").cloned();
        if let Some(p) = &policies {
            if !p.is_object() {
                return Err(RuleSetError::new(file, "/policies", "must be an object"));
            }
        }
        Ok(MergedRuleSet {
            rules,
            version,
            policies,
        })
    }

    /// Depth-first collection of one artifact's effective rule list:
    /// imported rules first (in `extends` order, filtered and rewritten),
    /// then the artifact's own rules, deduplicated by a frame-scoped map.
    fn collect(&mut self, path: &Path, depth: u32) -> Result<Vec<MergedRule>, RuleSetError> {
        let file = path.display().to_string();
        let key = normalize_path(path);
        if self.stack.contains(&key) {
            return Err(RuleSetError::new(
                file,
                "/meta/extends",
                format!("extends cycle detected through {}", key),
            ));
        }
        if self.max_depth != 0 && depth > self.max_depth {
            return Err(RuleSetError::new(
                file,
                "/meta/extends",
                format!("extends recursion exceeds depth limit {}", self.max_depth),
            ));
        }

        let doc = read_artifact(path)?;
        let policy = parse_duplicate_policy(&doc, &file)?;
        let extends = parse_extends(&doc, &file)?;
        let disabled_ids = parse_u64_set(&doc, "disableById", &file)?;
        let disabled_tags = parse_string_set(&doc, "disableByTag", &file)?;

        let mut out: Vec<MergedRule> = Vec::new();
        // Frame-scoped duplicate index, dropped with this call.
        let mut index: HashMap<u64, usize> = HashMap::new();

        self.stack.push(key);
        let imported = self.collect_imports(path, depth, &extends);
        self.stack.pop();
        let imported = imported?;

        for rule in imported {
            if disabled_ids.contains(&rule.id) {
                continue;
            }
            if rule.tags.iter().any(|t| disabled_tags.contains(t)) {
                continue;
            }
            append_rule(&mut out, &mut index, rule, policy, &file)?;
        }

        let rules = doc
            .get("rules")
            .ok_or_else(|| RuleSetError::new(&file, "", "missing required 'rules' array"))?;
        let rules = rules
            .as_array()
            .ok_or_else(|| RuleSetError::new(&file, "/rules", "'rules' must be an array"))?;
        for (i, value) in rules.iter().enumerate() {
            let pointer = format!("/rules/{}", i);
            let rule = parse_rule(value, &file, &pointer)?;
            append_rule(&mut out, &mut index, rule, policy, &file)?;
        }
        Ok(out)
    }

    fn collect_imports(
        &mut self,
        path: &Path,
        depth: u32,
        extends: &[ExtendsItem],
    ) -> Result<Vec<MergedRule>, RuleSetError> {
        let file = path.display().to_string();
        let mut imported = Vec::new();
        for (i, item) in extends.iter().enumerate() {
            let pointer = format!("/meta/extends/{}", i);
            let child = self.resolve_reference(path, &item.reference);
            let mut rules = self.collect(&child, depth + 1)?;
            if !item.plan.is_empty() {
                for rule in &mut rules {
                    apply_rewrite(rule, &item.plan, &file, &pointer)?;
                }
            }
            imported.append(&mut rules);
        }
        Ok(imported)
    }

    /// Resolve an `extends` reference: absolute paths as-is, otherwise
    /// relative to the including artifact's directory, with a fallback to
    /// the configured root directory for bare names.
    fn resolve_reference(&self, including: &Path, reference: &str) -> PathBuf {
        let referenced = Path::new(reference);
        if referenced.is_absolute() {
            return referenced.to_path_buf();
        }
        let sibling = including
            .parent()
            .map(|dir| dir.join(referenced))
            .unwrap_or_else(|| referenced.to_path_buf());
        if sibling.exists() {
            return sibling;
        }
        let bare = !reference.contains('/') && !reference.contains('\\');
        if bare {
            if let Some(root) = self.root_dir {
                let rooted = root.join(referenced);
                if rooted.exists() {
                    return rooted;
                }
            }
        }
        sibling
    }
}

fn read_artifact(path: &Path) -> Result<Value, RuleSetError> {
    let file = path.display().to_string();
    let text = std::fs::read_to_string(path)
        .map_err(|e| RuleSetError::new(&file, "", format!("cannot read artifact: {}", e)))?;
    let doc: Value = json5::from_str(&text)
        .map_err(|e| RuleSetError::new(&file, "", format!("invalid JSON: {}", e)))?;
    if !doc.is_object() {
        return Err(RuleSetError::new(&file, "", "artifact must be an object"));
    }
    Ok(doc)
}

/// `meta.duplicatePolicy` falls back to the root-level key; default
/// `warn_skip`.
fn parse_duplicate_policy(doc: &Value, file: &str) -> Result<DuplicatePolicy, RuleSetError> {
    let (value, pointer) = match doc.pointer("/meta/duplicatePolicy") {
        Some(v) => (Some(v), "/meta/duplicatePolicy"),
        None => (doc.get("duplicatePolicy"), "/duplicatePolicy"),
    };
    match value {
        None => Ok(DuplicatePolicy::WarnSkip),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| RuleSetError::new(file, pointer, "must be a string"))?;
            DuplicatePolicy::from_token(s).ok_or_else(|| {
                RuleSetError::new(
                    file,
                    pointer,
                    format!(
                        "unknown duplicate policy '{}' (expected error, warn_skip, warn_keep_last)",
                        s
                    ),
                )
            })
        }
    }
}

fn parse_extends(doc: &Value, file: &str) -> Result<Vec<ExtendsItem>, RuleSetError> {
    let value = match doc.pointer("/meta/extends") {
        Some(v) => v,
        None => return Ok(Vec::new()),
    };
    let items = value
        .as_array()
        .ok_or_else(|| RuleSetError::new(file, "/meta/extends", "must be an array"))?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let pointer = format!("/meta/extends/{}", i);
        match item {
            Value::String(s) => out.push(ExtendsItem {
                reference: s.clone(),
                plan: RewritePlan::default(),
            }),
            Value::Object(obj) => {
                let reference = obj
                    .get("file")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        RuleSetError::new(file, &pointer, "extends object requires a 'file' string")
                    })?
                    .to_string();
                for key in obj.keys() {
                    if !matches!(
                        key.as_str(),
                        "file" | "rewriteTargetsForTag" | "rewriteTargetsForIds"
                    ) {
                        return Err(RuleSetError::new(
                            file,
                            &pointer,
                            format!("unknown extends key '{}'", key),
                        ));
                    }
                }
                let plan = parse_rewrite_plan(obj, file, &pointer)?;
                out.push(ExtendsItem { reference, plan });
            }
            _ => {
                return Err(RuleSetError::new(
                    file,
                    &pointer,
                    "extends item must be a string path or an object",
                ))
            }
        }
    }
    Ok(out)
}

fn parse_rewrite_plan(
    obj: &serde_json::Map<String, Value>,
    file: &str,
    pointer: &str,
) -> Result<RewritePlan, RuleSetError> {
    let mut plan = RewritePlan::default();
    if let Some(by_tag) = obj.get("rewriteTargetsForTag") {
        let p = format!("{}/rewriteTargetsForTag", pointer);
        let map = by_tag
            .as_object()
            .ok_or_else(|| RuleSetError::new(file, &p, "must be an object of tag -> target"))?;
        for (tag, target) in map {
            let targets = parse_targets(target, file, &p)?;
            plan.by_tag.push((tag.clone(), targets));
        }
    }
    if let Some(by_ids) = obj.get("rewriteTargetsForIds") {
        let p = format!("{}/rewriteTargetsForIds", pointer);
        let groups = by_ids
            .as_array()
            .ok_or_else(|| RuleSetError::new(file, &p, "must be an array of {ids, target}"))?;
        for (i, group) in groups.iter().enumerate() {
            let gp = format!("{}/{}", p, i);
            let obj = group
                .as_object()
                .ok_or_else(|| RuleSetError::new(file, &gp, "must be an object"))?;
            let ids = obj
                .get("ids")
                .and_then(Value::as_array)
                .ok_or_else(|| RuleSetError::new(file, &gp, "requires an 'ids' array"))?;
            let mut parsed_ids = Vec::with_capacity(ids.len());
            for id in ids {
                let id = id
                    .as_u64()
                    .filter(|&v| v > 0)
                    .ok_or_else(|| RuleSetError::new(file, &gp, "ids must be positive integers"))?;
                parsed_ids.push(id);
            }
            let target = obj
                .get("target")
                .ok_or_else(|| RuleSetError::new(file, &gp, "requires a 'target' value"))?;
            let targets = parse_targets(target, file, &gp)?;
            plan.by_ids.push((parsed_ids, targets));
        }
    }
    Ok(plan)
}

/// Overwrite an imported rule's target set, then re-check the invariants
/// that parsing enforced: HEADER stays exclusive and header names stay
/// paired with HEADER targets.
fn apply_rewrite(
    rule: &mut MergedRule,
    plan: &RewritePlan,
    file: &str,
    pointer: &str,
) -> Result<(), RuleSetError> {
    let mut replacement: Option<&Vec<Target>> = None;
    for (tag, targets) in &plan.by_tag {
        if rule.tags.iter().any(|t| t == tag) {
            replacement = Some(targets);
        }
    }
    for (ids, targets) in &plan.by_ids {
        if ids.contains(&rule.id) {
            replacement = Some(targets);
        }
    }
    let targets = match replacement {
        Some(t) => t.clone(),
        None => return Ok(()),
    };

    if targets.contains(&Target::Header) && targets.len() > 1 {
        return Err(RuleSetError::new(
            file,
            pointer,
            format!(
                "rewrite of rule {} combines HEADER with another target",
                rule.id
            ),
        ));
    }
    if targets == [Target::Header] {
        if rule.header_name.as_deref().map_or(true, str::is_empty) {
            return Err(RuleSetError::new(
                file,
                pointer,
                format!(
                    "rewrite of rule {} targets HEADER but the rule has no headerName",
                    rule.id
                ),
            ));
        }
    } else if rule.header_name.is_some() {
        return Err(RuleSetError::new(
            file,
            pointer,
            format!(
                "rewrite of rule {} leaves headerName on a non-HEADER rule",
                rule.id
            ),
        ));
    }
    rule.targets = targets;
    Ok(())
}

fn append_rule(
    out: &mut Vec<MergedRule>,
    index: &mut HashMap<u64, usize>,
    rule: MergedRule,
    policy: DuplicatePolicy,
    file: &str,
) -> Result<(), RuleSetError> {
    if let Some(&existing) = index.get(&rule.id) {
        match policy {
            DuplicatePolicy::Error => {
                return Err(RuleSetError::new(
                    file,
                    rule.pointer.clone(),
                    format!("duplicate rule id {}", rule.id),
                ));
            }
            DuplicatePolicy::WarnSkip => {
                log::warn!(
                    "duplicate rule id {} in {}, keeping first occurrence",
                    rule.id,
                    file
                );
            }
            DuplicatePolicy::WarnKeepLast => {
                log::warn!(
                    "duplicate rule id {} in {}, keeping last occurrence",
                    rule.id,
                    file
                );
                // Overwrite in place so the original list position survives.
                out[existing] = rule;
            }
        }
        return Ok(());
    }
    index.insert(rule.id, out.len());
    out.push(rule);
    Ok(())
}

const RULE_KEYS: &[&str] = &[
    "id",
    "target",
    "headerName",
    "match",
    "pattern",
    "action",
    "phase",
    "caseless",
    "negate",
    "score",
    "priority",
    "tags",
];

fn parse_rule(value: &Value, file: &str, pointer: &str) -> Result<MergedRule, RuleSetError> {
    let obj = value
        .as_object()
        .ok_or_else(|| RuleSetError::new(file, pointer, "rule must be an object"))?;
    for key in obj.keys() {
        if !RULE_KEYS.contains(&key.as_str()) {
            return Err(RuleSetError::new(
                file,
                pointer,
                format!("unknown rule key '{}'", key),
            ));
        }
    }

    let id = obj
        .get("id")
        .and_then(Value::as_u64)
        .filter(|&v| v > 0)
        .ok_or_else(|| RuleSetError::new(file, pointer, "rule id must be a positive integer"))?;

    let targets = parse_targets(
        obj.get("target")
            .ok_or_else(|| RuleSetError::new(file, pointer, "rule requires a 'target'"))?,
        file,
        pointer,
    )?;

    let header_name = match obj.get("headerName") {
        None => None,
        Some(v) => Some(
            v.as_str()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    RuleSetError::new(file, pointer, "headerName must be a non-empty string")
                })?
                .to_string(),
        ),
    };
    if targets.contains(&Target::Header) {
        if targets.len() > 1 {
            return Err(RuleSetError::new(
                file,
                pointer,
                "HEADER may not combine with any other target",
            ));
        }
        if header_name.is_none() {
            return Err(RuleSetError::new(
                file,
                pointer,
                "HEADER target requires a headerName",
            ));
        }
    } else if header_name.is_some() {
        return Err(RuleSetError::new(
            file,
            pointer,
            "headerName is only valid on HEADER rules",
        ));
    }

    let match_kind = {
        let s = obj
            .get("match")
            .and_then(Value::as_str)
            .ok_or_else(|| RuleSetError::new(file, pointer, "rule requires a 'match' string"))?;
        MatchKind::from_token(s).ok_or_else(|| {
            RuleSetError::new(file, pointer, format!("unknown match kind '{}'", s))
        })?
    };

    let patterns = parse_patterns(
        obj.get("pattern")
            .ok_or_else(|| RuleSetError::new(file, pointer, "rule requires a 'pattern'"))?,
        file,
        pointer,
    )?;

    let action = {
        let s = obj
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| RuleSetError::new(file, pointer, "rule requires an 'action' string"))?;
        Action::from_token(s)
            .ok_or_else(|| RuleSetError::new(file, pointer, format!("unknown action '{}'", s)))?
    };

    let phase = match obj.get("phase") {
        None => None,
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| RuleSetError::new(file, pointer, "phase must be a string"))?;
            Some(Phase::from_token(s).ok_or_else(|| {
                RuleSetError::new(file, pointer, format!("unknown phase '{}'", s))
            })?)
        }
    };

    let caseless = parse_bool(obj.get("caseless"), "caseless", file, pointer)?;
    let negate = parse_bool(obj.get("negate"), "negate", file, pointer)?;

    let score = match obj.get("score") {
        None => {
            if action == Action::Bypass {
                0
            } else {
                10
            }
        }
        Some(v) => {
            if action == Action::Bypass {
                return Err(RuleSetError::new(
                    file,
                    pointer,
                    "score is forbidden on bypass rules",
                ));
            }
            v.as_u64().ok_or_else(|| {
                RuleSetError::new(file, pointer, "score must be a non-negative integer")
            })?
        }
    };

    let priority = match obj.get("priority") {
        None => 0,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| RuleSetError::new(file, pointer, "priority must be an integer"))?,
    };

    let tags = match obj.get("tags") {
        None => Vec::new(),
        Some(v) => {
            let items = v
                .as_array()
                .ok_or_else(|| RuleSetError::new(file, pointer, "tags must be an array"))?;
            let mut tags = Vec::with_capacity(items.len());
            for item in items {
                let tag = item.as_str().filter(|s| !s.is_empty()).ok_or_else(|| {
                    RuleSetError::new(file, pointer, "tags must be non-empty strings")
                })?;
                tags.push(tag.to_string());
            }
            tags
        }
    };

    Ok(MergedRule {
        id,
        targets,
        header_name,
        match_kind,
        patterns,
        action,
        phase,
        caseless,
        negate,
        score,
        priority,
        tags,
        file: file.to_string(),
        pointer: pointer.to_string(),
    })
}

/// Parse a target value (string or array). `ALL_PARAMS` expands to
/// {URI, ARGS_COMBINED, BODY} and is never stored verbatim; duplicates are
/// dropped preserving first-seen order.
fn parse_targets(value: &Value, file: &str, pointer: &str) -> Result<Vec<Target>, RuleSetError> {
    let tokens: Vec<&str> = match value {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => {
            let mut tokens = Vec::with_capacity(items.len());
            for item in items {
                tokens.push(item.as_str().ok_or_else(|| {
                    RuleSetError::new(file, pointer, "target entries must be strings")
                })?);
            }
            tokens
        }
        _ => {
            return Err(RuleSetError::new(
                file,
                pointer,
                "target must be a string or an array of strings",
            ))
        }
    };
    if tokens.is_empty() {
        return Err(RuleSetError::new(file, pointer, "target must be non-empty"));
    }

    let mut targets = Vec::new();
    let mut push = |t: Target, targets: &mut Vec<Target>| {
        if !targets.contains(&t) {
            targets.push(t);
        }
    };
    for token in tokens {
        if token.eq_ignore_ascii_case("ALL_PARAMS") {
            push(Target::Uri, &mut targets);
            push(Target::ArgsCombined, &mut targets);
            push(Target::Body, &mut targets);
            continue;
        }
        let target = Target::from_token(token).ok_or_else(|| {
            RuleSetError::new(file, pointer, format!("unknown target '{}'", token))
        })?;
        push(target, &mut targets);
    }
    Ok(targets)
}

fn parse_patterns(value: &Value, file: &str, pointer: &str) -> Result<Vec<String>, RuleSetError> {
    let patterns: Vec<String> = match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => {
            let mut patterns = Vec::with_capacity(items.len());
            for item in items {
                let s = item.as_str().ok_or_else(|| {
                    RuleSetError::new(file, pointer, "pattern entries must be strings")
                })?;
                patterns.push(s.to_string());
            }
            patterns
        }
        _ => {
            return Err(RuleSetError::new(
                file,
                pointer,
                "pattern must be a string or an array of strings",
            ))
        }
    };
    if patterns.is_empty() || patterns.iter().any(String::is_empty) {
        return Err(RuleSetError::new(
            file,
            pointer,
            "pattern list must be non-empty, with non-empty entries",
        ));
    }
    Ok(patterns)
}

fn parse_bool(
    value: Option<&Value>,
    key: &str,
    file: &str,
    pointer: &str,
) -> Result<bool, RuleSetError> {
    match value {
        None => Ok(false),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| RuleSetError::new(file, pointer, format!("{} must be a boolean", key))),
    }
}

fn parse_u64_set(doc: &Value, key: &str, file: &str) -> Result<HashSet<u64>, RuleSetError> {
    let pointer = format!("/{}", key);
    match doc.get(key) {
        None => Ok(HashSet::new()),
        Some(v) => {
            let items = v
                .as_array()
                .ok_or_else(|| RuleSetError::new(file, &pointer, "must be an array"))?;
            let mut set = HashSet::with_capacity(items.len());
            for item in items {
                let id = item.as_u64().filter(|&v| v > 0).ok_or_else(|| {
                    RuleSetError::new(file, &pointer, "entries must be positive integers")
                })?;
                set.insert(id);
            }
            Ok(set)
        }
    }
}

fn parse_string_set(doc: &Value, key: &str, file: &str) -> Result<HashSet<String>, RuleSetError> {
    let pointer = format!("/{}", key);
    match doc.get(key) {
        None => Ok(HashSet::new()),
        Some(v) => {
            let items = v
                .as_array()
                .ok_or_else(|| RuleSetError::new(file, &pointer, "must be an array"))?;
            let mut set = HashSet::with_capacity(items.len());
            for item in items {
                let s = item
                    .as_str()
                    .ok_or_else(|| RuleSetError::new(file, &pointer, "entries must be strings"))?;
                set.insert(s.to_string());
            }
            Ok(set)
        }
    }
}

/// Textual path normalization for cycle detection: collapsed separators,
/// `.` removed, `..` resolved against preceding segments.
fn normalize_path(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut prefix = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => prefix = p.as_os_str().to_string_lossy().into_owned(),
            Component::RootDir => prefix.push('/'),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() && prefix.is_empty() {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(s) => parts.push(s.to_string_lossy().into_owned()),
        }
    }
    format!("{}{}", prefix, parts.join("/"))
}
