//! Rule compiler.
//!
//! Validates the merged rule list, pre-compiles regex and CIDR patterns,
//! resolves each rule's execution phase, and emits the immutable
//! `CompiledSnapshot`: rules bucketed by (phase, target), stably sorted by
//! priority. On any failure the snapshot is never partially populated.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;

use crate::core::merger::{MergedRule, MergedRuleSet, RuleSetError};

/// Request facet a rule inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    ClientIp,
    Uri,
    ArgsCombined,
    ArgsName,
    ArgsValue,
    Body,
    Header,
}

pub const TARGET_COUNT: usize = 7;

impl Target {
    pub fn from_token(s: &str) -> Option<Self> {
        let token = s.to_ascii_uppercase();
        match token.as_str() {
            "CLIENT_IP" => Some(Self::ClientIp),
            "URI" => Some(Self::Uri),
            "ARGS_COMBINED" => Some(Self::ArgsCombined),
            "ARGS_NAME" => Some(Self::ArgsName),
            "ARGS_VALUE" => Some(Self::ArgsValue),
            "BODY" => Some(Self::Body),
            "HEADER" => Some(Self::Header),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::ClientIp => 0,
            Self::Uri => 1,
            Self::ArgsCombined => 2,
            Self::ArgsName => 3,
            Self::ArgsValue => 4,
            Self::Body => 5,
            Self::Header => 6,
        }
    }
}

/// Match kind applied to the rule's OR-combined pattern list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Contains,
    Exact,
    Regex,
    Cidr,
}

impl MatchKind {
    pub fn from_token(s: &str) -> Option<Self> {
        let token = s.to_ascii_uppercase();
        match token.as_str() {
            "CONTAINS" => Some(Self::Contains),
            "EXACT" => Some(Self::Exact),
            "REGEX" => Some(Self::Regex),
            "CIDR" => Some(Self::Cidr),
            _ => None,
        }
    }
}

/// Rule action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deny,
    Log,
    Bypass,
}

impl Action {
    pub fn from_token(s: &str) -> Option<Self> {
        let token = s.to_ascii_uppercase();
        match token.as_str() {
            "DENY" => Some(Self::Deny),
            "LOG" => Some(Self::Log),
            "BYPASS" => Some(Self::Bypass),
            _ => None,
        }
    }
}

/// Pipeline stage a rule is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    IpAllow,
    IpBlock,
    UriAllow,
    Detect,
}

pub const PHASE_COUNT: usize = 4;

impl Phase {
    pub fn from_token(s: &str) -> Option<Self> {
        let token = s.to_ascii_lowercase();
        match token.as_str() {
            "ip_allow" => Some(Self::IpAllow),
            "ip_block" => Some(Self::IpBlock),
            "uri_allow" => Some(Self::UriAllow),
            "detect" => Some(Self::Detect),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Self::IpAllow => 0,
            Self::IpBlock => 1,
            Self::UriAllow => 2,
            Self::Detect => 3,
        }
    }
}

/// One compiled, single-target rule. Multi-target merged rules expand into
/// one compiled rule per target.
#[derive(Debug)]
pub struct CompiledRule {
    pub id: u64,
    pub target: Target,
    pub header_name: Option<String>,
    pub match_kind: MatchKind,
    pub patterns: Vec<String>,
    pub regexes: Vec<Regex>,
    pub cidrs: Vec<Ipv4Net>,
    pub action: Action,
    pub phase: Phase,
    pub caseless: bool,
    pub negate: bool,
    pub score: u64,
    pub priority: i64,
    pub tags: Vec<String>,
}

/// Immutable compiled rule set, shared read-only across requests.
#[derive(Debug)]
pub struct CompiledSnapshot {
    rules: Vec<CompiledRule>,
    buckets: Vec<Vec<Vec<usize>>>,
    pub version: Option<String>,
    pub policies: Option<Value>,
}

impl CompiledSnapshot {
    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Evaluation-ordered rules for one (phase, target) bucket.
    pub fn bucket(&self, phase: Phase, target: Target) -> impl Iterator<Item = &CompiledRule> {
        self.buckets[phase.index()][target.index()]
            .iter()
            .map(move |&i| &self.rules[i])
    }
}

/// Infer the phase from (target, action). `None` means the combination has
/// no valid phase at all.
fn infer_phase(target: Target, action: Action) -> Option<Phase> {
    match (target, action) {
        (Target::ClientIp, Action::Bypass) => Some(Phase::IpAllow),
        (Target::ClientIp, Action::Deny) => Some(Phase::IpBlock),
        (Target::ClientIp, Action::Log) => None,
        (Target::Uri, Action::Bypass) => Some(Phase::UriAllow),
        _ => Some(Phase::Detect),
    }
}

/// An explicit phase must be compatible with the rule's target and action.
fn phase_compatible(phase: Phase, target: Target, action: Action) -> bool {
    match phase {
        Phase::IpAllow => target == Target::ClientIp && action == Action::Bypass,
        Phase::IpBlock => target == Target::ClientIp && action == Action::Deny,
        Phase::UriAllow => target == Target::Uri && action == Action::Bypass,
        Phase::Detect => target != Target::ClientIp,
    }
}

fn resolve_phase(rule: &MergedRule, target: Target) -> Result<Phase, RuleSetError> {
    match rule.phase {
        Some(phase) => {
            if !phase_compatible(phase, target, rule.action) {
                return Err(RuleSetError::new(
                    &rule.file,
                    &rule.pointer,
                    format!(
                        "rule {}: explicit phase is incompatible with its target/action",
                        rule.id
                    ),
                ));
            }
            Ok(phase)
        }
        None => infer_phase(target, rule.action).ok_or_else(|| {
            RuleSetError::new(
                &rule.file,
                &rule.pointer,
                format!(
                    "rule {}: CLIENT_IP rules must use action DENY or BYPASS",
                    rule.id
                ),
            )
        }),
    }
}

fn compile_regexes(rule: &MergedRule) -> Result<Vec<Regex>, RuleSetError> {
    rule.patterns
        .iter()
        .map(|p| {
            RegexBuilder::new(p)
                .case_insensitive(rule.caseless)
                .build()
                .map_err(|e| {
                    RuleSetError::new(
                        &rule.file,
                        &rule.pointer,
                        format!("rule {}: invalid regex '{}': {}", rule.id, p, e),
                    )
                })
        })
        .collect()
}

/// CIDR patterns accept both prefix notation and bare addresses (/32).
fn compile_cidrs(rule: &MergedRule) -> Result<Vec<Ipv4Net>, RuleSetError> {
    rule.patterns
        .iter()
        .map(|p| {
            let parsed = if p.contains('/') {
                p.parse::<Ipv4Net>().ok()
            } else {
                p.parse::<Ipv4Addr>()
                    .ok()
                    .and_then(|addr| Ipv4Net::new(addr, 32).ok())
            };
            parsed.ok_or_else(|| {
                RuleSetError::new(
                    &rule.file,
                    &rule.pointer,
                    format!("rule {}: invalid CIDR '{}'", rule.id, p),
                )
            })
        })
        .collect()
}

/// Compile the merged rule set into a snapshot, or fail with a located
/// error.
pub fn compile(set: &MergedRuleSet) -> Result<CompiledSnapshot, RuleSetError> {
    let mut seen_ids: HashSet<u64> = HashSet::with_capacity(set.rules.len());
    let mut rules: Vec<CompiledRule> = Vec::new();
    let mut buckets = vec![vec![Vec::new(); TARGET_COUNT]; PHASE_COUNT];

    for rule in &set.rules {
        // The merger guarantees uniqueness; re-checked as an invariant.
        if !seen_ids.insert(rule.id) {
            return Err(RuleSetError::new(
                &rule.file,
                &rule.pointer,
                format!("duplicate rule id {}", rule.id),
            ));
        }
        if rule.patterns.is_empty() {
            return Err(RuleSetError::new(
                &rule.file,
                &rule.pointer,
                format!("rule {}: empty pattern set", rule.id),
            ));
        }

        for &target in &rule.targets {
            if rule.match_kind == MatchKind::Cidr && target != Target::ClientIp {
                return Err(RuleSetError::new(
                    &rule.file,
                    &rule.pointer,
                    format!("rule {}: cidr match requires target CLIENT_IP", rule.id),
                ));
            }
            if target == Target::ClientIp && rule.match_kind != MatchKind::Cidr {
                return Err(RuleSetError::new(
                    &rule.file,
                    &rule.pointer,
                    format!("rule {}: CLIENT_IP targets require a cidr match", rule.id),
                ));
            }

            let phase = resolve_phase(rule, target)?;
            let regexes = if rule.match_kind == MatchKind::Regex {
                compile_regexes(rule)?
            } else {
                Vec::new()
            };
            let cidrs = if rule.match_kind == MatchKind::Cidr {
                compile_cidrs(rule)?
            } else {
                Vec::new()
            };

            buckets[phase.index()][target.index()].push(rules.len());
            rules.push(CompiledRule {
                id: rule.id,
                target,
                header_name: rule.header_name.clone(),
                match_kind: rule.match_kind,
                patterns: rule.patterns.clone(),
                regexes,
                cidrs,
                action: rule.action,
                phase,
                caseless: rule.caseless,
                negate: rule.negate,
                score: rule.score,
                priority: rule.priority,
                tags: rule.tags.clone(),
            });
        }
    }

    // Stable: equal priorities keep declaration order.
    for per_phase in &mut buckets {
        for bucket in per_phase {
            bucket.sort_by_key(|&i| rules[i].priority);
        }
    }

    Ok(CompiledSnapshot {
        rules,
        buckets,
        version: set.version.clone(),
        policies: set.policies.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(
        id: u64,
        targets: Vec<Target>,
        match_kind: MatchKind,
        patterns: Vec<&str>,
        action: Action,
        priority: i64,
    ) -> MergedRule {
        MergedRule {
            id,
            targets,
            header_name: None,
            match_kind,
            patterns: patterns.into_iter().map(String::from).collect(),
            action,
            phase: None,
            caseless: false,
            negate: false,
            score: 10,
            priority,
            tags: Vec::new(),
            file: "test.json".to_string(),
            pointer: "/rules/0".to_string(),
        }
    }

    fn set_of(rules: Vec<MergedRule>) -> MergedRuleSet {
        MergedRuleSet {
            rules,
            version: None,
            policies: None,
        }
    }

    #[test]
    fn test_bucket_priority_ordering_is_stable() {
        let rules = vec![
            merged(1, vec![Target::Uri], MatchKind::Contains, vec!["a"], Action::Deny, 5),
            merged(2, vec![Target::Uri], MatchKind::Contains, vec!["b"], Action::Deny, 1),
            merged(3, vec![Target::Uri], MatchKind::Contains, vec!["c"], Action::Deny, 3),
            merged(4, vec![Target::Uri], MatchKind::Contains, vec!["d"], Action::Deny, 3),
        ];
        let snapshot = compile(&set_of(rules)).unwrap();
        let order: Vec<u64> = snapshot
            .bucket(Phase::Detect, Target::Uri)
            .map(|r| r.id)
            .collect();
        // Priorities [5,1,3,3] sort to [1,3,3,5]; the equal pair keeps
        // declaration order.
        assert_eq!(order, vec![2, 3, 4, 1]);
    }

    #[test]
    fn test_multi_target_expansion() {
        let rules = vec![merged(
            1,
            vec![Target::Uri, Target::ArgsCombined, Target::Body],
            MatchKind::Contains,
            vec!["x"],
            Action::Deny,
            0,
        )];
        let snapshot = compile(&set_of(rules)).unwrap();
        assert_eq!(snapshot.rules().len(), 3);
        assert_eq!(snapshot.bucket(Phase::Detect, Target::Uri).count(), 1);
        assert_eq!(
            snapshot.bucket(Phase::Detect, Target::ArgsCombined).count(),
            1
        );
        assert_eq!(snapshot.bucket(Phase::Detect, Target::Body).count(), 1);
    }

    #[test]
    fn test_phase_inference() {
        let rules = vec![
            merged(1, vec![Target::ClientIp], MatchKind::Cidr, vec!["10.0.0.0/8"], Action::Bypass, 0),
            merged(2, vec![Target::ClientIp], MatchKind::Cidr, vec!["10.0.0.0/8"], Action::Deny, 0),
            merged(3, vec![Target::Uri], MatchKind::Contains, vec!["/health"], Action::Bypass, 0),
            merged(4, vec![Target::Uri], MatchKind::Contains, vec!["/admin"], Action::Deny, 0),
        ];
        let snapshot = compile(&set_of(rules)).unwrap();
        assert_eq!(snapshot.bucket(Phase::IpAllow, Target::ClientIp).count(), 1);
        assert_eq!(snapshot.bucket(Phase::IpBlock, Target::ClientIp).count(), 1);
        assert_eq!(snapshot.bucket(Phase::UriAllow, Target::Uri).count(), 1);
        assert_eq!(snapshot.bucket(Phase::Detect, Target::Uri).count(), 1);
    }

    #[test]
    fn test_explicit_incompatible_phase_rejected() {
        let mut rule = merged(1, vec![Target::Uri], MatchKind::Contains, vec!["x"], Action::Deny, 0);
        rule.phase = Some(Phase::UriAllow);
        let err = compile(&set_of(vec![rule])).unwrap_err();
        assert!(err.message.contains("incompatible"), "{}", err);
    }

    #[test]
    fn test_cidr_and_client_ip_are_coupled() {
        let rule = merged(1, vec![Target::Uri], MatchKind::Cidr, vec!["10.0.0.0/8"], Action::Deny, 0);
        assert!(compile(&set_of(vec![rule])).is_err());

        let rule = merged(1, vec![Target::ClientIp], MatchKind::Contains, vec!["10."], Action::Deny, 0);
        assert!(compile(&set_of(vec![rule])).is_err());
    }

    #[test]
    fn test_client_ip_log_has_no_phase() {
        let rule = merged(1, vec![Target::ClientIp], MatchKind::Cidr, vec!["10.0.0.0/8"], Action::Log, 0);
        let err = compile(&set_of(vec![rule])).unwrap_err();
        assert!(err.message.contains("DENY or BYPASS"), "{}", err);
    }

    #[test]
    fn test_invalid_regex_is_located() {
        let rule = merged(1, vec![Target::Uri], MatchKind::Regex, vec!["("], Action::Deny, 0);
        let err = compile(&set_of(vec![rule])).unwrap_err();
        assert_eq!(err.file, "test.json");
        assert_eq!(err.pointer, "/rules/0");
        assert!(err.message.contains("invalid regex"), "{}", err);
    }

    #[test]
    fn test_bare_ip_cidr_pattern() {
        let rule = merged(1, vec![Target::ClientIp], MatchKind::Cidr, vec!["192.0.2.1"], Action::Deny, 0);
        let snapshot = compile(&set_of(vec![rule])).unwrap();
        let compiled = snapshot.bucket(Phase::IpBlock, Target::ClientIp).next().unwrap();
        assert_eq!(compiled.cidrs[0].prefix_len(), 32);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let rules = vec![
            merged(1, vec![Target::Uri], MatchKind::Contains, vec!["a"], Action::Deny, 0),
            merged(1, vec![Target::Body], MatchKind::Contains, vec!["b"], Action::Deny, 0),
        ];
        assert!(compile(&set_of(rules)).is_err());
    }

    #[test]
    fn test_caseless_regex_compiled_case_insensitive() {
        let mut rule = merged(1, vec![Target::Uri], MatchKind::Regex, vec!["select"], Action::Deny, 0);
        rule.caseless = true;
        let snapshot = compile(&set_of(vec![rule])).unwrap();
        let compiled = snapshot.bucket(Phase::Detect, Target::Uri).next().unwrap();
        assert!(compiled.regexes[0].is_match("SELECT"));
    }
}
