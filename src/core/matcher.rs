//! Request matching engine.
//!
//! A five-stage pipeline over the compiled snapshot: ip-allow, ip-block,
//! reputation base-add, uri-allow, then the detect bundle. Stages
//! short-circuit on bypass/block; body acquisition is the pipeline's only
//! suspension point.

use std::net::Ipv4Addr;

use crate::core::compiler::{CompiledRule, CompiledSnapshot, MatchKind, Phase, Target};
use crate::core::enforcement::{EnforceOutcome, Enforcer, RuleHit};
use crate::core::event_log::RequestContext;
use crate::utils::{decode_url_component, split_query};

/// Stage result, matched explicitly by the pipeline driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Continue,
    Bypass,
    Block,
    Suspend,
    Error,
}

/// Terminal request decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Bypass,
    Block(u16),
    InternalError,
}

/// Pipeline progress after the early stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Suspended pending body acquisition; resume with `run_detect`.
    NeedBody,
    Done(Verdict),
}

/// Request fields the pipeline inspects, already decoded by the host.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    pub method: String,
    /// Decoded request path.
    pub uri: String,
    /// Raw query string, without the leading `?`.
    pub query: String,
    pub headers: Vec<(String, String)>,
    /// Host-order IPv4; 0 when unknown.
    pub client_ip: u32,
    pub has_body: bool,
}

impl RequestInfo {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn is_form_urlencoded(&self) -> bool {
        self.header("content-type")
            .map(|ct| {
                ct.to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            })
            .unwrap_or(false)
    }
}

/// Fixed evaluation order of the detect bundle.
const DETECT_TARGETS: [Target; 6] = [
    Target::Uri,
    Target::ArgsCombined,
    Target::ArgsName,
    Target::ArgsValue,
    Target::Body,
    Target::Header,
];

pub struct MatchingEngine<'a> {
    snapshot: &'a CompiledSnapshot,
    enforcer: &'a Enforcer<'a>,
}

impl<'a> MatchingEngine<'a> {
    pub fn new(snapshot: &'a CompiledSnapshot, enforcer: &'a Enforcer<'a>) -> Self {
        Self { snapshot, enforcer }
    }

    /// Stages 1-4. Returns `NeedBody` when a body is expected; otherwise
    /// runs the detect bundle against an empty body.
    pub fn run_early(
        &self,
        ctx: &mut RequestContext,
        req: &RequestInfo,
        now_ms: u64,
    ) -> PipelineState {
        match self.stage_ip_allow(ctx, req, now_ms) {
            StageOutcome::Continue => {}
            other => return self.terminal(ctx, other),
        }
        match self.stage_ip_block(ctx, req, now_ms) {
            StageOutcome::Continue => {}
            other => return self.terminal(ctx, other),
        }
        match self.stage_base_add(ctx, req, now_ms) {
            StageOutcome::Continue => {}
            other => return self.terminal(ctx, other),
        }
        match self.stage_uri_allow(ctx, req, now_ms) {
            StageOutcome::Continue => {}
            other => return self.terminal(ctx, other),
        }
        if req.has_body {
            return PipelineState::NeedBody;
        }
        PipelineState::Done(self.run_detect(ctx, req, &[], now_ms))
    }

    fn stage_ip_allow(
        &self,
        ctx: &mut RequestContext,
        req: &RequestInfo,
        now_ms: u64,
    ) -> StageOutcome {
        self.walk_ip_bucket(ctx, req, Phase::IpAllow, now_ms)
    }

    fn stage_ip_block(
        &self,
        ctx: &mut RequestContext,
        req: &RequestInfo,
        now_ms: u64,
    ) -> StageOutcome {
        self.walk_ip_bucket(ctx, req, Phase::IpBlock, now_ms)
    }

    fn stage_base_add(
        &self,
        ctx: &mut RequestContext,
        _req: &RequestInfo,
        now_ms: u64,
    ) -> StageOutcome {
        match self.enforcer.base_add(ctx, now_ms) {
            EnforceOutcome::Continue => StageOutcome::Continue,
            EnforceOutcome::Bypass => StageOutcome::Bypass,
            EnforceOutcome::Block => StageOutcome::Block,
        }
    }

    fn stage_uri_allow(
        &self,
        ctx: &mut RequestContext,
        req: &RequestInfo,
        now_ms: u64,
    ) -> StageOutcome {
        for rule in self.snapshot.bucket(Phase::UriAllow, Target::Uri) {
            let raw = match_text(rule, &req.uri);
            if let Some(hit) = hit_after_negate(rule, raw) {
                match self.enforcer.enforce_hit(ctx, &hit, now_ms) {
                    EnforceOutcome::Continue => {}
                    EnforceOutcome::Bypass => return StageOutcome::Bypass,
                    EnforceOutcome::Block => return StageOutcome::Block,
                }
            }
        }
        StageOutcome::Continue
    }

    fn walk_ip_bucket(
        &self,
        ctx: &mut RequestContext,
        req: &RequestInfo,
        phase: Phase,
        now_ms: u64,
    ) -> StageOutcome {
        if req.client_ip == 0 {
            return StageOutcome::Continue;
        }
        let ip = Ipv4Addr::from(req.client_ip);
        for rule in self.snapshot.bucket(phase, Target::ClientIp) {
            let raw = rule.cidrs.iter().position(|net| net.contains(&ip));
            if let Some(hit) = hit_after_negate(rule, raw) {
                match self.enforcer.enforce_hit(ctx, &hit, now_ms) {
                    EnforceOutcome::Continue => {}
                    EnforceOutcome::Bypass => return StageOutcome::Bypass,
                    EnforceOutcome::Block => return StageOutcome::Block,
                }
            }
        }
        StageOutcome::Continue
    }

    /// Stage 5: the detect bundle. Subjects are resolved once per request;
    /// the combined query decode is cached across rules.
    pub fn run_detect(
        &self,
        ctx: &mut RequestContext,
        req: &RequestInfo,
        body: &[u8],
        now_ms: u64,
    ) -> Verdict {
        let mut combined_args: Option<String> = None;
        let mut arg_pairs: Option<Vec<(String, String)>> = None;
        let mut body_subject: Option<String> = None;

        for target in DETECT_TARGETS {
            for rule in self.snapshot.bucket(Phase::Detect, target) {
                let raw = match target {
                    Target::Uri => match_text(rule, &req.uri),
                    Target::ArgsCombined => {
                        let subject = combined_args
                            .get_or_insert_with(|| decode_url_component(&req.query));
                        match_text(rule, subject)
                    }
                    Target::ArgsName => {
                        let pairs = arg_pairs.get_or_insert_with(|| decode_pairs(&req.query));
                        pairs.iter().find_map(|(name, _)| match_text(rule, name))
                    }
                    Target::ArgsValue => {
                        let pairs = arg_pairs.get_or_insert_with(|| decode_pairs(&req.query));
                        pairs.iter().find_map(|(_, value)| match_text(rule, value))
                    }
                    Target::Body => {
                        let subject = body_subject.get_or_insert_with(|| {
                            let text = String::from_utf8_lossy(body).into_owned();
                            if req.is_form_urlencoded() {
                                decode_url_component(&text)
                            } else {
                                text
                            }
                        });
                        match_text(rule, subject)
                    }
                    Target::Header => {
                        // An absent header matches as the empty string, so
                        // `^$` plus negate can assert presence.
                        let name = rule.header_name.as_deref().unwrap_or("");
                        let value = req.header(name).unwrap_or("");
                        match_text(rule, value)
                    }
                    Target::ClientIp => None,
                };
                if let Some(hit) = hit_after_negate(rule, raw) {
                    match self.enforcer.enforce_hit(ctx, &hit, now_ms) {
                        EnforceOutcome::Continue => {}
                        EnforceOutcome::Bypass => return Verdict::Bypass,
                        EnforceOutcome::Block => return self.block_verdict(ctx),
                    }
                }
            }
        }
        self.enforcer.finalize_allow(ctx);
        Verdict::Allow
    }

    fn terminal(&self, ctx: &RequestContext, outcome: StageOutcome) -> PipelineState {
        match outcome {
            StageOutcome::Continue => unreachable!("continue is not terminal"),
            StageOutcome::Bypass => PipelineState::Done(Verdict::Bypass),
            StageOutcome::Block => PipelineState::Done(self.block_verdict(ctx)),
            StageOutcome::Suspend => PipelineState::NeedBody,
            StageOutcome::Error => PipelineState::Done(Verdict::InternalError),
        }
    }

    fn block_verdict(&self, ctx: &RequestContext) -> Verdict {
        Verdict::Block(ctx.status.unwrap_or(403))
    }
}

fn decode_pairs(query: &str) -> Vec<(String, String)> {
    split_query(query)
        .map(|(name, value)| (decode_url_component(name), decode_url_component(value)))
        .collect()
}

/// Raw text match against the rule's OR-combined pattern list. Returns the
/// index of the first matching pattern.
fn match_text(rule: &CompiledRule, subject: &str) -> Option<usize> {
    match rule.match_kind {
        MatchKind::Contains => rule
            .patterns
            .iter()
            .position(|p| contains(subject, p, rule.caseless)),
        MatchKind::Exact => rule.patterns.iter().position(|p| {
            if rule.caseless {
                subject.eq_ignore_ascii_case(p)
            } else {
                subject == p
            }
        }),
        MatchKind::Regex => rule.regexes.iter().position(|re| re.is_match(subject)),
        MatchKind::Cidr => None,
    }
}

fn contains(subject: &str, pattern: &str, caseless: bool) -> bool {
    if !caseless {
        return subject.contains(pattern);
    }
    let subject = subject.as_bytes();
    let pattern = pattern.as_bytes();
    if pattern.is_empty() || pattern.len() > subject.len() {
        return pattern.is_empty();
    }
    subject
        .windows(pattern.len())
        .any(|w| w.eq_ignore_ascii_case(pattern))
}

/// Apply the negate flag to a raw match. A negate hit carries no pattern
/// capture since nothing matched.
fn hit_after_negate<'r>(rule: &'r CompiledRule, raw: Option<usize>) -> Option<RuleHit<'r>> {
    if rule.negate {
        if raw.is_none() {
            Some(RuleHit {
                rule,
                pattern: None,
                pattern_index: None,
            })
        } else {
            None
        }
    } else {
        raw.map(|i| RuleHit {
            rule,
            pattern: rule.patterns.get(i).cloned(),
            pattern_index: Some(i),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compiler::compile;
    use crate::core::enforcement::{DynamicBlockSettings, Mode};
    use crate::core::event_log::{LogLevel, MemorySink};
    use crate::core::merger::{MergedRule, MergedRuleSet};
    use crate::core::reputation::ReputationStore;
    use crate::core::compiler::Action;

    fn rule(
        id: u64,
        targets: Vec<Target>,
        match_kind: MatchKind,
        patterns: Vec<&str>,
        action: Action,
    ) -> MergedRule {
        MergedRule {
            id,
            targets,
            header_name: None,
            match_kind,
            patterns: patterns.into_iter().map(String::from).collect(),
            action,
            phase: None,
            caseless: true,
            negate: false,
            score: 20,
            priority: 0,
            tags: Vec::new(),
            file: "test.json".to_string(),
            pointer: "/rules/0".to_string(),
        }
    }

    fn settings() -> DynamicBlockSettings {
        DynamicBlockSettings {
            enabled: true,
            base_score: 1,
            threshold: 1000,
            window_ms: 60_000,
            ban_ms: 600_000,
        }
    }

    fn ctx(ip: u32, method: &str, uri: &str) -> RequestContext {
        RequestContext::new(
            ip,
            method.to_string(),
            uri.to_string(),
            None,
            Mode::BlockEnforcing,
            LogLevel::Info,
        )
    }

    struct Harness {
        snapshot: CompiledSnapshot,
        store: ReputationStore,
        sink: MemorySink,
    }

    impl Harness {
        fn new(rules: Vec<MergedRule>) -> Self {
            let set = MergedRuleSet {
                rules,
                version: None,
                policies: None,
            };
            Self {
                snapshot: compile(&set).unwrap(),
                store: ReputationStore::new(1024),
                sink: MemorySink::new(),
            }
        }

        fn run(&self, req: &RequestInfo, body: &[u8]) -> Verdict {
            let enforcer =
                Enforcer::new(&self.store, Mode::BlockEnforcing, settings(), &self.sink);
            let engine = MatchingEngine::new(&self.snapshot, &enforcer);
            let mut ctx = ctx(req.client_ip, &req.method, &req.uri);
            match engine.run_early(&mut ctx, req, 0) {
                PipelineState::Done(verdict) => verdict,
                PipelineState::NeedBody => engine.run_detect(&mut ctx, req, body, 0),
            }
        }
    }

    fn get(uri: &str, query: &str, ip: u32) -> RequestInfo {
        RequestInfo {
            method: "GET".to_string(),
            uri: uri.to_string(),
            query: query.to_string(),
            headers: Vec::new(),
            client_ip: ip,
            has_body: false,
        }
    }

    #[test]
    fn test_end_to_end_sql_injection_block() {
        let harness = Harness::new(vec![rule(
            200010,
            vec![Target::ArgsCombined],
            MatchKind::Regex,
            vec!["select.*from"],
            Action::Deny,
        )]);
        let req = get("/search", "q=select+1+from+x", 0x0A00_0001);

        let verdict = harness.run(&req, &[]);
        assert_eq!(verdict, Verdict::Block(403));

        let record: serde_json::Value =
            serde_json::from_str(&harness.sink.lines()[0]).unwrap();
        assert_eq!(record["finalAction"], "block");
        assert_eq!(record["blockRuleId"], 200010);
        assert_eq!(record["status"], 403);
        let decisive: Vec<_> = record["events"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|e| e["decisive"].as_bool().unwrap())
            .collect();
        assert_eq!(decisive.len(), 1);
        assert_eq!(decisive[0]["ruleId"], 200010);
    }

    #[test]
    fn test_ip_allow_bypasses_before_detect() {
        let harness = Harness::new(vec![
            rule(
                1,
                vec![Target::ClientIp],
                MatchKind::Cidr,
                vec!["10.0.0.0/8"],
                Action::Bypass,
            ),
            rule(
                2,
                vec![Target::Uri],
                MatchKind::Contains,
                vec!["/admin"],
                Action::Deny,
            ),
        ]);
        let req = get("/admin", "", 0x0A00_0001);
        assert_eq!(harness.run(&req, &[]), Verdict::Bypass);

        let record: serde_json::Value =
            serde_json::from_str(&harness.sink.lines()[0]).unwrap();
        assert_eq!(record["finalActionType"], "bypass_by_ip_whitelist");
    }

    #[test]
    fn test_ip_block_stage() {
        let harness = Harness::new(vec![rule(
            1,
            vec![Target::ClientIp],
            MatchKind::Cidr,
            vec!["192.0.2.0/24"],
            Action::Deny,
        )]);
        let req = get("/", "", u32::from(Ipv4Addr::new(192, 0, 2, 7)));
        assert_eq!(harness.run(&req, &[]), Verdict::Block(403));

        let record: serde_json::Value =
            serde_json::from_str(&harness.sink.lines()[0]).unwrap();
        assert_eq!(record["finalActionType"], "block_by_ip_blacklist");
        assert_eq!(record["attackType"], "ip_blacklist");
    }

    #[test]
    fn test_uri_allow_bypass() {
        let harness = Harness::new(vec![
            rule(
                1,
                vec![Target::Uri],
                MatchKind::Exact,
                vec!["/health"],
                Action::Bypass,
            ),
            rule(
                2,
                vec![Target::Uri],
                MatchKind::Contains,
                vec!["health"],
                Action::Deny,
            ),
        ]);
        let req = get("/health", "", 0x0A00_0001);
        assert_eq!(harness.run(&req, &[]), Verdict::Bypass);

        let record: serde_json::Value =
            serde_json::from_str(&harness.sink.lines()[0]).unwrap();
        assert_eq!(record["finalActionType"], "bypass_by_uri_whitelist");
    }

    #[test]
    fn test_pattern_or_semantics() {
        let harness = Harness::new(vec![rule(
            1,
            vec![Target::Uri],
            MatchKind::Contains,
            vec!["admin", "root"],
            Action::Deny,
        )]);
        assert_eq!(
            harness.run(&get("/root/etc", "", 1), &[]),
            Verdict::Block(403)
        );
        assert_eq!(harness.run(&get("/user", "", 1), &[]), Verdict::Allow);
    }

    #[test]
    fn test_negate_inverts_match() {
        let mut required_header = rule(
            1,
            vec![Target::Header],
            MatchKind::Regex,
            vec!["^$"],
            Action::Deny,
        );
        required_header.header_name = Some("X-Api-Key".to_string());
        required_header.negate = true;
        // Negated "empty header" rule: blocks only when the header is set.
        let harness = Harness::new(vec![required_header]);

        let mut with_key = get("/", "", 1);
        with_key
            .headers
            .push(("X-Api-Key".to_string(), "secret".to_string()));
        assert_eq!(harness.run(&with_key, &[]), Verdict::Block(403));
        assert_eq!(harness.run(&get("/", "", 1), &[]), Verdict::Allow);
    }

    #[test]
    fn test_args_name_and_value_targets() {
        let harness = Harness::new(vec![
            rule(
                1,
                vec![Target::ArgsName],
                MatchKind::Exact,
                vec!["cmd"],
                Action::Deny,
            ),
            rule(
                2,
                vec![Target::ArgsValue],
                MatchKind::Contains,
                vec!["/etc/passwd"],
                Action::Deny,
            ),
        ]);
        assert_eq!(
            harness.run(&get("/", "cmd=ls", 1), &[]),
            Verdict::Block(403)
        );
        assert_eq!(
            harness.run(&get("/", "file=%2Fetc%2Fpasswd", 1), &[]),
            Verdict::Block(403)
        );
        assert_eq!(harness.run(&get("/", "page=1", 1), &[]), Verdict::Allow);
    }

    #[test]
    fn test_body_suspend_and_resume() {
        let harness = Harness::new(vec![rule(
            1,
            vec![Target::Body],
            MatchKind::Contains,
            vec!["<script"],
            Action::Deny,
        )]);
        let enforcer = Enforcer::new(
            &harness.store,
            Mode::BlockEnforcing,
            settings(),
            &harness.sink,
        );
        let engine = MatchingEngine::new(&harness.snapshot, &enforcer);

        let mut req = get("/submit", "", 1);
        req.method = "POST".to_string();
        req.has_body = true;
        let mut ctx = ctx(1, "POST", "/submit");
        assert_eq!(engine.run_early(&mut ctx, &req, 0), PipelineState::NeedBody);
        let verdict = engine.run_detect(&mut ctx, &req, b"comment=<script>alert(1)</script>", 0);
        assert_eq!(verdict, Verdict::Block(403));
    }

    #[test]
    fn test_get_never_suspends() {
        let harness = Harness::new(vec![rule(
            1,
            vec![Target::Body],
            MatchKind::Contains,
            vec!["<script"],
            Action::Deny,
        )]);
        // No body expected: the detect bundle runs against an empty body.
        assert_eq!(harness.run(&get("/", "", 1), &[]), Verdict::Allow);
    }

    #[test]
    fn test_form_urlencoded_body_is_decoded() {
        let harness = Harness::new(vec![rule(
            1,
            vec![Target::Body],
            MatchKind::Regex,
            vec!["select.*from"],
            Action::Deny,
        )]);
        let mut req = get("/submit", "", 1);
        req.method = "POST".to_string();
        req.has_body = true;
        req.headers.push((
            "Content-Type".to_string(),
            "application/x-www-form-urlencoded".to_string(),
        ));
        let enforcer = Enforcer::new(
            &harness.store,
            Mode::BlockEnforcing,
            settings(),
            &harness.sink,
        );
        let engine = MatchingEngine::new(&harness.snapshot, &enforcer);
        let mut ctx = ctx(1, "POST", "/submit");
        assert_eq!(engine.run_early(&mut ctx, &req, 0), PipelineState::NeedBody);
        let verdict = engine.run_detect(&mut ctx, &req, b"q=select+1+from+x", 0);
        assert_eq!(verdict, Verdict::Block(403));
    }

    #[test]
    fn test_log_rule_continues_to_allow() {
        let harness = Harness::new(vec![rule(
            1,
            vec![Target::Uri],
            MatchKind::Contains,
            vec!["probe"],
            Action::Log,
        )]);
        let verdict = harness.run(&get("/probe", "", 1), &[]);
        assert_eq!(verdict, Verdict::Allow);
        // Log hit is Info-level, so the allowed request still emits a record.
        assert_eq!(harness.sink.lines().len(), 1);
        let record: serde_json::Value =
            serde_json::from_str(&harness.sink.lines()[0]).unwrap();
        assert_eq!(record["finalAction"], "none");
        assert_eq!(record["finalActionType"], "allow");
    }
}
