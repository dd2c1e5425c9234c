use criterion::{black_box, criterion_group, criterion_main, Criterion};

use waf_protection_service::core::compiler::{compile, Action, MatchKind, Target};
use waf_protection_service::core::enforcement::{DynamicBlockSettings, Enforcer, Mode};
use waf_protection_service::core::event_log::{LogLevel, NullSink, RequestContext};
use waf_protection_service::core::matcher::{MatchingEngine, RequestInfo};
use waf_protection_service::core::merger::{MergedRule, MergedRuleSet};
use waf_protection_service::core::reputation::ReputationStore;

fn rule(id: u64, target: Target, match_kind: MatchKind, pattern: &str, action: Action) -> MergedRule {
    MergedRule {
        id,
        targets: vec![target],
        header_name: None,
        match_kind,
        patterns: vec![pattern.to_string()],
        action,
        phase: None,
        caseless: true,
        negate: false,
        score: 1,
        priority: 0,
        tags: Vec::new(),
        file: "bench.json".to_string(),
        pointer: "/rules/0".to_string(),
    }
}

fn detect_bundle_benchmark(c: &mut Criterion) {
    let mut rules = Vec::new();
    for i in 0..50 {
        rules.push(rule(
            1000 + i,
            Target::ArgsCombined,
            MatchKind::Regex,
            "(select|union).*(from|where)",
            Action::Deny,
        ));
        rules.push(rule(
            2000 + i,
            Target::Uri,
            MatchKind::Contains,
            "/wp-admin",
            Action::Log,
        ));
    }
    let set = MergedRuleSet {
        rules,
        version: None,
        policies: None,
    };
    let snapshot = compile(&set).unwrap();
    let store = ReputationStore::new(1024);
    let sink = NullSink;
    let settings = DynamicBlockSettings {
        enabled: false,
        base_score: 0,
        threshold: 1000,
        window_ms: 60_000,
        ban_ms: 600_000,
    };

    let req = RequestInfo {
        method: "GET".to_string(),
        uri: "/products/search".to_string(),
        query: "q=red+shoes&page=2&sort=price".to_string(),
        headers: vec![("Host".to_string(), "shop.example".to_string())],
        client_ip: 0x0A00_0001,
        has_body: false,
    };

    c.bench_function("detect_bundle_clean_request", |b| {
        b.iter(|| {
            let enforcer = Enforcer::new(&store, Mode::BlockEnforcing, settings, &sink);
            let engine = MatchingEngine::new(&snapshot, &enforcer);
            let mut ctx = RequestContext::new(
                req.client_ip,
                req.method.clone(),
                req.uri.clone(),
                None,
                Mode::BlockEnforcing,
                LogLevel::Error,
            );
            black_box(engine.run_early(&mut ctx, &req, 0))
        })
    });

    c.bench_function("detect_bundle_blocked_request", |b| {
        let mut attack = req.clone();
        attack.query = "q=select+password+from+users".to_string();
        b.iter(|| {
            let enforcer = Enforcer::new(&store, Mode::BlockEnforcing, settings, &sink);
            let engine = MatchingEngine::new(&snapshot, &enforcer);
            let mut ctx = RequestContext::new(
                attack.client_ip,
                attack.method.clone(),
                attack.uri.clone(),
                None,
                Mode::BlockEnforcing,
                LogLevel::Error,
            );
            black_box(engine.run_early(&mut ctx, &attack, 0))
        })
    });
}

criterion_group!(benches, detect_bundle_benchmark);
criterion_main!(benches);
