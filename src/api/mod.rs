//! HTTP surface of the WAF service.
//!
//! The default service inspects every inbound request through the matching
//! pipeline; `/api/v1` carries the admin endpoints (health, rule reload).

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::Serialize;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::core::compiler::CompiledSnapshot;
use crate::core::enforcement::{DynamicBlockSettings, Enforcer};
use crate::core::event_log::{LogSink, RequestContext};
use crate::core::matcher::{MatchingEngine, PipelineState, RequestInfo, Verdict};
use crate::core::reputation::ReputationStore;
use crate::core::build_snapshot;
use crate::models::Config;
use crate::utils::{current_time_millis, parse_ipv4};

pub struct ApiState {
    pub snapshot: RwLock<Arc<CompiledSnapshot>>,
    pub store: Arc<ReputationStore>,
    pub config: Arc<Config>,
    pub sink: Arc<dyn LogSink>,
}

impl ApiState {
    fn current_snapshot(&self) -> Arc<CompiledSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn dynamic_settings(&self) -> DynamicBlockSettings {
        let cfg = &self.config.dynamic_block;
        DynamicBlockSettings {
            enabled: cfg.enabled,
            base_score: cfg.base_score,
            threshold: cfg.threshold,
            window_ms: cfg.window_seconds * 1000,
            ban_ms: cfg.ban_seconds * 1000,
        }
    }
}

/// API configuration function for Actix-web
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/reload").route(web::post().to(reload_rules))),
    )
    .default_service(web::to(inspect));
}

/// Health check endpoint response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InspectResponse {
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_rule_id: Option<u64>,
}

#[derive(Serialize)]
struct ReloadResponse {
    status: String,
    rules: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Re-run merge and compile, swapping the active snapshot only on success.
async fn reload_rules(state: web::Data<ApiState>) -> impl Responder {
    match build_snapshot(&state.config) {
        Ok(snapshot) => {
            let rules = snapshot.rules().len();
            let snapshot = Arc::new(snapshot);
            match state.snapshot.write() {
                Ok(mut guard) => *guard = snapshot,
                Err(poisoned) => *poisoned.into_inner() = snapshot,
            }
            log::info!("rule snapshot reloaded, {} compiled rules", rules);
            HttpResponse::Ok().json(ReloadResponse {
                status: "reloaded".to_string(),
                rules,
            })
        }
        Err(e) => {
            log::error!("rule reload failed: {}", e);
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: e.to_string(),
            })
        }
    }
}

/// Default service: run the inbound request through the pipeline and map
/// the verdict to an HTTP response.
pub async fn inspect(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<ApiState>,
) -> impl Responder {
    if !state.config.enforcement.enabled {
        return HttpResponse::Ok().json(InspectResponse {
            action: "allow",
            block_rule_id: None,
        });
    }

    let info = request_info(&req, &body, state.config.server.trust_forwarded_for);
    let snapshot = state.current_snapshot();
    let enforcer = Enforcer::new(
        &state.store,
        state.config.enforcement.mode,
        state.dynamic_settings(),
        state.sink.as_ref(),
    );
    let engine = MatchingEngine::new(&snapshot, &enforcer);

    let host = info.header("host").map(str::to_string);
    let mut ctx = RequestContext::new(
        info.client_ip,
        info.method.clone(),
        info.uri.clone(),
        host,
        state.config.enforcement.mode,
        state.config.audit_log.min_level,
    );

    let now_ms = current_time_millis();
    let verdict = match engine.run_early(&mut ctx, &info, now_ms) {
        PipelineState::Done(verdict) => verdict,
        // The body already arrived with the request; resume immediately.
        PipelineState::NeedBody => engine.run_detect(&mut ctx, &info, &body, now_ms),
    };

    match verdict {
        Verdict::Allow => HttpResponse::Ok().json(InspectResponse {
            action: "allow",
            block_rule_id: None,
        }),
        Verdict::Bypass => HttpResponse::Ok().json(InspectResponse {
            action: "bypass",
            block_rule_id: None,
        }),
        Verdict::Block(status) => {
            let status = actix_web::http::StatusCode::from_u16(status)
                .unwrap_or(actix_web::http::StatusCode::FORBIDDEN);
            HttpResponse::build(status).json(InspectResponse {
                action: "block",
                block_rule_id: ctx.block_rule_id,
            })
        }
        Verdict::InternalError => HttpResponse::InternalServerError().json(ErrorResponse {
            error: "request inspection failed".to_string(),
        }),
    }
}

fn request_info(req: &HttpRequest, body: &[u8], trust_forwarded_for: bool) -> RequestInfo {
    let method = req.method().as_str().to_string();
    let uri = match urlencoding::decode(req.path()) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => req.path().to_string(),
    };
    let headers = req
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
    let info = RequestInfo {
        method: method.clone(),
        uri,
        query: req.query_string().to_string(),
        headers,
        client_ip: 0,
        has_body: !body.is_empty() && method != "GET" && method != "HEAD",
    };
    RequestInfo {
        client_ip: resolve_client_ip(req, &info, trust_forwarded_for),
        ..info
    }
}

/// Resolve the client IPv4. The leftmost X-Forwarded-For entry wins when the
/// header is trusted; otherwise the connection peer address.
fn resolve_client_ip(req: &HttpRequest, info: &RequestInfo, trust_forwarded_for: bool) -> u32 {
    if trust_forwarded_for {
        if let Some(forwarded) = info.header("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                let ip = parse_ipv4(first);
                if ip != 0 {
                    return ip;
                }
            }
        }
    }
    match req.peer_addr() {
        Some(addr) => match addr.ip() {
            IpAddr::V4(v4) => u32::from(v4),
            IpAddr::V6(_) => 0,
        },
        None => 0,
    }
}

/// Open the configured audit sink; an empty path disables the audit log.
pub fn open_sink(config: &Config) -> std::io::Result<Arc<dyn LogSink>> {
    if config.audit_log.path.is_empty() {
        return Ok(Arc::new(crate::core::event_log::NullSink));
    }
    let sink = crate::core::event_log::FileSink::open(Path::new(&config.audit_log.path))?;
    Ok(Arc::new(sink))
}
