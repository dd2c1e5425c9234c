//! Structured audit event logger.
//!
//! Each request owns a `RequestContext` that accumulates events and emits at
//! most one JSONL record at flush time. Block and bypass outcomes force the
//! record out; everything else is gated by the configured minimum severity.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::core::compiler::Target;
use crate::core::enforcement::{Intent, Mode};
use crate::utils::format_ipv4;

/// Audit severity. Ordered so that a request's effective level can be raised
/// monotonically as events are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Debug,
    Info,
    Alert,
    Error,
}

/// Whether an event is recorded unconditionally or only when the configured
/// minimum severity permits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Always,
    LevelGated,
}

/// Event payload variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    #[serde(rename_all = "camelCase")]
    RuleHit {
        rule_id: u64,
        intent: Intent,
        score_delta: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pattern_index: Option<usize>,
        target: Target,
        negate: bool,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Reputation { score_delta: u64, reason: String },
    #[serde(rename_all = "camelCase")]
    Ban { window_ms: u64 },
    #[serde(rename_all = "camelCase")]
    WindowReset {
        previous_score: u64,
        window_start_ms: u64,
        window_end_ms: u64,
    },
}

/// One recorded audit event. `decisive` is assigned once, at flush.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    pub level: LogLevel,
    pub decisive: bool,
}

/// Final request action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalAction {
    None,
    Block,
    Bypass,
}

/// Classification tag for the final action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalActionType {
    Allow,
    BypassByIpWhitelist,
    BypassByUriWhitelist,
    BlockByRule,
    BlockByReputation,
    BlockByIpBlacklist,
    BlockByDynamicBlock,
}

/// Append-only destination for emitted records.
pub trait LogSink: Send + Sync {
    fn append(&self, line: &str);
}

/// File-backed sink, one record per line.
pub struct FileSink {
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl LogSink for FileSink {
    fn append(&self, line: &str) {
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = writeln!(file, "{}", line) {
            log::error!("audit log write failed: {}", e);
        }
    }
}

/// Sink used when the audit log is disabled.
pub struct NullSink;

impl LogSink for NullSink {
    fn append(&self, _line: &str) {}
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for MemorySink {
    fn append(&self, line: &str) {
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line.to_string()),
            Err(poisoned) => poisoned.into_inner().push(line.to_string()),
        }
    }
}

/// Emitted JSONL record shape.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Record<'a> {
    time: String,
    client_ip: String,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    uri: &'a str,
    events: &'a [Event],
    #[serde(skip_serializing_if = "Option::is_none")]
    attack_type: Option<String>,
    final_action: FinalAction,
    final_action_type: FinalActionType,
    current_global_action: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    block_rule_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    level: LogLevel,
}

/// Per-request audit state: the event list, severity accumulator, final
/// action fields, and the one-shot flush guard.
pub struct RequestContext {
    pub client_ip: u32,
    pub method: String,
    pub uri: String,
    pub host: Option<String>,
    time: String,
    mode: Mode,
    min_level: LogLevel,
    pub total_score: u64,
    pub final_action: FinalAction,
    pub final_action_type: FinalActionType,
    pub status: Option<u16>,
    pub block_rule_id: Option<u64>,
    events: Vec<Event>,
    effective_level: LogLevel,
    flushed: bool,
}

impl RequestContext {
    pub fn new(
        client_ip: u32,
        method: String,
        uri: String,
        host: Option<String>,
        mode: Mode,
        min_level: LogLevel,
    ) -> Self {
        Self {
            client_ip,
            method,
            uri,
            host,
            time: Utc::now().to_rfc3339(),
            mode,
            min_level,
            total_score: 0,
            final_action: FinalAction::None,
            final_action_type: FinalActionType::Allow,
            status: None,
            block_rule_id: None,
            events: Vec::new(),
            effective_level: LogLevel::None,
            flushed: false,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn effective_level(&self) -> LogLevel {
        self.effective_level
    }

    /// Append an event. Level-gated events below the configured minimum are
    /// dropped and do not raise the request's effective severity.
    pub fn append(&mut self, kind: EventKind, level: LogLevel, collect: CollectMode) {
        if collect == CollectMode::LevelGated && level < self.min_level {
            return;
        }
        if level > self.effective_level {
            self.effective_level = level;
        }
        self.events.push(Event {
            kind,
            level,
            decisive: false,
        });
    }

    /// Raise the effective severity without recording an event.
    pub fn raise_level(&mut self, level: LogLevel) {
        if level > self.effective_level {
            self.effective_level = level;
        }
    }

    pub fn finalize(
        &mut self,
        action: FinalAction,
        action_type: FinalActionType,
        status: Option<u16>,
        block_rule_id: Option<u64>,
    ) {
        self.final_action = action;
        self.final_action_type = action_type;
        self.status = status;
        self.block_rule_id = block_rule_id;
    }

    /// Index of the decisive event, chosen lazily from the final action.
    fn decisive_index(&self) -> Option<usize> {
        match self.final_action {
            FinalAction::Bypass => self.events.iter().rposition(|e| {
                matches!(
                    e.kind,
                    EventKind::RuleHit {
                        intent: Intent::Bypass,
                        ..
                    }
                )
            }),
            FinalAction::Block => match self.final_action_type {
                FinalActionType::BlockByReputation | FinalActionType::BlockByDynamicBlock => self
                    .events
                    .iter()
                    .rposition(|e| matches!(e.kind, EventKind::Ban { .. })),
                _ => {
                    let by_id = self.block_rule_id.and_then(|id| {
                        self.events.iter().rposition(
                            |e| matches!(e.kind, EventKind::RuleHit { rule_id, .. } if rule_id == id),
                        )
                    });
                    by_id.or_else(|| {
                        self.events.iter().rposition(|e| {
                            matches!(
                                e.kind,
                                EventKind::RuleHit {
                                    intent: Intent::Block,
                                    ..
                                }
                            )
                        })
                    })
                }
            },
            FinalAction::None => None,
        }
    }

    fn attack_type(&self, decisive: Option<usize>) -> Option<String> {
        if let Some(idx) = decisive {
            if let EventKind::RuleHit { tags, .. } = &self.events[idx].kind {
                if let Some(first) = tags.first() {
                    return Some(first.clone());
                }
            }
        }
        match self.final_action_type {
            FinalActionType::BlockByReputation | FinalActionType::BlockByDynamicBlock => {
                Some("dynamic_block".to_string())
            }
            FinalActionType::BlockByIpBlacklist => Some("ip_blacklist".to_string()),
            FinalActionType::BlockByRule => Some("generic".to_string()),
            _ => None,
        }
    }

    /// Emit the record. Idempotent; forced when the final action is block or
    /// bypass, otherwise gated on the accumulated severity.
    pub fn flush(&mut self, sink: &dyn LogSink) {
        if self.flushed {
            return;
        }
        self.flushed = true;

        let forced = !matches!(self.final_action, FinalAction::None);
        if !forced && self.effective_level < self.min_level {
            return;
        }

        if let Some(idx) = self.decisive_index() {
            self.events[idx].decisive = true;
        }
        let attack_type = self.attack_type(self.events.iter().position(|e| e.decisive));

        let record = Record {
            time: self.time.clone(),
            client_ip: format_ipv4(self.client_ip),
            method: &self.method,
            host: self.host.as_deref(),
            uri: &self.uri,
            events: &self.events,
            attack_type,
            final_action: self.final_action,
            final_action_type: self.final_action_type,
            current_global_action: self.mode,
            block_rule_id: self.block_rule_id,
            status: self.status,
            level: self.effective_level,
        };
        match serde_json::to_string(&record) {
            Ok(line) => sink.append(&line),
            Err(e) => log::error!("audit record serialization failed: {}", e),
        }
    }
}
