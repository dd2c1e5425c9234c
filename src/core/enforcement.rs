//! Enforcement decision engine.
//!
//! Reconciles a rule's intent, the global enforcement mode, and reputation
//! state into one final action, appending audit events along the way. All
//! settings are threaded explicitly; nothing here reads ambient state.

use serde::{Deserialize, Serialize};

use crate::core::compiler::{Action, CompiledRule, Phase};
use crate::core::event_log::{
    CollectMode, EventKind, FinalAction, FinalActionType, LogLevel, LogSink, RequestContext,
};
use crate::core::reputation::ReputationStore;

/// What a matched rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Block,
    Log,
    Bypass,
}

impl Intent {
    pub fn from_action(action: Action) -> Self {
        match action {
            Action::Deny => Self::Block,
            Action::Log => Self::Log,
            Action::Bypass => Self::Bypass,
        }
    }
}

/// Global enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[serde(rename = "block")]
    BlockEnforcing,
    #[serde(rename = "log")]
    LogOnly,
}

/// Dynamic-block settings, resolved once from configuration.
#[derive(Debug, Clone, Copy)]
pub struct DynamicBlockSettings {
    pub enabled: bool,
    pub base_score: u64,
    pub threshold: u64,
    pub window_ms: u64,
    pub ban_ms: u64,
}

/// Outcome of one enforcement call, as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforceOutcome {
    Continue,
    Bypass,
    Block,
}

/// A matched rule plus its matched-pattern capture.
pub struct RuleHit<'r> {
    pub rule: &'r CompiledRule,
    pub pattern: Option<String>,
    pub pattern_index: Option<usize>,
}

const BLOCK_STATUS: u16 = 403;

pub struct Enforcer<'a> {
    store: &'a ReputationStore,
    mode: Mode,
    dynamic: DynamicBlockSettings,
    sink: &'a dyn LogSink,
}

impl<'a> Enforcer<'a> {
    pub fn new(
        store: &'a ReputationStore,
        mode: Mode,
        dynamic: DynamicBlockSettings,
        sink: &'a dyn LogSink,
    ) -> Self {
        Self {
            store,
            mode,
            dynamic,
            sink,
        }
    }

    /// Enforce one rule hit. Bypass intents skip reputation entirely and
    /// flush immediately; everything else passes through the reputation
    /// check before intent dispatch.
    pub fn enforce_hit(
        &self,
        ctx: &mut RequestContext,
        hit: &RuleHit,
        now_ms: u64,
    ) -> EnforceOutcome {
        let rule = hit.rule;
        let intent = Intent::from_action(rule.action);
        let level = match intent {
            Intent::Block | Intent::Log => LogLevel::Info,
            Intent::Bypass => LogLevel::Debug,
        };
        ctx.append(
            EventKind::RuleHit {
                rule_id: rule.id,
                intent,
                score_delta: rule.score,
                pattern: hit.pattern.clone(),
                pattern_index: hit.pattern_index,
                target: rule.target,
                negate: rule.negate,
                tags: rule.tags.clone(),
            },
            level,
            CollectMode::Always,
        );

        if intent == Intent::Bypass {
            let action_type = match rule.phase {
                Phase::IpAllow => FinalActionType::BypassByIpWhitelist,
                _ => FinalActionType::BypassByUriWhitelist,
            };
            ctx.finalize(FinalAction::Bypass, action_type, None, None);
            ctx.flush(self.sink);
            return EnforceOutcome::Bypass;
        }

        match self.apply_reputation(ctx, rule.score, None, now_ms) {
            EnforceOutcome::Block => return EnforceOutcome::Block,
            EnforceOutcome::Bypass | EnforceOutcome::Continue => {}
        }

        match intent {
            Intent::Block => {
                if self.mode == Mode::BlockEnforcing {
                    let action_type = if rule.phase == Phase::IpBlock {
                        FinalActionType::BlockByIpBlacklist
                    } else {
                        FinalActionType::BlockByRule
                    };
                    ctx.raise_level(LogLevel::Alert);
                    ctx.finalize(
                        FinalAction::Block,
                        action_type,
                        Some(BLOCK_STATUS),
                        Some(rule.id),
                    );
                    ctx.flush(self.sink);
                    EnforceOutcome::Block
                } else {
                    // Log-only suppresses the block; the audit trail keeps
                    // the hit and the request continues.
                    EnforceOutcome::Continue
                }
            }
            Intent::Log => EnforceOutcome::Continue,
            Intent::Bypass => unreachable!("bypass handled above"),
        }
    }

    /// Baseline reputation contribution, independent of any rule match.
    pub fn base_add(&self, ctx: &mut RequestContext, now_ms: u64) -> EnforceOutcome {
        self.apply_reputation(ctx, self.dynamic.base_score, Some("base"), now_ms)
    }

    /// End-of-request flush for allowed requests (severity-gated).
    pub fn finalize_allow(&self, ctx: &mut RequestContext) {
        ctx.flush(self.sink);
    }

    /// Ban check plus score accumulation. A pre-existing ban blocks as
    /// block_by_dynamic_block; a ban created by this contribution blocks as
    /// block_by_reputation. Log-only suppresses both.
    fn apply_reputation(
        &self,
        ctx: &mut RequestContext,
        delta: u64,
        reason: Option<&str>,
        now_ms: u64,
    ) -> EnforceOutcome {
        if !self.dynamic.enabled || ctx.client_ip == 0 {
            return EnforceOutcome::Continue;
        }

        if self.store.is_banned(ctx.client_ip, now_ms) {
            ctx.append(
                EventKind::Ban {
                    window_ms: self.dynamic.window_ms,
                },
                LogLevel::Alert,
                CollectMode::Always,
            );
            if self.mode == Mode::BlockEnforcing {
                ctx.finalize(
                    FinalAction::Block,
                    FinalActionType::BlockByDynamicBlock,
                    Some(BLOCK_STATUS),
                    None,
                );
                ctx.flush(self.sink);
                return EnforceOutcome::Block;
            }
            return EnforceOutcome::Continue;
        }

        if let Some(reason) = reason {
            ctx.append(
                EventKind::Reputation {
                    score_delta: delta,
                    reason: reason.to_string(),
                },
                LogLevel::Debug,
                CollectMode::LevelGated,
            );
        }
        ctx.total_score = ctx.total_score.saturating_add(delta);

        let outcome = self.store.add_score(
            ctx.client_ip,
            delta,
            now_ms,
            self.dynamic.window_ms,
            self.dynamic.threshold,
            self.dynamic.ban_ms,
        );
        if let Some((previous_score, window_start)) = outcome.window_reset {
            ctx.append(
                EventKind::WindowReset {
                    previous_score,
                    window_start_ms: window_start,
                    window_end_ms: window_start + self.dynamic.window_ms,
                },
                LogLevel::Debug,
                CollectMode::LevelGated,
            );
        }
        if outcome.newly_banned {
            ctx.append(
                EventKind::Ban {
                    window_ms: self.dynamic.window_ms,
                },
                LogLevel::Alert,
                CollectMode::Always,
            );
            if self.mode == Mode::BlockEnforcing {
                ctx.finalize(
                    FinalAction::Block,
                    FinalActionType::BlockByReputation,
                    Some(BLOCK_STATUS),
                    None,
                );
                ctx.flush(self.sink);
                return EnforceOutcome::Block;
            }
        }
        EnforceOutcome::Continue
    }
}
