use serde::{Deserialize, Serialize};

use crate::core::enforcement::Mode;
use crate::core::event_log::LogLevel;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Honor the leftmost X-Forwarded-For entry as the client IP
    pub trust_forwarded_for: bool,
}

/// Rule artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Entry rule artifact path
    pub rules_file: String,
    /// Root directory for bare extends references
    pub root_dir: Option<String>,
    /// Maximum extends recursion depth (0 = unlimited)
    pub max_extends_depth: u32,
}

/// Enforcement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementConfig {
    /// Whether request inspection is enabled at all
    pub enabled: bool,
    /// Global enforcement mode: `block` or `log`
    pub mode: Mode,
}

/// Dynamic IP blocking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicBlockConfig {
    /// Whether reputation scoring and bans are enabled
    pub enabled: bool,
    /// Baseline score added to every inspected request
    pub base_score: u64,
    /// Windowed score above which an IP is banned
    pub threshold: u64,
    /// Scoring window length in seconds
    pub window_seconds: u64,
    /// Ban duration in seconds
    pub ban_seconds: u64,
    /// Maximum number of tracked IPs before eviction kicks in
    pub max_tracked_ips: usize,
}

/// Audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogConfig {
    /// Audit log file path; empty disables the audit log
    pub path: String,
    /// Minimum severity for level-gated events and non-forced records
    pub min_level: LogLevel,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Rule artifact configuration
    pub rules: RulesConfig,
    /// Enforcement configuration
    pub enforcement: EnforcementConfig,
    /// Dynamic IP blocking configuration
    pub dynamic_block: DynamicBlockConfig,
    /// Audit log configuration
    pub audit_log: AuditLogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                trust_forwarded_for: false,
            },
            rules: RulesConfig {
                rules_file: "config/rules.json".to_string(),
                root_dir: None,
                max_extends_depth: 16,
            },
            enforcement: EnforcementConfig {
                enabled: true,
                mode: Mode::BlockEnforcing,
            },
            dynamic_block: DynamicBlockConfig {
                enabled: true,
                base_score: 1,
                threshold: 100,
                window_seconds: 60,
                ban_seconds: 600,
                max_tracked_ips: 65536,
            },
            audit_log: AuditLogConfig {
                path: "logs/waf_audit.log".to_string(),
                min_level: LogLevel::Info,
            },
        }
    }
}
