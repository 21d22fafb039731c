// src/config.rs

//! The engine's configuration file: line-oriented `key = value` with `#`
//! comments and single-quoted string values (§6). The grammar is specific
//! to this system, so it is hand-rolled here rather than reached for
//! through a generic deserializer; the parsing policy (deprecated-key
//! warnings, duration-suffix parsing, boolean aliases) still follows the
//! numeric semantics in §4.5 and the "no early-exit, bubble results"
//! guidance in §9.

use crate::core::election::ElectionConfig;
use crate::core::errors::EngineError;
use crate::core::promote::PromotionCommands;
use crate::core::shellcmd::ShellCommand;
use crate::core::types::NodeId;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverMode {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionCheckType {
    Ping,
    Connection,
    Query,
}

/// The fully-parsed, validated configuration. Field names mirror the
/// option catalogue in §6.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub node_id: NodeId,
    pub node_name: String,
    pub conninfo: String,
    pub data_directory: String,

    pub failover: FailoverMode,
    pub connection_check_type: ConnectionCheckType,
    pub priority: u32,
    pub location: String,

    pub promote_command: String,
    pub follow_command: String,
    pub rejoin_command: Option<String>,

    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub monitor_interval_secs: Duration,
    pub async_query_timeout: Duration,
    pub primary_notification_timeout: Duration,
    pub primary_follow_timeout: Duration,
    pub standby_reconnect_timeout: Duration,
    /// Resolved against `standby_reconnect_timeout` at parse time when the
    /// config file leaves `repmgrd_standby_startup_timeout` unset (§9).
    pub repmgrd_standby_startup_timeout: Duration,
    pub node_rejoin_timeout: Duration,

    pub promote_check_interval: Duration,
    pub promote_check_timeout: Duration,
    pub degraded_monitoring_timeout: Option<Duration>,

    pub archive_ready_warning: Option<u64>,
    pub archive_ready_critical: Option<u64>,
    pub replication_lag_warning: Option<u64>,
    pub replication_lag_critical: Option<u64>,

    pub event_notification_command: Option<String>,
    pub event_notifications: Vec<String>,
    pub tablespace_mapping: BTreeMap<String, String>,

    pub primary_visibility_consensus: bool,
    pub child_nodes_connected_include_witness: bool,
    pub failover_validation_command: Option<String>,
}

impl EngineConfig {
    /// Projects the configuration's decision-engine-relevant fields into
    /// the form `FailoverEngine` consumes.
    pub fn to_election_config(&self) -> ElectionConfig {
        ElectionConfig {
            reconnect_attempts: self.reconnect_attempts,
            reconnect_interval: self.reconnect_interval,
            monitor_interval: self.monitor_interval_secs,
            async_query_timeout: self.async_query_timeout,
            primary_notification_timeout: self.primary_notification_timeout,
            primary_follow_timeout: self.primary_follow_timeout,
            promote_check_interval: self.promote_check_interval,
            promote_check_timeout: self.promote_check_timeout,
            degraded_monitoring_timeout: self.degraded_monitoring_timeout,
            primary_visibility_consensus: self.primary_visibility_consensus,
            child_nodes_connected_include_witness: self.child_nodes_connected_include_witness,
            failover_validation_command: self
                .failover_validation_command
                .as_deref()
                .map(ShellCommand::parse),
        }
    }

    pub fn promotion_commands(&self) -> PromotionCommands {
        PromotionCommands {
            promote_command: ShellCommand::parse(&self.promote_command),
            follow_command: ShellCommand::parse(&self.follow_command),
            rejoin_command: self.rejoin_command.as_deref().map(ShellCommand::parse),
        }
    }
}

/// `(deprecated_key, rename_hint)` pairs recognised and reported as
/// warnings at parse time (§6). A deprecated key never aborts
/// startup; it is simply ignored after the warning is logged.
const DEPRECATED_KEYS: &[(&str, &str)] = &[
    ("cluster", "no longer used; cluster membership is read from the nodes table"),
    ("node", "renamed to 'node_id'"),
    ("loglevel", "logging is now configured out-of-band, not in this file"),
    ("logfacility", "logging is now configured out-of-band, not in this file"),
    ("logfile", "logging is now configured out-of-band, not in this file"),
    ("failover_mode", "renamed to 'failover'"),
    ("retry_promote_interval_secs", "renamed to 'promote_check_interval'"),
    ("master_response_timeout", "renamed to 'async_query_timeout'"),
];

struct RawConfig {
    entries: BTreeMap<String, String>,
    tablespace_mapping: BTreeMap<String, String>,
}

/// Parses the raw `key = value` text into a lookup table, stripping
/// comments, unquoting single-quoted values, accumulating repeatable
/// `tablespace_mapping` entries, and warning on deprecated keys.
fn tokenize(raw: &str) -> RawConfig {
    let mut entries = BTreeMap::new();
    let mut tablespace_mapping = BTreeMap::new();

    for (lineno, line) in raw.lines().enumerate() {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(lineno = lineno + 1, line, "ignoring malformed config line (no '=')");
            continue;
        };
        let key = key.trim();
        let value = unquote(value.trim());

        if let Some((_, hint)) = DEPRECATED_KEYS.iter().find(|(k, _)| *k == key) {
            warn!(key, hint, "deprecated configuration key, ignored");
            continue;
        }

        if key == "tablespace_mapping" {
            if let Some((old, new)) = split_unescaped_equals(&value) {
                tablespace_mapping.insert(old, new);
            } else {
                warn!(value, "malformed tablespace_mapping entry, expected OLD=NEW");
            }
            continue;
        }

        entries.insert(key.to_string(), value);
    }

    RawConfig { entries, tablespace_mapping }
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

/// Splits on the first unescaped `=`, per §6's `\=` escape rule for
/// `tablespace_mapping` entries.
fn split_unescaped_equals(value: &str) -> Option<(String, String)> {
    let mut chars = value.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            chars.next();
            continue;
        }
        if c == '=' {
            let old = value[..i].replace("\\=", "=");
            let new = value[i + 1..].replace("\\=", "=");
            return Some((old, new));
        }
    }
    None
}

fn parse_bool(value: &str) -> Result<bool, EngineError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" => Ok(false),
        other => Err(EngineError::ConfigInvalid(format!("invalid boolean value: '{other}'"))),
    }
}

/// Parses an integer optionally suffixed with a time unit (`ms, s, min, h,
/// d`); a bare integer is taken as seconds (§4.5 numeric
/// semantics).
fn parse_duration(value: &str) -> Result<Duration, EngineError> {
    let value = value.trim();
    let split_at = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (digits, suffix) = value.split_at(split_at);
    let amount: u64 = digits
        .parse()
        .map_err(|_| EngineError::ConfigInvalid(format!("invalid duration value: '{value}'")))?;

    let duration = match suffix.trim() {
        "" | "s" => Duration::from_secs(amount),
        "ms" => Duration::from_millis(amount),
        "min" => Duration::from_secs(amount * 60),
        "h" => Duration::from_secs(amount * 3600),
        "d" => Duration::from_secs(amount * 86400),
        other => return Err(EngineError::ConfigInvalid(format!("unknown duration suffix: '{other}'"))),
    };
    Ok(duration)
}

fn require<'a>(entries: &'a BTreeMap<String, String>, key: &str) -> Result<&'a str, EngineError> {
    entries
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| EngineError::ConfigInvalid(format!("missing required key '{key}'")))
}

fn parse_u32(value: &str, key: &str) -> Result<u32, EngineError> {
    value
        .parse()
        .map_err(|_| EngineError::ConfigInvalid(format!("invalid integer for '{key}': '{value}'")))
}

pub fn parse_str(raw: &str) -> Result<EngineConfig, EngineError> {
    let RawConfig { entries, tablespace_mapping } = tokenize(raw);

    let node_id = parse_u32(require(&entries, "node_id")?, "node_id")?;
    if node_id < 1 {
        return Err(EngineError::ConfigInvalid("node_id must be >= 1".to_string()));
    }
    let node_name = require(&entries, "node_name")?.to_string();
    if node_name.is_empty() {
        return Err(EngineError::ConfigInvalid("node_name must not be empty".to_string()));
    }
    let conninfo = require(&entries, "conninfo")?.to_string();
    let data_directory = require(&entries, "data_directory")?.to_string();

    let failover = match entries.get("failover").map(String::as_str).unwrap_or("manual") {
        "manual" => FailoverMode::Manual,
        "automatic" => FailoverMode::Automatic,
        other => return Err(EngineError::ConfigInvalid(format!("invalid failover mode: '{other}'"))),
    };

    let connection_check_type = match entries
        .get("connection_check_type")
        .map(String::as_str)
        .unwrap_or("ping")
    {
        "ping" => ConnectionCheckType::Ping,
        "connection" => ConnectionCheckType::Connection,
        "query" => ConnectionCheckType::Query,
        other => {
            return Err(EngineError::ConfigInvalid(format!(
                "invalid connection_check_type: '{other}'"
            )));
        }
    };

    let priority = entries
        .get("priority")
        .map(|v| parse_u32(v, "priority"))
        .transpose()?
        .unwrap_or(100);
    let location = entries.get("location").cloned().unwrap_or_default();

    let promote_command = require(&entries, "promote_command")?.to_string();
    let follow_command = require(&entries, "follow_command")?.to_string();
    let rejoin_command = entries.get("rejoin_command").cloned();

    let reconnect_attempts = entries
        .get("reconnect_attempts")
        .map(|v| parse_u32(v, "reconnect_attempts"))
        .transpose()?
        .unwrap_or(3);
    let reconnect_interval = entries
        .get("reconnect_interval")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(10));
    let monitor_interval_secs = entries
        .get("monitor_interval_secs")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(2));
    if monitor_interval_secs < Duration::from_secs(1) {
        return Err(EngineError::ConfigInvalid("monitor_interval_secs must be >= 1".to_string()));
    }

    let async_query_timeout = entries
        .get("async_query_timeout")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(5));
    let primary_notification_timeout = entries
        .get("primary_notification_timeout")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(60));
    let primary_follow_timeout = entries
        .get("primary_follow_timeout")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(60));
    let node_rejoin_timeout = entries
        .get("node_rejoin_timeout")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(60));
    let standby_reconnect_timeout = entries
        .get("standby_reconnect_timeout")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(60));
    if standby_reconnect_timeout < node_rejoin_timeout {
        return Err(EngineError::ConfigInvalid(
            "standby_reconnect_timeout must be >= node_rejoin_timeout".to_string(),
        ));
    }
    let repmgrd_standby_startup_timeout = crate::core::reload::resolve_standby_startup_timeout(
        entries.get("repmgrd_standby_startup_timeout").map(|v| parse_duration(v)).transpose()?,
        standby_reconnect_timeout,
    );

    let promote_check_interval = entries
        .get("promote_check_interval")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(1));
    let promote_check_timeout = entries
        .get("promote_check_timeout")
        .map(|v| parse_duration(v))
        .transpose()?
        .unwrap_or(Duration::from_secs(30));
    let degraded_monitoring_timeout = entries
        .get("degraded_monitoring_timeout")
        .map(|v| parse_duration(v))
        .transpose()?;

    let archive_ready_warning = entries.get("archive_ready_warning").map(|v| parse_u32(v, "archive_ready_warning")).transpose()?.map(u64::from);
    let archive_ready_critical = entries.get("archive_ready_critical").map(|v| parse_u32(v, "archive_ready_critical")).transpose()?.map(u64::from);
    if let (Some(w), Some(c)) = (archive_ready_warning, archive_ready_critical)
        && w >= c
    {
        return Err(EngineError::ConfigInvalid(
            "archive_ready_warning must be < archive_ready_critical".to_string(),
        ));
    }
    let replication_lag_warning = entries.get("replication_lag_warning").map(|v| parse_u32(v, "replication_lag_warning")).transpose()?.map(u64::from);
    let replication_lag_critical = entries.get("replication_lag_critical").map(|v| parse_u32(v, "replication_lag_critical")).transpose()?.map(u64::from);
    if let (Some(w), Some(c)) = (replication_lag_warning, replication_lag_critical)
        && w >= c
    {
        return Err(EngineError::ConfigInvalid(
            "replication_lag_warning must be < replication_lag_critical".to_string(),
        ));
    }

    let event_notification_command = entries.get("event_notification_command").cloned();
    let event_notifications = entries
        .get("event_notifications")
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();

    let primary_visibility_consensus = entries
        .get("primary_visibility_consensus")
        .map(|v| parse_bool(v))
        .transpose()?
        .unwrap_or(false);
    let child_nodes_connected_include_witness = entries
        .get("child_nodes_connected_include_witness")
        .map(|v| parse_bool(v))
        .transpose()?
        .unwrap_or(false);
    let failover_validation_command = entries.get("failover_validation_command").cloned();

    Ok(EngineConfig {
        node_id,
        node_name,
        conninfo,
        data_directory,
        failover,
        connection_check_type,
        priority,
        location,
        promote_command,
        follow_command,
        rejoin_command,
        reconnect_attempts,
        reconnect_interval,
        monitor_interval_secs,
        async_query_timeout,
        primary_notification_timeout,
        primary_follow_timeout,
        standby_reconnect_timeout,
        repmgrd_standby_startup_timeout,
        node_rejoin_timeout,
        promote_check_interval,
        promote_check_timeout,
        degraded_monitoring_timeout,
        archive_ready_warning,
        archive_ready_critical,
        replication_lag_warning,
        replication_lag_critical,
        event_notification_command,
        event_notifications,
        tablespace_mapping,
        primary_visibility_consensus,
        child_nodes_connected_include_witness,
        failover_validation_command,
    })
}

pub async fn parse_file(path: &std::path::Path) -> Result<EngineConfig, EngineError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| EngineError::ConfigInvalid(format!("failed to read '{}': {e}", path.display())))?;
    parse_str(&raw)
}
