//! Configuration validation.
//!
//! Reports syntax and type errors, unknown (likely misspelled) fields, and
//! channel access settings that are legal but dangerous.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::{env_subst::substitute_env, loader, schema::SwitchboardConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// One of "syntax", "type-error", "unknown-field", "security", "access",
    /// "credentials", "file-ref".
    pub category: &'static str,
    /// Dotted path, e.g. `channels.email.work.dm_policy`.
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

const TOP_LEVEL_KEYS: &[&str] = &["channels", "data_dir", "database_url"];

const ACCOUNT_KEYS: &[&str] = &[
    "agent_id",
    "allowlist",
    "dm_policy",
    "self_identity",
    "thread_replies",
    "token",
];

const DM_POLICIES: &[&str] = &["allowlist", "open", "pairing"];

/// Validate the config file at `path`, or the discovered one when `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let Some(actual_path) = path.map(Path::to_path_buf).or_else(loader::find_config_file) else {
        let mut result = ValidationResult::default();
        result.push(
            Severity::Info,
            "file-ref",
            "",
            "no config file found; using defaults",
        );
        return result;
    };

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) => validate_str(&content, loader::format_of(&actual_path)),
        Err(e) => {
            let mut result = ValidationResult::default();
            result.push(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            );
            result
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate raw config text of the given format (`toml`, `yaml`, `json`).
#[must_use]
pub fn validate_str(raw: &str, format: &str) -> ValidationResult {
    let mut result = ValidationResult::default();
    let raw = substitute_env(raw);

    let value = match loader::parse_config_value(&raw, format) {
        Ok(v) => v,
        Err(e) => {
            result.push(Severity::Error, "syntax", "", format!("parse error: {e}"));
            return result;
        },
    };

    if let Some(table) = value.as_object() {
        for key in table.keys() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                unknown_field(&mut result, key, key, TOP_LEVEL_KEYS);
            }
        }
    }

    if let Err(e) = serde_json::from_value::<SwitchboardConfig>(value.clone()) {
        result.push(Severity::Error, "type-error", "", format!("type error: {e}"));
        return result;
    }

    if let Some(channels) = value.get("channels").and_then(Value::as_object) {
        for (channel, accounts) in channels {
            let Some(accounts) = accounts.as_object() else {
                continue;
            };
            for (account_id, account) in accounts {
                let path = format!("channels.{channel}.{account_id}");
                check_account(&mut result, &path, account);
            }
        }
    }

    result
}

fn check_account(result: &mut ValidationResult, path: &str, account: &Value) {
    let Some(fields) = account.as_object() else {
        result.push(
            Severity::Error,
            "type-error",
            path,
            "channel account must be a table",
        );
        return;
    };

    for key in fields.keys() {
        if !ACCOUNT_KEYS.contains(&key.as_str()) {
            unknown_field(result, &format!("{path}.{key}"), key, ACCOUNT_KEYS);
        }
    }

    let policy_path = format!("{path}.dm_policy");
    let policy = match fields.get("dm_policy") {
        None => "pairing",
        Some(Value::String(p)) if DM_POLICIES.contains(&p.as_str()) => p.as_str(),
        Some(other) => {
            result.push(
                Severity::Error,
                "access",
                policy_path,
                format!(
                    "unknown dm_policy {other}; expected one of: {}",
                    DM_POLICIES.join(", ")
                ),
            );
            return;
        },
    };

    let entries: Vec<String> = fields
        .get("allowlist")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .map(|v| v.as_str().unwrap_or_default().trim().to_lowercase())
                .collect()
        })
        .unwrap_or_default();

    if entries.iter().any(String::is_empty) {
        result.push(
            Severity::Warning,
            "access",
            format!("{path}.allowlist"),
            "allowlist contains empty or non-string entries; they are ignored",
        );
    }

    match policy {
        "open" => result.push(
            Severity::Warning,
            "security",
            policy_path,
            "dm_policy = \"open\" lets any sender trigger the agent",
        ),
        "allowlist" if !entries.iter().any(|e| !e.is_empty()) => result.push(
            Severity::Warning,
            "access",
            policy_path,
            "dm_policy = \"allowlist\" with an empty allowlist only admits senders \
             already in the persisted allow-list",
        ),
        _ => {},
    }
    if policy != "open" && entries.iter().any(|e| e == "*") {
        result.push(
            Severity::Warning,
            "security",
            format!("{path}.allowlist"),
            "allowlist contains \"*\", which admits every sender",
        );
    }

    let has = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .is_some_and(|s| !s.trim().is_empty() && !s.contains("${"))
    };
    if !has("token") && !has("self_identity") {
        result.push(
            Severity::Error,
            "credentials",
            path,
            "account is not configured: set `token` or `self_identity`",
        );
    }
}

fn unknown_field(result: &mut ValidationResult, path: &str, key: &str, known: &[&str]) {
    let message = match suggest(key, known) {
        Some(s) => format!("unknown field \"{key}\" (did you mean \"{s}\"?)"),
        None => format!("unknown field \"{key}\""),
    };
    result.push(Severity::Warning, "unknown-field", path, message);
}

/// Closest known key within edit distance 3.
fn suggest<'a>(key: &str, known: &[&'a str]) -> Option<&'a str> {
    known
        .iter()
        .map(|k| (*k, levenshtein(key, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| k)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            let best = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
            cur.push(best);
        }
        prev = cur;
    }
    prev[b.len()]
}
