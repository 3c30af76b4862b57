use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use switchboard_config::{Severity, ValidationResult, validate};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

pub fn handle_config(path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(path, verbose),
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    for line in render(&result, verbose) {
        eprintln!("{line}");
    }

    let errors = result.count(Severity::Error);
    if errors > 0 {
        anyhow::bail!("config check failed with {errors} error(s)");
    }
    Ok(())
}

/// Diagnostic lines followed by a summary line.
fn render(result: &ValidationResult, verbose: bool) -> Vec<String> {
    let mut lines: Vec<String> = result
        .diagnostics
        .iter()
        .filter(|d| verbose || d.severity != Severity::Info)
        .map(|d| {
            let (color, label) = match d.severity {
                Severity::Error => (RED, "error"),
                Severity::Warning => (YELLOW, "warning"),
                Severity::Info => (CYAN, "info"),
            };
            if d.path.is_empty() {
                format!("  {BOLD}{color}{label}{RESET} {}", d.message)
            } else {
                format!("  {BOLD}{color}{label}{RESET} {}: {}", d.path, d.message)
            }
        })
        .collect();

    if !lines.is_empty() {
        lines.push(String::new());
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        lines.push("No issues found.".into());
    } else {
        lines.push(format!("{errors} error(s), {warnings} warning(s)"));
    }
    lines
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn open_policy_warns_but_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[channels.chat.main]\ndm_policy = \"open\"\ntoken = \"t\"\n");
        assert!(check(Some(&path), false).is_ok());

        let lines = render(&validate::validate(Some(&path)), false);
        assert!(lines.iter().any(|l| l.contains("channels.chat.main.dm_policy")));
        assert_eq!(lines.last().unwrap(), "0 error(s), 1 warning(s)");
    }

    #[test]
    fn missing_credentials_fail_the_check() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[channels.email.work]\ndm_policy = \"pairing\"\n");
        let err = check(Some(&path), false).unwrap_err();
        assert!(err.to_string().contains("1 error(s)"));
    }

    #[test]
    fn clean_config_reports_no_issues() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[channels.email.work]\nself_identity = \"bot@x.com\"\n");
        let lines = render(&validate::validate(Some(&path)), false);
        assert_eq!(lines, ["No issues found."]);
    }
}
