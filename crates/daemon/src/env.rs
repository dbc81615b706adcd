// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment-driven configuration knobs.

use std::path::PathBuf;

pub const DEFAULT_STREAM_PORT: u16 = 47821;

/// Engine-process configuration read once at startup.
#[derive(Debug, Clone)]
pub struct EngineEnv {
    /// Verbose engine logging (`MCP_CLAUDE_DEBUG`).
    pub debug: bool,
    /// Containerized execution enabled (`MCP_ENABLE_SECURE_EXECUTION`,
    /// default on).
    pub secure_execution: bool,
    /// `CLAUDE_PARALLEL_WORK_ENABLE_STREAMING`.
    pub streaming_enabled: bool,
    /// `CLAUDE_PARALLEL_WORK_STREAM_PORT`.
    pub stream_port: u16,
    /// `CLAUDE_PARALLEL_DEBUG_NO_CLEANUP`: preserve sandboxes after runs.
    pub debug_no_cleanup: bool,
    /// Root for the store, logs, and lock file.
    pub engine_root: PathBuf,
}

impl EngineEnv {
    pub fn load() -> Self {
        Self {
            debug: flag("MCP_CLAUDE_DEBUG", false),
            secure_execution: flag("MCP_ENABLE_SECURE_EXECUTION", true),
            streaming_enabled: flag("CLAUDE_PARALLEL_WORK_ENABLE_STREAMING", false),
            stream_port: parsed("CLAUDE_PARALLEL_WORK_STREAM_PORT", DEFAULT_STREAM_PORT),
            debug_no_cleanup: flag("CLAUDE_PARALLEL_DEBUG_NO_CLEANUP", false),
            engine_root: engine_root(),
        }
    }
}

fn engine_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".quartermaster")
}

/// Boolean env flag: "1"/"true"/"yes" (any case) are true, "0"/"false"/"no"
/// are false, anything else falls back to the default.
pub fn flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Numeric env knob with a default.
pub fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn flag_parsing() {
        std::env::set_var("QM_TEST_FLAG", "true");
        assert!(flag("QM_TEST_FLAG", false));
        std::env::set_var("QM_TEST_FLAG", "0");
        assert!(!flag("QM_TEST_FLAG", true));
        std::env::set_var("QM_TEST_FLAG", "junk");
        assert!(flag("QM_TEST_FLAG", true));
        std::env::remove_var("QM_TEST_FLAG");
        assert!(!flag("QM_TEST_FLAG", false));
    }

    #[test]
    #[serial]
    fn parsed_with_default() {
        std::env::set_var("QM_TEST_PORT", "9000");
        assert_eq!(parsed("QM_TEST_PORT", 47821u16), 9000);
        std::env::set_var("QM_TEST_PORT", "not a port");
        assert_eq!(parsed("QM_TEST_PORT", 47821u16), 47821);
        std::env::remove_var("QM_TEST_PORT");
    }
}
