//! Configuration management for mcpbridge.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/mcpbridge/config.json`
//! 2. Environment variable: `MCPBRIDGE_CONFIG_CONTENT`
//! 3. Project config: `mcpbridge.jsonc` or `mcpbridge.json` in the project directory
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::error::{ConfigError, CoreResult};
use mcpbridge_provider::{ProviderConfig, ProviderRegistry, ProviderResult};
use mcpbridge_util::log::{LogConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable holding inline config content.
pub const CONFIG_CONTENT_ENV: &str = "MCPBRIDGE_CONFIG_CONTENT";

/// Default number of terminal tasks kept for lookup.
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 100;

/// Default cap on provider requests within one chat turn.
pub const DEFAULT_MAX_ROUNDS: usize = 25;

/// Default wall-clock cap on one chat turn.
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 300;

/// Default output token limit per request.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

static VAR_REGEX: OnceLock<Option<regex::Regex>> = OnceLock::new();

/// Variable substitution regex, compiled once on first use.
fn var_regex() -> Option<&'static regex::Regex> {
    VAR_REGEX
        .get_or_init(|| regex::Regex::new(r"\{(env|file):([^}]+)\}").ok())
        .as_ref()
}

/// Tracks whether a position in JSON text falls inside a string literal.
#[derive(Debug, Default)]
struct StringScanner {
    in_string: bool,
    escape_next: bool,
}

impl StringScanner {
    fn scan(&mut self, text: &str) {
        for c in text.chars() {
            if self.escape_next {
                self.escape_next = false;
            } else if self.in_string && c == '\\' {
                self.escape_next = true;
            } else if c == '"' {
                self.in_string = !self.in_string;
            }
        }
    }
}

/// Escape `value` for use between the quotes of a JSON string.
fn escape_json_string(value: &str) -> CoreResult<String> {
    let encoded = serde_json::to_string(value).map_err(|e| ConfigError::Validation {
        message: format!("cannot encode substituted value: {e}"),
    })?;
    Ok(encoded
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(&encoded)
        .to_string())
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Log level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,

    /// Task tracking settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskConfig>,

    /// Chat loop settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<ChatConfig>,

    /// Providers by id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<HashMap<String, ProviderConfig>>,
}

/// Task tracking configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Terminal tasks kept before the oldest are pruned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history_size: Option<usize>,
}

impl TaskConfig {
    /// Merge with another TaskConfig, preferring values from other if present.
    pub fn merge(mut self, other: Self) -> Self {
        if other.max_history_size.is_some() {
            self.max_history_size = other.max_history_size;
        }
        self
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size.unwrap_or(DEFAULT_MAX_HISTORY_SIZE)
    }
}

/// Chat loop configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Provider used when a request does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_provider: Option<String>,

    /// Maximum provider requests in one turn.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<usize>,

    /// Wall-clock limit for one turn, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,

    /// Output token limit per request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// System prompt sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl ChatConfig {
    /// Merge with another ChatConfig, preferring values from other if present.
    pub fn merge(mut self, other: Self) -> Self {
        if other.default_provider.is_some() {
            self.default_provider = other.default_provider;
        }
        if other.max_rounds.is_some() {
            self.max_rounds = other.max_rounds;
        }
        if other.turn_timeout_secs.is_some() {
            self.turn_timeout_secs = other.turn_timeout_secs;
        }
        if other.max_tokens.is_some() {
            self.max_tokens = other.max_tokens;
        }
        if other.temperature.is_some() {
            self.temperature = other.temperature;
        }
        if other.system.is_some() {
            self.system = other.system;
        }
        self
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_secs.unwrap_or(DEFAULT_TURN_TIMEOUT_SECS))
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/mcpbridge/`
    /// 2. `MCPBRIDGE_CONFIG_CONTENT` environment variable
    /// 3. Project config from `project_dir`
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let inline = std::env::var(CONFIG_CONTENT_ENV).ok();
        Self::load_layers(
            Self::global_config_dir().as_deref(),
            inline.as_deref(),
            project_dir,
        )
        .await
    }

    /// Load and merge explicit config layers.
    ///
    /// Returns the merged config and the files it was read from.
    pub async fn load_layers(
        global_dir: Option<&Path>,
        inline: Option<&str>,
        project_dir: Option<&Path>,
    ) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        // 1. Load global config
        if let Some(dir) = global_dir {
            if let Some(path) = Self::find_file(dir, &["config.jsonc", "config.json"]) {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        // 2. Load inline content
        if let Some(content) = inline {
            let content = Self::substitute_variables(content, Path::new("."))?;
            config = config.merge(Self::parse_jsonc(&content, "<env>")?);
        }

        // 3. Load project config
        if let Some(dir) = project_dir {
            if let Some(path) = Self::find_file(dir, &["mcpbridge.jsonc", "mcpbridge.json"]) {
                config = config.merge(Self::load_file(&path).await?);
                sources.push(path);
            }
        }

        tracing::debug!(sources = ?sources, "Configuration loaded");
        Ok((config, sources))
    }

    fn find_file(dir: &Path, names: &[&str]) -> Option<PathBuf> {
        names
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Get the global config directory.
    ///
    /// On Unix systems, prefers `~/.config/mcpbridge` over the
    /// platform-specific directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("mcpbridge");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("mcpbridge"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Strip `//` and `/* */` comments outside of string literals.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if in_string {
                result.push(c);
                if escape_next {
                    escape_next = false;
                } else if c == '\\' {
                    escape_next = true;
                } else if c == '"' {
                    in_string = false;
                }
                continue;
            }

            match (c, chars.peek()) {
                ('"', _) => {
                    in_string = true;
                    result.push(c);
                }
                ('/', Some('/')) => {
                    for c in chars.by_ref() {
                        if c == '\n' {
                            result.push('\n');
                            break;
                        }
                    }
                }
                ('/', Some('*')) => {
                    chars.next();
                    let mut prev = ' ';
                    for c in chars.by_ref() {
                        if prev == '*' && c == '/' {
                            break;
                        }
                        // Keep line numbers stable for parse errors
                        if c == '\n' {
                            result.push('\n');
                        }
                        prev = c;
                    }
                }
                _ => result.push(c),
            }
        }

        result
    }

    /// Substitute `{env:VAR}` and `{file:path}` references.
    ///
    /// Comments are stripped first, so commented-out references are never
    /// resolved. Values landing inside a string literal are JSON-escaped.
    /// File paths are relative to the directory of `config_path`.
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let Some(re) = var_regex() else {
            return Err(ConfigError::Validation {
                message: "variable substitution pattern failed to compile".to_string(),
            }
            .into());
        };
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let content = Self::strip_comments(content);

        let mut result = String::with_capacity(content.len());
        let mut scanner = StringScanner::default();
        let mut last = 0;
        for cap in re.captures_iter(&content) {
            let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                _ => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map(|v| v.trim().to_string())
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                }
            };

            let before = &content[last..full_match.start()];
            scanner.scan(before);
            result.push_str(before);
            if scanner.in_string {
                result.push_str(&escape_json_string(&replacement)?);
            } else {
                result.push_str(&replacement);
            }
            scanner.scan(full_match.as_str());
            last = full_match.end();
        }
        result.push_str(&content[last..]);

        Ok(result)
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.schema.is_some() {
            self.schema = other.schema;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }

        self.task = match (self.task, other.task) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };
        self.chat = match (self.chat, other.chat) {
            (Some(base), Some(other)) => Some(base.merge(other)),
            (base, None) => base,
            (None, other) => other,
        };
        self.provider = merge_hashmap(self.provider, other.provider);

        self
    }

    /// Effective task settings.
    pub fn task(&self) -> TaskConfig {
        self.task.clone().unwrap_or_default()
    }

    /// Effective chat settings.
    pub fn chat(&self) -> ChatConfig {
        self.chat.clone().unwrap_or_default()
    }

    /// Logging settings derived from this config.
    pub fn log_config(&self, print: bool) -> LogConfig {
        LogConfig {
            print,
            level: self.log_level.unwrap_or(LogLevel::Info),
            ..Default::default()
        }
    }

    /// Build the provider registry from the `provider` section.
    pub fn provider_registry(&self) -> ProviderResult<ProviderRegistry> {
        let providers = self.provider.clone().unwrap_or_default();
        let chat = self.chat();
        ProviderRegistry::from_config(&providers, chat.default_provider.as_deref())
    }
}

/// Merge two HashMaps.
fn merge_hashmap<K: std::hash::Hash + Eq, V>(
    base: Option<HashMap<K, V>>,
    other: Option<HashMap<K, V>>,
) -> Option<HashMap<K, V>> {
    match (base, other) {
        (Some(mut b), Some(o)) => {
            b.extend(o);
            Some(b)
        }
        (b, None) => b,
        (None, o) => o,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpbridge_provider::ProviderFamily;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // Line comment
            "key": "value", // trailing comment
            /* block comment */
            "key2": "val/*not a comment*/ue",
            "url": "http://localhost:8080/v1"
        }"#;

        let result = Config::strip_comments(input);
        assert!(!result.contains("Line comment"));
        assert!(!result.contains("trailing comment"));
        assert!(!result.contains("block comment"));
        assert!(result.contains("val/*not a comment*/ue"));
        assert!(result.contains("http://localhost:8080/v1"));
    }

    #[test]
    fn test_strip_comments_escaped_quote() {
        let input = r#"{"key": "say \"hi\" // still text"}"#;
        assert_eq!(Config::strip_comments(input), input);
    }

    #[test]
    fn test_parse_jsonc() {
        let input = r#"{
            // Tighter history for this project
            "log_level": "debug",
            "task": { "max_history_size": 5 },
            "chat": { "max_rounds": 4, "default_provider": "local" },
            "provider": {
                "local": { "family": "openai-compatible", "model": "llama3", "api_key": "x", "base_url": "http://localhost:11434/v1" }
            }
        }"#;

        let config = Config::parse_jsonc(input, "test").unwrap();
        assert_eq!(config.log_level, Some(LogLevel::Debug));
        assert_eq!(config.task().max_history_size(), 5);
        assert_eq!(config.chat().max_rounds(), 4);
        let provider = &config.provider.as_ref().unwrap()["local"];
        assert_eq!(provider.family, ProviderFamily::OpenAi);
        assert!(provider.streaming);
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.task().max_history_size(), DEFAULT_MAX_HISTORY_SIZE);
        assert_eq!(config.chat().max_rounds(), DEFAULT_MAX_ROUNDS);
        assert_eq!(config.chat().turn_timeout(), Duration::from_secs(300));
        assert_eq!(config.chat().max_tokens(), 4096);
        assert_eq!(config.log_config(false).level, LogLevel::Info);
    }

    #[test]
    fn test_merge_config() {
        let base = Config {
            log_level: Some(LogLevel::Warn),
            chat: Some(ChatConfig {
                max_rounds: Some(10),
                system: Some("Be brief".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let other = Config {
            chat: Some(ChatConfig {
                max_rounds: Some(3),
                ..Default::default()
            }),
            task: Some(TaskConfig {
                max_history_size: Some(2),
            }),
            ..Default::default()
        };

        let merged = base.merge(other);
        assert_eq!(merged.log_level, Some(LogLevel::Warn)); // preserved
        let chat = merged.chat();
        assert_eq!(chat.max_rounds, Some(3)); // overwritten
        assert_eq!(chat.system.as_deref(), Some("Be brief")); // preserved
        assert_eq!(merged.task().max_history_size(), 2); // added
    }

    #[test]
    fn test_missing_env_var_is_error() {
        let err = Config::substitute_variables(
            r#"{"x": "{env:MCPBRIDGE_TEST_SURELY_UNSET_VAR}"}"#,
            Path::new("config.json"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::CoreError::Config(ConfigError::EnvVarNotFound { .. })
        ));
    }

    #[test]
    fn test_commented_reference_is_not_resolved() {
        let content = Config::substitute_variables(
            "{\n  // \"system\": \"{env:MCPBRIDGE_TEST_SURELY_UNSET_VAR}\"\n  \"log_level\": \"warn\"\n}",
            Path::new("config.json"),
        )
        .unwrap();
        let config = Config::parse_jsonc(&content, "test").unwrap();
        assert_eq!(config.log_level, Some(LogLevel::Warn));
    }

    #[test]
    fn test_substituted_value_is_escaped_in_strings() {
        std::env::set_var("MCPBRIDGE_TEST_QUOTED_PROMPT", "Say \"hi\"\\n");
        std::env::set_var("MCPBRIDGE_TEST_ROUNDS", "7");
        let content = Config::substitute_variables(
            r#"{"chat": {"system": "Prompt: {env:MCPBRIDGE_TEST_QUOTED_PROMPT}", "max_rounds": {env:MCPBRIDGE_TEST_ROUNDS}}}"#,
            Path::new("config.json"),
        )
        .unwrap();

        let config = Config::parse_jsonc(&content, "test").unwrap();
        let chat = config.chat();
        assert_eq!(chat.system.as_deref(), Some("Prompt: Say \"hi\"\\n"));
        assert_eq!(chat.max_rounds(), 7);
    }

    #[test]
    fn test_empty_registry_from_default_config() {
        let registry = Config::default().provider_registry().unwrap();
        assert!(registry.is_empty());
    }
}
