//! Configuration for the mock server.
//!
//! Defines mappings (request matchers + response templates), scenario
//! preconditions and global settings.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use uuid::Uuid;

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// List of mapping definitions
    #[serde(default)]
    pub mappings: Vec<MappingDefinition>,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Default response when no mapping matches
    #[serde(default)]
    pub default_response: Option<ResponseDefinition>,
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Only structural problems are errors. Malformed match patterns are
    /// reported by [`MockServerConfig::diagnostics`] instead, because a
    /// mapping with a bad pattern simply never matches.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for (i, mapping) in self.mappings.iter().enumerate() {
            mapping
                .validate()
                .map_err(|e| anyhow::anyhow!("Mapping {}: {}", i, e))?;
            if let Some(id) = mapping.id {
                if !seen.insert(id) {
                    anyhow::bail!("Mapping {}: duplicate id {}", i, id);
                }
            }
        }
        if let Some(default) = &self.default_response {
            default
                .validate()
                .map_err(|e| anyhow::anyhow!("Default response: {}", e))?;
        }
        Ok(())
    }

    /// Non-fatal problems, one line per defect.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (i, mapping) in self.mappings.iter().enumerate() {
            for (j, matcher) in mapping.request.iter().enumerate() {
                if let Some(problem) = matcher.pattern_problem() {
                    out.push(format!("Mapping {} matcher {}: {}", i, j, problem));
                }
            }
        }
        out
    }
}

/// A single mapping definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingDefinition {
    /// Unique identifier; generated when absent
    #[serde(default)]
    pub id: Option<Uuid>,

    /// Optional title/description
    #[serde(default)]
    pub title: Option<String>,

    /// Priority (lower = evaluated first)
    #[serde(default)]
    pub priority: i32,

    /// Request matchers, all of which must match
    #[serde(default)]
    pub request: Vec<MatcherDefinition>,

    /// Response to return
    pub response: ResponseDefinition,

    /// Scenario precondition and transition
    #[serde(default)]
    pub scenario: Option<ScenarioDefinition>,
}

impl MappingDefinition {
    /// Validate the mapping definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.response.validate()?;
        if let Some(scenario) = &self.scenario {
            if scenario.name.is_empty() {
                anyhow::bail!("Scenario name cannot be empty");
            }
        }
        for matcher in &self.request {
            if let MatcherDefinition::Header { name, .. } | MatcherDefinition::Query { name, .. } = matcher {
                if name.is_empty() {
                    anyhow::bail!("Header and query matchers need a name");
                }
            }
        }
        Ok(())
    }
}

/// Whether a matcher accepts or rejects what it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBehaviour {
    #[default]
    AcceptOnMatch,
    RejectOnMatch,
}

/// One request matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatcherDefinition {
    /// HTTP method(s), compared case-insensitively
    Method {
        methods: Vec<String>,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
    /// Request path (hosting path base removed)
    Path {
        patterns: Vec<ValuePattern>,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
    /// Full request URL
    Url {
        patterns: Vec<ValuePattern>,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
    /// Header values; no patterns means the header must be present
    Header {
        name: String,
        #[serde(default)]
        patterns: Vec<ValuePattern>,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
    /// Query parameter values; no patterns means the parameter must be present
    Query {
        name: String,
        #[serde(default)]
        patterns: Vec<ValuePattern>,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
    /// Client IP address
    ClientIp {
        patterns: Vec<ValuePattern>,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
    /// Request body
    Body {
        pattern: BodyPattern,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
    /// Matches when the request log entry named in the path was served by
    /// the given mapping
    MappingCorrelation {
        mapping_id: Uuid,
        #[serde(default)]
        behaviour: MatchBehaviour,
    },
}

impl MatcherDefinition {
    pub fn behaviour(&self) -> MatchBehaviour {
        match self {
            MatcherDefinition::Method { behaviour, .. }
            | MatcherDefinition::Path { behaviour, .. }
            | MatcherDefinition::Url { behaviour, .. }
            | MatcherDefinition::Header { behaviour, .. }
            | MatcherDefinition::Query { behaviour, .. }
            | MatcherDefinition::ClientIp { behaviour, .. }
            | MatcherDefinition::Body { behaviour, .. }
            | MatcherDefinition::MappingCorrelation { behaviour, .. } => *behaviour,
        }
    }

    /// Describe a malformed pattern, if any.
    pub fn pattern_problem(&self) -> Option<String> {
        match self {
            MatcherDefinition::Path { patterns, .. }
            | MatcherDefinition::Url { patterns, .. }
            | MatcherDefinition::Header { patterns, .. }
            | MatcherDefinition::Query { patterns, .. }
            | MatcherDefinition::ClientIp { patterns, .. } => {
                patterns.iter().find_map(ValuePattern::problem)
            }
            MatcherDefinition::Body { pattern, .. } => pattern.problem(),
            MatcherDefinition::Method { .. } | MatcherDefinition::MappingCorrelation { .. } => None,
        }
    }
}

/// A string pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValuePattern {
    /// Exact value match
    Exact {
        value: String,
        #[serde(default)]
        ignore_case: bool,
    },
    /// Wildcard match (`*` any run of characters, `?` one character)
    Wildcard {
        pattern: String,
        #[serde(default)]
        ignore_case: bool,
    },
    /// Regex pattern match
    Regex { pattern: String },
    /// Value must contain substring
    Contains { value: String },
}

impl ValuePattern {
    /// Describe why this pattern cannot be compiled.
    pub fn problem(&self) -> Option<String> {
        match self {
            ValuePattern::Regex { pattern } => regex::Regex::new(pattern)
                .err()
                .map(|e| format!("Invalid regex: {}", e)),
            ValuePattern::Wildcard { pattern, .. } => globset::Glob::new(pattern)
                .err()
                .map(|e| format!("Invalid wildcard: {}", e)),
            _ => None,
        }
    }
}

/// Body matching configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BodyPattern {
    /// Exact body match
    Exact { value: String },
    /// Body must contain substring
    Contains { value: String },
    /// Wildcard match over the whole body
    Wildcard { pattern: String },
    /// Regex pattern match
    Regex { pattern: String },
    /// JSON structural equality
    JsonEquals { value: serde_json::Value },
    /// JSON path selects at least one node; with `expected`, the selection
    /// must equal it
    JsonPath {
        expression: String,
        #[serde(default)]
        expected: Option<serde_json::Value>,
    },
    /// Body must be valid JSON (any structure)
    Json,
    /// Body must be empty
    Empty,
}

impl BodyPattern {
    pub fn problem(&self) -> Option<String> {
        match self {
            BodyPattern::Regex { pattern } => regex::Regex::new(pattern)
                .err()
                .map(|e| format!("Invalid regex: {}", e)),
            BodyPattern::Wildcard { pattern } => globset::Glob::new(pattern)
                .err()
                .map(|e| format!("Invalid wildcard: {}", e)),
            BodyPattern::JsonPath { expression, .. } => crate::matcher::compile_json_path(expression)
                .err()
                .map(|e| format!("Invalid JSON path: {}", e)),
            _ => None,
        }
    }
}

/// Scenario precondition/transition of a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDefinition {
    /// Scenario name
    pub name: String,

    /// State the scenario must be in for the mapping to match
    #[serde(default)]
    pub required_state: Option<String>,

    /// State the scenario moves to when the mapping is served
    #[serde(default)]
    pub new_state: Option<String>,
}

/// One or more string values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MultiValue {
    One(String),
    Many(Vec<String>),
}

impl MultiValue {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            MultiValue::One(value) => vec![value],
            MultiValue::Many(values) => values,
        }
    }

    pub fn values(&self) -> &[String] {
        match self {
            MultiValue::One(value) => std::slice::from_ref(value),
            MultiValue::Many(values) => values,
        }
    }
}

/// Response definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Response headers, each with one or more value templates
    #[serde(default)]
    pub headers: BTreeMap<String, MultiValue>,

    /// Response body
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Whether body, headers and file path are templates
    #[serde(default)]
    pub transform: bool,

    /// Latency simulation
    #[serde(default)]
    pub delay: Option<DelayConfig>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status: default_status(),
            headers: BTreeMap::new(),
            body: None,
            transform: false,
            delay: None,
        }
    }
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status < 100 || self.status > 599 {
            anyhow::bail!("Invalid status code: {}", self.status);
        }
        if let Some(ResponseBody::Base64 { content }) = &self.body {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(content)
                .map_err(|e| anyhow::anyhow!("Invalid base64: {}", e))?;
        }
        if let Some(delay) = &self.delay {
            if delay.max_ms > 0 && delay.max_ms < delay.min_ms {
                anyhow::bail!("Delay max_ms must not be below min_ms");
            }
        }
        Ok(())
    }

    /// Explicit `Content-Type` header template, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .and_then(|(_, values)| values.values().first())
            .map(String::as_str)
    }
}

/// Response body configuration; the variant is the declared output
/// representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBody {
    /// Plain text body
    Text { content: String },
    /// JSON body
    Json { content: serde_json::Value },
    /// Base64 encoded binary
    Base64 { content: String },
    /// Reference to a file, read by the transport
    File { path: String },
}

impl ResponseBody {
    /// Get content type for this body.
    pub fn content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text { .. } => "text/plain",
            ResponseBody::Json { .. } => "application/json",
            ResponseBody::Base64 { .. } => "application/octet-stream",
            ResponseBody::File { .. } => "application/octet-stream",
        }
    }
}

/// Delay/latency simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelayConfig {
    /// Fixed delay in milliseconds
    #[serde(default)]
    pub fixed_ms: u64,

    /// Minimum delay for random range (ms)
    #[serde(default)]
    pub min_ms: u64,

    /// Maximum delay for random range (ms)
    #[serde(default)]
    pub max_ms: u64,
}

impl DelayConfig {
    /// Calculate the actual delay to apply.
    pub fn calculate(&self) -> u64 {
        if self.fixed_ms > 0 {
            return self.fixed_ms;
        }
        if self.max_ms > self.min_ms {
            use rand::Rng;
            return rand::thread_rng().gen_range(self.min_ms..=self.max_ms);
        }
        self.min_ms
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched requests
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Default content type for responses
    #[serde(default = "default_content_type")]
    pub default_content_type: String,

    /// Request log capacity (0 = unbounded)
    #[serde(default = "default_max_log_entries")]
    pub max_log_entries: usize,

    /// Root of the admin surface; its traffic is never a correlation candidate
    #[serde(default = "default_admin_root")]
    pub admin_root: String,

    /// Path prefix followed by a log entry id, read by correlation matchers
    #[serde(default = "default_mappings_prefix")]
    pub mappings_prefix: String,

    /// Hosting path base removed from request paths
    #[serde(default)]
    pub path_base: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            default_content_type: default_content_type(),
            max_log_entries: default_max_log_entries(),
            admin_root: default_admin_root(),
            mappings_prefix: default_mappings_prefix(),
            path_base: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_max_log_entries() -> usize {
    1000
}

fn default_admin_root() -> String {
    "/__admin/".to_string()
}

fn default_mappings_prefix() -> String {
    "/__admin/mappings".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_simple_mapping() {
        let yaml = r#"
mappings:
  - id: 6f1c0a8e-2b1d-4d6a-9a57-1f8d1b6f2c11
    title: hello-world
    request:
      - type: method
        methods: [GET]
      - type: path
        patterns:
          - type: exact
            value: /hello
    response:
      status: 200
      body:
        type: text
        content: "Hello, World!"
"#;
        let config = MockServerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.mappings.len(), 1);
        assert_eq!(config.mappings[0].title.as_deref(), Some("hello-world"));
        assert_eq!(config.mappings[0].request.len(), 2);
        assert_eq!(config.mappings[0].request[0].behaviour(), MatchBehaviour::AcceptOnMatch);
    }

    #[test]
    fn test_parse_json_response_with_multi_value_header() {
        let yaml = r#"
mappings:
  - request:
      - type: path
        patterns:
          - type: wildcard
            pattern: /api/*
    response:
      headers:
        Content-Type: application/json
        X-Echo: ["{{request.url}}", "{{request.method}}"]
      transform: true
      body:
        type: json
        content:
          message: "success"
          code: 0
"#;
        let config = MockServerConfig::from_yaml(yaml).unwrap();
        let response = &config.mappings[0].response;
        assert!(response.transform);
        assert_eq!(response.headers["X-Echo"].values().len(), 2);
        assert_eq!(response.content_type(), Some("application/json"));

        if let Some(ResponseBody::Json { content }) = &response.body {
            assert_eq!(content["message"], "success");
        } else {
            panic!("Expected JSON body");
        }
    }

    #[test]
    fn test_parse_reject_behaviour_and_correlation() {
        let yaml = r#"
mappings:
  - priority: 5
    request:
      - type: header
        name: X-Debug
        behaviour: reject_on_match
      - type: mapping_correlation
        mapping_id: 11111111-1111-4111-8111-111111111111
    response:
      status: 204
"#;
        let config = MockServerConfig::from_yaml(yaml).unwrap();
        let mapping = &config.mappings[0];
        assert_eq!(mapping.priority, 5);
        assert_eq!(mapping.request[0].behaviour(), MatchBehaviour::RejectOnMatch);
        assert!(matches!(
            mapping.request[1],
            MatcherDefinition::MappingCorrelation { .. }
        ));
    }

    #[test]
    fn test_parse_scenario_and_delay() {
        let yaml = r#"
mappings:
  - request: []
    scenario:
      name: checkout
      required_state: Started
      new_state: Paid
    response:
      delay:
        fixed_ms: 1000
"#;
        let config = MockServerConfig::from_yaml(yaml).unwrap();
        let scenario = config.mappings[0].scenario.as_ref().unwrap();
        assert_eq!(scenario.new_state.as_deref(), Some("Paid"));
        assert_eq!(config.mappings[0].response.delay.as_ref().unwrap().fixed_ms, 1000);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = r#"
mappings:
  - id: 6f1c0a8e-2b1d-4d6a-9a57-1f8d1b6f2c11
    response: {}
  - id: 6f1c0a8e-2b1d-4d6a-9a57-1f8d1b6f2c11
    response: {}
"#;
        let err = MockServerConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate id"));
    }

    #[test]
    fn test_invalid_status_rejected() {
        let yaml = r#"
mappings:
  - response:
      status: 700
"#;
        assert!(MockServerConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_bad_pattern_is_a_diagnostic_not_an_error() {
        let yaml = r#"
mappings:
  - request:
      - type: path
        patterns:
          - type: regex
            pattern: "(unclosed"
    response: {}
"#;
        let config = MockServerConfig::from_yaml(yaml).unwrap();
        let diagnostics = config.diagnostics();
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].contains("Invalid regex"));
    }

    #[test]
    fn test_delay_calculation() {
        let fixed = DelayConfig {
            fixed_ms: 100,
            min_ms: 0,
            max_ms: 0,
        };
        assert_eq!(fixed.calculate(), 100);

        let range = DelayConfig {
            fixed_ms: 0,
            min_ms: 50,
            max_ms: 150,
        };
        assert!((50..=150).contains(&range.calculate()));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = GlobalSettings::default();
        assert_eq!(settings.max_log_entries, 1000);
        assert_eq!(settings.mappings_prefix, "/__admin/mappings");
        assert_eq!(settings.admin_root, "/__admin/");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "settings:\n  max_log_entries: 10\nmappings: []").unwrap();

        let config = MockServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.settings.max_log_entries, 10);
        assert!(config.mappings.is_empty());
    }

    #[test]
    fn test_default_config_file_parses() {
        let config = MockServerConfig::from_yaml(include_str!("../config/default-config.yaml")).unwrap();
        assert!(!config.mappings.is_empty());
        assert!(config.diagnostics().is_empty());
    }
}
