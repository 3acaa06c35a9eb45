//! Request matchers.
//!
//! Every matcher scores one aspect of a request in `[0.0, 1.0]`. Patterns
//! are compiled once when a mapping is registered; a pattern that fails to
//! compile scores `0.0` forever instead of failing the mapping.

use crate::config::{BodyPattern, MatchBehaviour, MatcherDefinition, ValuePattern};
use crate::request::{BodyData, RequestMessage};
use globset::{GlobBuilder, GlobMatcher};
use jsonpath_rust::JsonPath;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use tracing::{debug, warn};
use uuid::Uuid;

pub const PERFECT_MATCH: f64 = 1.0;
pub const MISMATCH: f64 = 0.0;

fn score_of(matched: bool) -> f64 {
    if matched {
        PERFECT_MATCH
    } else {
        MISMATCH
    }
}

impl MatchBehaviour {
    /// Turn a raw score into the score this behaviour reports.
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            MatchBehaviour::AcceptOnMatch => raw,
            MatchBehaviour::RejectOnMatch => PERFECT_MATCH - raw,
        }
    }
}

/// Read-only view of past requests, as needed by stateful matchers.
pub trait RequestHistory: Send + Sync {
    /// Mapping that served the most recent request logged under `entry_id`.
    ///
    /// Entries whose path starts with `excluded_prefix` and entries with a
    /// sequence number at or above `as_of` are invisible.
    fn matched_mapping(&self, entry_id: &Uuid, excluded_prefix: &str, as_of: u64) -> Option<Uuid>;
}

/// History with no entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHistory;

impl RequestHistory for NoHistory {
    fn matched_mapping(&self, _entry_id: &Uuid, _excluded_prefix: &str, _as_of: u64) -> Option<Uuid> {
        None
    }
}

/// Everything a matcher may consult besides the request itself.
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub history: &'a dyn RequestHistory,
    /// Log sequence observed when resolution started
    pub as_of: u64,
    pub admin_root: &'a str,
    pub mappings_prefix: &'a str,
}

impl MatchContext<'static> {
    /// Context without history, using the default admin paths.
    pub fn detached() -> Self {
        MatchContext {
            history: &NoHistory,
            as_of: u64::MAX,
            admin_root: "/__admin/",
            mappings_prefix: "/__admin/mappings",
        }
    }
}

/// Add the implied `$` root to a JSON path expression.
pub fn rooted_json_path(expression: &str) -> Cow<'_, str> {
    let expression = expression.trim();
    if expression.starts_with('$') {
        Cow::Borrowed(expression)
    } else if expression.starts_with('.') || expression.starts_with('[') {
        Cow::Owned(format!("${}", expression))
    } else {
        Cow::Owned(format!("$.{}", expression))
    }
}

/// Parse a JSON path expression, adding the root when omitted.
pub fn compile_json_path(expression: &str) -> Result<JsonPath, String> {
    let rooted = rooted_json_path(expression);
    JsonPath::try_from(rooted.as_ref()).map_err(|e| e.to_string())
}

/// Evaluate a compiled JSON path, returning the selected nodes in order.
pub fn select_json(path: &JsonPath, json: &Value) -> Vec<Value> {
    match path.find(json) {
        Value::Array(nodes) => nodes,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// A compiled string pattern.
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    Exact { value: String, ignore_case: bool },
    Wildcard(GlobMatcher),
    Regex(Regex),
    Contains(String),
    /// Pattern that failed to compile; never matches
    Invalid(String),
}

impl CompiledPattern {
    pub fn compile(pattern: &ValuePattern) -> Self {
        match pattern {
            ValuePattern::Exact { value, ignore_case } => CompiledPattern::Exact {
                value: value.clone(),
                ignore_case: *ignore_case,
            },
            ValuePattern::Wildcard {
                pattern,
                ignore_case,
            } => compile_wildcard(pattern, *ignore_case),
            ValuePattern::Regex { pattern } => compile_regex(pattern),
            ValuePattern::Contains { value } => CompiledPattern::Contains(value.clone()),
        }
    }

    pub fn is_match(&self, value: &str) -> bool {
        match self {
            CompiledPattern::Exact {
                value: expected,
                ignore_case: true,
            } => expected.to_lowercase() == value.to_lowercase(),
            CompiledPattern::Exact { value: expected, .. } => expected == value,
            CompiledPattern::Wildcard(glob) => glob.is_match(value),
            CompiledPattern::Regex(regex) => regex.is_match(value),
            CompiledPattern::Contains(needle) => value.contains(needle.as_str()),
            CompiledPattern::Invalid(reason) => {
                debug!(reason = %reason, "Skipping invalid pattern");
                false
            }
        }
    }
}

fn compile_wildcard(pattern: &str, ignore_case: bool) -> CompiledPattern {
    match GlobBuilder::new(pattern).case_insensitive(ignore_case).build() {
        Ok(glob) => CompiledPattern::Wildcard(glob.compile_matcher()),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid wildcard pattern, it will never match");
            CompiledPattern::Invalid(format!("invalid wildcard {}: {}", pattern, e))
        }
    }
}

fn compile_regex(pattern: &str) -> CompiledPattern {
    match Regex::new(pattern) {
        Ok(regex) => CompiledPattern::Regex(regex),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid regex pattern, it will never match");
            CompiledPattern::Invalid(format!("invalid regex {}: {}", pattern, e))
        }
    }
}

/// Best score of any value against any pattern. No patterns means presence.
fn best_score<'v>(values: Option<impl IntoIterator<Item = &'v str>>, patterns: &[CompiledPattern]) -> f64 {
    let Some(values) = values else {
        return MISMATCH;
    };
    let mut values = values.into_iter().peekable();
    if patterns.is_empty() {
        return score_of(values.peek().is_some());
    }
    score_of(values.any(|value| patterns.iter().any(|p| p.is_match(value))))
}

/// A compiled body pattern.
#[derive(Debug, Clone)]
pub enum CompiledBodyPattern {
    Text(CompiledPattern),
    JsonEquals(Value),
    JsonPath {
        path: Box<JsonPath>,
        expected: Option<Value>,
    },
    Json,
    Empty,
}

impl CompiledBodyPattern {
    pub fn compile(pattern: &BodyPattern) -> Self {
        match pattern {
            BodyPattern::Exact { value } => CompiledBodyPattern::Text(CompiledPattern::Exact {
                value: value.clone(),
                ignore_case: false,
            }),
            BodyPattern::Contains { value } => {
                CompiledBodyPattern::Text(CompiledPattern::Contains(value.clone()))
            }
            BodyPattern::Wildcard { pattern } => {
                CompiledBodyPattern::Text(compile_wildcard(pattern, false))
            }
            BodyPattern::Regex { pattern } => CompiledBodyPattern::Text(compile_regex(pattern)),
            BodyPattern::JsonEquals { value } => CompiledBodyPattern::JsonEquals(value.clone()),
            BodyPattern::JsonPath {
                expression,
                expected,
            } => match compile_json_path(expression) {
                Ok(path) => CompiledBodyPattern::JsonPath {
                    path: Box::new(path),
                    expected: expected.clone(),
                },
                Err(e) => {
                    warn!(expression = %expression, error = %e, "Invalid JSON path, it will never match");
                    CompiledBodyPattern::Text(CompiledPattern::Invalid(format!(
                        "invalid JSON path {}: {}",
                        expression, e
                    )))
                }
            },
            BodyPattern::Json => CompiledBodyPattern::Json,
            BodyPattern::Empty => CompiledBodyPattern::Empty,
        }
    }

    pub fn score(&self, request: &RequestMessage) -> f64 {
        match self {
            CompiledBodyPattern::Text(pattern) => match request.body_as_string() {
                Some(text) => score_of(pattern.is_match(&text)),
                None => MISMATCH,
            },
            CompiledBodyPattern::JsonEquals(expected) => {
                score_of(request.body_as_json() == Some(expected))
            }
            CompiledBodyPattern::JsonPath { path, expected } => {
                let Some(json) = request.body_as_json() else {
                    return MISMATCH;
                };
                let selected = select_json(path, json);
                match expected {
                    None => score_of(!selected.is_empty()),
                    Some(Value::Array(items)) => {
                        score_of(selected == *items || selected.first() == Some(&Value::Array(items.clone())))
                    }
                    Some(expected) => score_of(selected.iter().any(|v| v == expected)),
                }
            }
            CompiledBodyPattern::Json => score_of(request.body_as_json().is_some()),
            CompiledBodyPattern::Empty => score_of(match request.body() {
                BodyData::None => true,
                BodyData::String { text, .. } => text.is_empty(),
                BodyData::Bytes(bytes) => bytes.is_empty(),
                BodyData::Json { .. } => false,
            }),
        }
    }
}

/// What a matcher looks at.
#[derive(Debug, Clone)]
pub enum MatcherKind {
    Method(Vec<String>),
    Path(Vec<CompiledPattern>),
    Url(Vec<CompiledPattern>),
    Header {
        name: String,
        patterns: Vec<CompiledPattern>,
    },
    Query {
        name: String,
        patterns: Vec<CompiledPattern>,
    },
    ClientIp(Vec<CompiledPattern>),
    Body(CompiledBodyPattern),
    /// Matches when the log entry named by the request path was served by
    /// `mapping_id`
    MappingCorrelation { mapping_id: Uuid },
}

/// A compiled request matcher.
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    kind: MatcherKind,
    behaviour: MatchBehaviour,
}

impl RequestMatcher {
    pub fn new(kind: MatcherKind, behaviour: MatchBehaviour) -> Self {
        Self { kind, behaviour }
    }

    /// Compile a matcher definition.
    pub fn compile(definition: &MatcherDefinition) -> Self {
        let compile_all = |patterns: &[ValuePattern]| -> Vec<CompiledPattern> {
            patterns.iter().map(CompiledPattern::compile).collect()
        };

        let kind = match definition {
            MatcherDefinition::Method { methods, .. } => MatcherKind::Method(methods.clone()),
            MatcherDefinition::Path { patterns, .. } => MatcherKind::Path(compile_all(patterns)),
            MatcherDefinition::Url { patterns, .. } => MatcherKind::Url(compile_all(patterns)),
            MatcherDefinition::Header { name, patterns, .. } => MatcherKind::Header {
                name: name.clone(),
                patterns: compile_all(patterns),
            },
            MatcherDefinition::Query { name, patterns, .. } => MatcherKind::Query {
                name: name.clone(),
                patterns: compile_all(patterns),
            },
            MatcherDefinition::ClientIp { patterns, .. } => {
                MatcherKind::ClientIp(compile_all(patterns))
            }
            MatcherDefinition::Body { pattern, .. } => {
                MatcherKind::Body(CompiledBodyPattern::compile(pattern))
            }
            MatcherDefinition::MappingCorrelation { mapping_id, .. } => {
                MatcherKind::MappingCorrelation {
                    mapping_id: *mapping_id,
                }
            }
        };

        Self::new(kind, definition.behaviour())
    }

    pub fn kind(&self) -> &MatcherKind {
        &self.kind
    }

    pub fn behaviour(&self) -> MatchBehaviour {
        self.behaviour
    }

    /// Short label used in diagnostics.
    pub fn name(&self) -> String {
        match &self.kind {
            MatcherKind::Method(_) => "method".to_string(),
            MatcherKind::Path(_) => "path".to_string(),
            MatcherKind::Url(_) => "url".to_string(),
            MatcherKind::Header { name, .. } => format!("header:{}", name),
            MatcherKind::Query { name, .. } => format!("query:{}", name),
            MatcherKind::ClientIp(_) => "client_ip".to_string(),
            MatcherKind::Body(_) => "body".to_string(),
            MatcherKind::MappingCorrelation { .. } => "mapping_correlation".to_string(),
        }
    }

    /// Score before the behaviour is applied.
    pub fn raw_score(&self, request: &RequestMessage, ctx: &MatchContext<'_>) -> f64 {
        match &self.kind {
            MatcherKind::Method(methods) => {
                if methods.is_empty() {
                    return PERFECT_MATCH;
                }
                score_of(methods.iter().any(|m| m.eq_ignore_ascii_case(request.method())))
            }
            MatcherKind::Path(patterns) => best_score(Some([request.path()]), patterns),
            MatcherKind::Url(patterns) => best_score(Some([request.url()]), patterns),
            MatcherKind::Header { name, patterns } => best_score(
                request.headers().get(name).map(|v| v.iter().map(String::as_str)),
                patterns,
            ),
            MatcherKind::Query { name, patterns } => best_score(
                request.query().get(name).map(|v| v.iter().map(String::as_str)),
                patterns,
            ),
            MatcherKind::ClientIp(patterns) => best_score(Some([request.client_ip()]), patterns),
            MatcherKind::Body(pattern) => pattern.score(request),
            MatcherKind::MappingCorrelation { mapping_id } => {
                correlation_score(mapping_id, request, ctx)
            }
        }
    }

    /// Score with the behaviour applied.
    pub fn score(&self, request: &RequestMessage, ctx: &MatchContext<'_>) -> f64 {
        let raw = self.raw_score(request, ctx).clamp(MISMATCH, PERFECT_MATCH);
        self.behaviour.apply(raw)
    }
}

/// Log entry id addressed by a path of the form `<prefix>/<id>`.
pub fn correlation_id(path: &str, mappings_prefix: &str) -> Option<Uuid> {
    let rest = path.strip_prefix(mappings_prefix.trim_end_matches('/'))?;
    let id = rest.strip_prefix('/')?.trim_end_matches('/');
    Uuid::parse_str(id).ok()
}

fn correlation_score(target: &Uuid, request: &RequestMessage, ctx: &MatchContext<'_>) -> f64 {
    let Some(entry_id) = correlation_id(request.path(), ctx.mappings_prefix) else {
        debug!(path = %request.path(), "No log entry id in path");
        return MISMATCH;
    };
    let served_by = ctx
        .history
        .matched_mapping(&entry_id, ctx.admin_root, ctx.as_of);
    score_of(served_by.as_ref() == Some(target))
}
