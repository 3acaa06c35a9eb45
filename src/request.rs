//! Inbound request model.
//!
//! A [`RequestMessage`] is built once per inbound request and never mutated
//! afterwards. Matchers, the request log and the template context all read
//! from the same instance.

use crate::config::MultiValue;
use crate::error::MockError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;
use url::Url;

/// Which body representation is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyType {
    None,
    String,
    Json,
    Bytes,
}

impl BodyType {
    /// Guess a body type from a `Content-Type` header value.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let ct = content_type.to_ascii_lowercase();
        if ct.contains("json") {
            Some(BodyType::Json)
        } else if ct.starts_with("text/") || ct.contains("xml") || ct.contains("x-www-form-urlencoded")
        {
            Some(BodyType::String)
        } else if ct.starts_with("application/octet-stream") {
            Some(BodyType::Bytes)
        } else {
            None
        }
    }
}

/// The request body in exactly one representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BodyData {
    None,
    String {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        encoding: Option<String>,
    },
    Json {
        value: serde_json::Value,
        /// Text the value was parsed from, when the transport kept it.
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Bytes(Vec<u8>),
}

impl BodyData {
    pub fn text(text: impl Into<String>) -> Self {
        BodyData::String {
            text: text.into(),
            encoding: Some("utf-8".to_string()),
        }
    }

    pub fn json(value: serde_json::Value) -> Self {
        BodyData::Json { value, text: None }
    }

    pub fn body_type(&self) -> BodyType {
        match self {
            BodyData::None => BodyType::None,
            BodyData::String { .. } => BodyType::String,
            BodyData::Json { .. } => BodyType::Json,
            BodyData::Bytes(_) => BodyType::Bytes,
        }
    }
}

/// Ordered multi-valued name → values mapping.
///
/// Insertion order of names is kept. Lookup is case-insensitive when the map
/// was created for headers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiValueMap {
    entries: Vec<(String, Vec<String>)>,
    case_insensitive: bool,
}

impl MultiValueMap {
    pub fn case_sensitive() -> Self {
        Self::default()
    }

    pub fn case_insensitive() -> Self {
        Self {
            entries: Vec::new(),
            case_insensitive: true,
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| {
            if self.case_insensitive {
                k.eq_ignore_ascii_case(name)
            } else {
                k == name
            }
        })
    }

    /// Append a value, creating the entry if needed.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        match self.position(&name) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((name, vec![value.into()])),
        }
    }

    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name).map(|idx| self.entries[idx].1.as_slice())
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for MultiValueMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

/// URL details of a request.
///
/// The "absolute" forms are the URL as received. The plain forms have the
/// hosting path base (if any) removed, so a server mounted at `/mock`
/// sees `/mock/a/b` as path `/a/b`.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlDetails {
    url: Url,
    absolute_url: Url,
}

impl UrlDetails {
    /// Parse an absolute URL with no path base.
    pub fn parse(absolute_url: &str) -> Result<Self, url::ParseError> {
        Self::with_path_base(absolute_url, None)
    }

    /// Parse an absolute URL, stripping `path_base` from the relative forms.
    pub fn with_path_base(absolute_url: &str, path_base: Option<&str>) -> Result<Self, url::ParseError> {
        let absolute_url = Url::parse(absolute_url)?;
        let mut url = absolute_url.clone();

        if let Some(base) = path_base.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()) {
            let path = absolute_url.path();
            if let Some(rest) = path.strip_prefix(base) {
                if rest.is_empty() || rest.starts_with('/') {
                    url.set_path(if rest.is_empty() { "/" } else { rest });
                }
            }
        }

        Ok(Self { url, absolute_url })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn absolute_url(&self) -> &str {
        self.absolute_url.as_str()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn absolute_path(&self) -> &str {
        self.absolute_url.path()
    }

    pub fn path_segments(&self) -> Vec<String> {
        split_segments(self.path())
    }

    pub fn absolute_path_segments(&self) -> Vec<String> {
        split_segments(self.absolute_path())
    }

    pub fn protocol(&self) -> &str {
        self.absolute_url.scheme()
    }

    pub fn host(&self) -> &str {
        self.absolute_url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> Option<u16> {
        self.absolute_url.port_or_known_default()
    }

    pub fn origin(&self) -> String {
        self.absolute_url.origin().ascii_serialization()
    }

    fn query_pairs(&self) -> MultiValueMap {
        let mut query = MultiValueMap::case_sensitive();
        for (name, value) in self.absolute_url.query_pairs() {
            query.append(name.into_owned(), value.into_owned());
        }
        query
    }
}

fn split_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl Serialize for UrlDetails {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("url", self.url())?;
        map.serialize_entry("absolute_url", self.absolute_url())?;
        map.end()
    }
}

/// An inbound HTTP request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestMessage {
    method: String,
    #[serde(flatten)]
    url: UrlDetails,
    query: MultiValueMap,
    headers: MultiValueMap,
    client_ip: String,
    body: BodyData,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_type_hint: Option<BodyType>,
    #[serde(skip)]
    body_json: OnceLock<Option<serde_json::Value>>,
}

impl RequestMessage {
    /// Create a request. The method keeps its original casing.
    pub fn new(url: UrlDetails, method: impl Into<String>, client_ip: impl Into<String>, body: BodyData) -> Self {
        let query = url.query_pairs();
        Self {
            method: method.into(),
            url,
            query,
            headers: MultiValueMap::case_insensitive(),
            client_ip: client_ip.into(),
            body,
            body_type_hint: None,
            body_json: OnceLock::new(),
        }
    }

    /// Attach headers. Derives the body type hint from `Content-Type`
    /// unless one was set explicitly.
    pub fn with_headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (name, values) in headers {
            let name = name.into();
            for value in values {
                self.headers.append(name.clone(), value);
            }
        }
        if self.body_type_hint.is_none() {
            self.body_type_hint = self
                .headers
                .first("content-type")
                .and_then(BodyType::from_content_type);
        }
        self
    }

    /// Set the secondary body type hint explicitly.
    pub fn with_body_type_hint(mut self, hint: BodyType) -> Self {
        self.body_type_hint = Some(hint);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url_details(&self) -> &UrlDetails {
        &self.url
    }

    pub fn url(&self) -> &str {
        self.url.url()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query(&self) -> &MultiValueMap {
        &self.query
    }

    pub fn headers(&self) -> &MultiValueMap {
        &self.headers
    }

    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    pub fn body(&self) -> &BodyData {
        &self.body
    }

    pub fn detected_body_type(&self) -> BodyType {
        self.body.body_type()
    }

    pub fn detected_body_type_from_content_type(&self) -> Option<BodyType> {
        self.body_type_hint
    }

    /// The body as text, if it has a textual form.
    pub fn body_as_string(&self) -> Option<Cow<'_, str>> {
        match &self.body {
            BodyData::None => None,
            BodyData::String { text, .. } => Some(Cow::Borrowed(text)),
            BodyData::Json { text, .. } => text.as_deref().map(Cow::Borrowed),
            BodyData::Bytes(bytes) => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
        }
    }

    /// The body as JSON, parsed on first use and memoized.
    ///
    /// A textual body is only parsed when the content type hints at JSON or
    /// the text looks like a JSON document. Parse failures yield `None`.
    pub fn body_as_json(&self) -> Option<&serde_json::Value> {
        if let BodyData::Json { value, .. } = &self.body {
            return Some(value);
        }
        self.body_json
            .get_or_init(|| {
                let text = self.body_as_string()?;
                let trimmed = text.trim_start();
                let looks_like_json = trimmed.starts_with('{') || trimmed.starts_with('[');
                if self.body_type_hint != Some(BodyType::Json) && !looks_like_json {
                    return None;
                }
                serde_json::from_str(&text).ok()
            })
            .as_ref()
    }
}

/// Serializable request description used for fixtures and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestDefinition {
    #[serde(default = "default_method")]
    pub method: String,

    /// Absolute request URL, including the query string
    pub url: String,

    #[serde(default)]
    pub headers: BTreeMap<String, MultiValue>,

    #[serde(default)]
    pub body: Option<RequestBodyDefinition>,

    #[serde(default = "default_client_ip")]
    pub client_ip: String,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_client_ip() -> String {
    "127.0.0.1".to_string()
}

/// Body of a request fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestBodyDefinition {
    Text { content: String },
    Json { content: serde_json::Value },
    Base64 { content: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequestDefinitions {
    Many(Vec<RequestDefinition>),
    One(Box<RequestDefinition>),
}

impl RequestDefinition {
    /// Parse a YAML or JSON document holding one request or a list.
    pub fn parse_all(content: &str) -> Result<Vec<Self>, serde_yaml::Error> {
        Ok(match serde_yaml::from_str(content)? {
            RequestDefinitions::Many(requests) => requests,
            RequestDefinitions::One(request) => vec![*request],
        })
    }

    /// Read the requests of a fixture file.
    pub fn load(path: &Path) -> Result<Vec<Self>, MockError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_all(&content)
            .map_err(|e| MockError::Request(format!("{}: {}", path.display(), e)))
    }

    /// Build the request message this definition describes.
    pub fn into_message(self, path_base: Option<&str>) -> Result<RequestMessage, MockError> {
        let url = UrlDetails::with_path_base(&self.url, path_base)
            .map_err(|e| MockError::Request(format!("invalid url {}: {}", self.url, e)))?;

        let body = match self.body {
            None => BodyData::None,
            Some(RequestBodyDefinition::Text { content }) => BodyData::text(content),
            Some(RequestBodyDefinition::Json { content }) => {
                let text = serde_json::to_string(&content)?;
                BodyData::Json {
                    value: content,
                    text: Some(text),
                }
            }
            Some(RequestBodyDefinition::Base64 { content }) => {
                use base64::Engine;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(&content)
                    .map_err(|e| MockError::Request(format!("invalid base64 body: {}", e)))?;
                BodyData::Bytes(bytes)
            }
        };

        let headers = self
            .headers
            .into_iter()
            .map(|(name, values)| (name, values.into_vec()));

        Ok(RequestMessage::new(url, self.method, self.client_ip, body).with_headers(headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_details_without_base() {
        let url = UrlDetails::parse("http://localhost:1234").unwrap();
        assert_eq!(url.path(), "/");
        assert_eq!(url.port(), Some(1234));
        assert_eq!(url.host(), "localhost");
        assert_eq!(url.protocol(), "http");
        assert_eq!(url.origin(), "http://localhost:1234");
    }

    #[test]
    fn test_url_details_with_path_base() {
        let url = UrlDetails::with_path_base("http://localhost/wiremock/a/b", Some("/wiremock")).unwrap();
        assert_eq!(url.url(), "http://localhost/a/b");
        assert_eq!(url.absolute_url(), "http://localhost/wiremock/a/b");
        assert_eq!(url.path(), "/a/b");
        assert_eq!(url.absolute_path(), "/wiremock/a/b");
        assert_eq!(url.path_segments(), vec!["a", "b"]);
        assert_eq!(url.absolute_path_segments(), vec!["wiremock", "a", "b"]);
    }

    #[test]
    fn test_path_base_must_end_on_segment_boundary() {
        let url = UrlDetails::with_path_base("http://localhost/wiremocked/a", Some("/wiremock")).unwrap();
        assert_eq!(url.path(), "/wiremocked/a");
    }

    #[test]
    fn test_query_keeps_repeated_values_in_order() {
        let url = UrlDetails::parse("http://localhost/foo?a=1&a=2&b=5&name=John%20Doe").unwrap();
        let request = RequestMessage::new(url, "GET", "::1", BodyData::None);

        assert_eq!(request.query().get("a"), Some(&["1".to_string(), "2".to_string()][..]));
        assert_eq!(request.query().first("b"), Some("5"));
        assert_eq!(request.query().first("name"), Some("John Doe"));
        assert!(request.query().get("A").is_none());
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let url = UrlDetails::parse("http://localhost/").unwrap();
        let request = RequestMessage::new(url, "POST", "::1", BodyData::None)
            .with_headers(vec![("Content-Type", vec!["application/json"])]);

        assert_eq!(request.headers().first("content-type"), Some("application/json"));
        assert_eq!(request.detected_body_type_from_content_type(), Some(BodyType::Json));
    }

    #[test]
    fn test_method_casing_is_preserved() {
        let url = UrlDetails::parse("http://localhost/foo").unwrap();
        let request = RequestMessage::new(url, "POSt", "::1", BodyData::None);
        assert_eq!(request.method(), "POSt");
    }

    #[test]
    fn test_body_as_json_is_lazy_and_tolerant() {
        let url = UrlDetails::parse("http://localhost/").unwrap();
        let request = RequestMessage::new(url.clone(), "POST", "::1", BodyData::text("not json"));
        assert!(request.body_as_json().is_none());
        assert_eq!(request.body_as_string().as_deref(), Some("not json"));

        let request = RequestMessage::new(url, "POST", "::1", BodyData::text(r#"{"a": 1}"#));
        assert_eq!(request.body_as_json().unwrap()["a"], 1);
    }

    #[test]
    fn test_json_body_without_text_has_no_string_form() {
        let url = UrlDetails::parse("http://localhost/").unwrap();
        let request = RequestMessage::new(url, "POST", "::1", BodyData::json(serde_json::json!({"a": 1})));
        assert!(request.body_as_string().is_none());
        assert_eq!(request.detected_body_type(), BodyType::Json);
        assert_eq!(request.body_as_json().unwrap()["a"], 1);
    }

    #[test]
    fn test_request_definition_from_yaml() {
        let yaml = r#"
method: POST
url: http://localhost:8080/orders?id=7
headers:
  Content-Type: application/json
  X-Tag: [a, b]
body:
  type: json
  content:
    item: anvil
"#;
        let def: RequestDefinition = serde_yaml::from_str(yaml).unwrap();
        let request = def.into_message(None).unwrap();

        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/orders");
        assert_eq!(request.query().first("id"), Some("7"));
        assert_eq!(request.headers().get("x-tag").unwrap().len(), 2);
        assert_eq!(request.body_as_json().unwrap()["item"], "anvil");
        assert_eq!(request.body_as_string().as_deref(), Some(r#"{"item":"anvil"}"#));
    }

    #[test]
    fn test_parse_one_or_many_definitions() {
        let one = RequestDefinition::parse_all("url: http://localhost/a").unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].method, "GET");

        let many = RequestDefinition::parse_all(
            r#"[{"url": "http://localhost/a"}, {"url": "http://localhost/b", "method": "PUT"}]"#,
        )
        .unwrap();
        assert_eq!(many.len(), 2);
        assert_eq!(many[1].method, "PUT");
    }

    #[test]
    fn test_load_definitions_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "- url: http://localhost/a\n- url: http://localhost/b").unwrap();
        let loaded = RequestDefinition::load(file.path()).unwrap();
        assert_eq!(loaded.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let err = RequestDefinition::load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, MockError::Io(_)), "unexpected error: {err}");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "method: [").unwrap();
        let err = RequestDefinition::load(file.path()).unwrap_err();
        assert!(matches!(err, MockError::Request(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_request_definition_rejects_bad_url() {
        let def = RequestDefinition {
            method: "GET".to_string(),
            url: "not a url".to_string(),
            headers: BTreeMap::new(),
            body: None,
            client_ip: default_client_ip(),
        };
        assert!(matches!(def.into_message(None), Err(MockError::Request(_))));
    }
}
