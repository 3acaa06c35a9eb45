//! Response materialization.
//!
//! Turns a mapping's response definition into the outbound message, running
//! the template engine over body, header values and file path when the
//! definition asks for it.

use crate::config::{ResponseBody, ResponseDefinition};
use crate::context::TemplateContext;
use crate::error::MockError;
use crate::request::{MultiValueMap, RequestMessage};
use crate::template::TemplateEngine;
use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

/// Outbound response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponseBodyData {
    None,
    Text(String),
    Json(Value),
    Bytes(#[serde(serialize_with = "serialize_base64")] Vec<u8>),
    /// Path of a file the transport serves; never read here
    File(String),
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    use base64::Engine;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

impl ResponseBodyData {
    /// Body as text, if it has a textual form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            ResponseBodyData::None => None,
            ResponseBodyData::Text(text) => Some(text.clone()),
            ResponseBodyData::Json(value) => Some(value.to_string()),
            ResponseBodyData::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
            ResponseBodyData::File(path) => Some(path.clone()),
        }
    }
}

/// A produced response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMessage {
    pub status: u16,
    pub headers: MultiValueMap,
    pub body: ResponseBodyData,
}

impl ResponseMessage {
    /// The 404 returned when nothing matched and no default is configured.
    pub fn not_found() -> Self {
        let mut headers = MultiValueMap::case_insensitive();
        headers.append("Content-Type", "application/json");
        Self {
            status: 404,
            headers,
            body: ResponseBodyData::Json(serde_json::json!({
                "error": "not_found",
                "message": "No matching mapping found"
            })),
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.first("content-type")
    }
}

/// Builds response messages from definitions.
pub struct ResponseMaterializer {
    engine: TemplateEngine,
    default_content_type: String,
}

impl ResponseMaterializer {
    pub fn new(default_content_type: impl Into<String>) -> Self {
        Self {
            engine: TemplateEngine::new(),
            default_content_type: default_content_type.into(),
        }
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    /// Produce the response `definition` describes for `request`.
    ///
    /// `mapping_id` identifies the mapping in errors.
    pub fn materialize(
        &self,
        mapping_id: Uuid,
        definition: &ResponseDefinition,
        request: &RequestMessage,
    ) -> Result<ResponseMessage, MockError> {
        let ctx = definition
            .transform
            .then(|| TemplateContext::new(request, references(definition, "bodyAsJson")));
        let template_error = |source| MockError::Template { mapping_id, source };

        let render = |text: &str| -> Result<String, MockError> {
            match &ctx {
                Some(ctx) => self.engine.render(text, ctx).map_err(template_error),
                None => Ok(text.to_string()),
            }
        };

        let mut headers = MultiValueMap::case_insensitive();
        for (name, values) in &definition.headers {
            for value in values.values() {
                headers.append(name.clone(), render(value)?);
            }
        }

        let body = match &definition.body {
            None => ResponseBodyData::None,
            Some(ResponseBody::Text { content }) => ResponseBodyData::Text(render(content)?),
            Some(ResponseBody::Json { content }) => match &ctx {
                Some(ctx) => ResponseBodyData::Json(
                    self.engine.render_json(content, ctx).map_err(template_error)?,
                ),
                None => ResponseBodyData::Json(content.clone()),
            },
            Some(ResponseBody::Base64 { content }) => {
                use base64::Engine;
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(content)
                    .map_err(|e| {
                        MockError::Config(format!("mapping {}: invalid base64 body: {}", mapping_id, e))
                    })?;
                ResponseBodyData::Bytes(bytes)
            }
            Some(ResponseBody::File { path }) => ResponseBodyData::File(render(path)?),
        };

        if !headers.contains_key("content-type") {
            let content_type: &str = match &definition.body {
                Some(body) => body.content_type(),
                None => &self.default_content_type,
            };
            headers.append("Content-Type", content_type);
        }

        Ok(ResponseMessage {
            status: definition.status,
            headers,
            body,
        })
    }
}

/// Whether any template of `definition` mentions `needle`.
fn references(definition: &ResponseDefinition, needle: &str) -> bool {
    let in_headers = definition
        .headers
        .values()
        .any(|values| values.values().iter().any(|v| v.contains(needle)));
    let in_body = match &definition.body {
        Some(ResponseBody::Text { content }) => content.contains(needle),
        Some(ResponseBody::Json { content }) => json_mentions(content, needle),
        Some(ResponseBody::File { path }) => path.contains(needle),
        Some(ResponseBody::Base64 { .. }) | None => false,
    };
    in_headers || in_body
}

fn json_mentions(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.contains(needle),
        Value::Array(items) => items.iter().any(|v| json_mentions(v, needle)),
        Value::Object(map) => map.values().any(|v| json_mentions(v, needle)),
        _ => false,
    }
}
