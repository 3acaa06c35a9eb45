//! Template context built from a request.
//!
//! Templates see a single `request` object. Query and header values are
//! always arrays, header names are lower-cased, and `bodyAsJson` is only
//! computed when a template asks for it.

use crate::request::RequestMessage;
use serde_json::{Map, Value};

/// Immutable data a response template is rendered against.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    inner: handlebars::Context,
}

impl TemplateContext {
    /// Build the context for `request`.
    ///
    /// `include_body_json` controls whether the JSON projection of the body
    /// is computed and exposed as `request.bodyAsJson`.
    pub fn new(request: &RequestMessage, include_body_json: bool) -> Self {
        let url = request.url_details();
        let mut fields = Map::new();

        fields.insert("url".into(), Value::from(url.url()));
        fields.insert("absoluteurl".into(), Value::from(url.absolute_url()));
        fields.insert("path".into(), Value::from(url.path()));
        fields.insert("absolutepath".into(), Value::from(url.absolute_path()));
        fields.insert("pathsegments".into(), Value::from(url.path_segments()));
        fields.insert(
            "absolutepathsegments".into(),
            Value::from(url.absolute_path_segments()),
        );
        fields.insert("method".into(), Value::from(request.method()));

        let mut query = Map::new();
        for (name, values) in request.query().iter() {
            query.insert(name.to_string(), Value::from(values.to_vec()));
        }
        fields.insert("query".into(), Value::Object(query));

        let mut headers = Map::new();
        for (name, values) in request.headers().iter() {
            headers.insert(name.to_ascii_lowercase(), Value::from(values.to_vec()));
        }
        fields.insert("headers".into(), Value::Object(headers));

        fields.insert("clientip".into(), Value::from(request.client_ip()));
        fields.insert("origin".into(), Value::from(url.origin()));
        if let Some(port) = url.port() {
            fields.insert("port".into(), Value::from(port));
        }
        fields.insert("protocol".into(), Value::from(url.protocol()));
        fields.insert("host".into(), Value::from(url.host()));

        if let Some(body) = request.body_as_string() {
            fields.insert("body".into(), Value::from(body.into_owned()));
        }
        if include_body_json {
            if let Some(json) = request.body_as_json() {
                fields.insert("bodyAsJson".into(), json.clone());
            }
        }

        let mut root = Map::new();
        root.insert("request".into(), Value::Object(fields));
        Self {
            inner: handlebars::Context::from(Value::Object(root)),
        }
    }

    /// The `request` object.
    pub fn request(&self) -> &Value {
        &self.inner.data()["request"]
    }

    pub(crate) fn handlebars_context(&self) -> &handlebars::Context {
        &self.inner
    }
}
