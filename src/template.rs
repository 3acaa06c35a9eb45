//! Template engine for dynamic responses.
//!
//! Uses Handlebars with HTML escaping disabled and a few domain helpers.
//! Templates are normalized before rendering so that namespaced helper names
//! (`JsonPath.SelectToken`), mixed-case header names and bare multi-value
//! accessors (`{{request.query.id}}`) behave as mapping authors expect.

use crate::context::TemplateContext;
use crate::error::TemplateError;
use crate::matcher::{compile_json_path, select_json};
use handlebars::{
    handlebars_helper, BlockContext, Context, Handlebars, Helper, HelperResult, Output,
    RenderContext, RenderError, RenderErrorReason, Renderable,
};
use serde_json::Value;
use std::borrow::Cow;

const SELECT_TOKEN: &str = "JsonPath.SelectToken";
const SELECT_TOKENS: &str = "JsonPath.SelectTokens";

/// Helper namespaces written as `Namespace.Helper` in templates and
/// registered as `Namespace_Helper`.
const HELPER_NAMESPACES: &[&str] = &["JsonPath"];

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("JsonPath_SelectToken", Box::new(select_token_helper));
        handlebars.register_helper("JsonPath_SelectTokens", Box::new(select_tokens_helper));
        handlebars.register_helper("uuid", Box::new(random_uuid));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper));
        handlebars.register_helper("lower", Box::new(lower));

        // Responses are not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a template string against a request context.
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        let normalized = normalize_template(template);
        Ok(self
            .handlebars
            .render_template_with_context(&normalized, ctx.handlebars_context())?)
    }

    /// Render every string leaf of a JSON value.
    ///
    /// A leaf whose output differs from its template and parses as JSON is
    /// replaced by the parsed value, so a selected object stays an object.
    pub fn render_json(&self, value: &Value, ctx: &TemplateContext) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => {
                let rendered = self.render(s, ctx)?;
                if rendered == *s {
                    return Ok(value.clone());
                }
                Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)))
            }
            Value::Array(arr) => {
                let rendered: Result<Vec<_>, _> =
                    arr.iter().map(|v| self.render_json(v, ctx)).collect();
                Ok(Value::Array(rendered?))
            }
            Value::Object(obj) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in obj {
                    rendered.insert(k.clone(), self.render_json(v, ctx)?);
                }
                Ok(Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rewrite every unescaped mustache of `template`.
fn normalize_template(template: &str) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let (before, tail) = rest.split_at(start);
        out.push_str(before);

        let backslashes = before.chars().rev().take_while(|c| *c == '\\').count();
        if backslashes % 2 == 1 {
            out.push_str("{{");
            rest = &tail[2..];
            continue;
        }

        let body = &tail[2..];
        if body.starts_with('!') {
            out.push_str("{{");
            rest = body;
            continue;
        }
        let closing = if body.starts_with('{') { "}}}" } else { "}}" };
        match body.find(closing) {
            Some(end) => {
                out.push_str("{{");
                out.push_str(&normalize_expression(&body[..end]));
                out.push_str(closing);
                rest = &body[end + closing.len()..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

fn normalize_expression(expression: &str) -> String {
    let expression = alias_namespaced_helpers(expression);
    let expression = lowercase_header_names(&expression);
    index_bare_multi_value(&expression)
}

/// `JsonPath.SelectToken` → `JsonPath_SelectToken`.
fn alias_namespaced_helpers(expression: &str) -> String {
    let mut out = expression.to_string();
    for namespace in HELPER_NAMESPACES {
        let dotted = format!("{}.", namespace);
        let mut result = String::with_capacity(out.len());
        let mut rest = out.as_str();
        while let Some(idx) = rest.find(&dotted) {
            let at_boundary = rest[..idx]
                .chars()
                .last()
                .map_or(true, |c| c.is_whitespace() || "(~#/^{".contains(c));
            result.push_str(&rest[..idx]);
            result.push_str(namespace);
            result.push(if at_boundary { '_' } else { '.' });
            rest = &rest[idx + dotted.len()..];
        }
        result.push_str(rest);
        out = result;
    }
    out
}

fn is_name_char(c: char) -> bool {
    !(c.is_whitespace() || ".[]()}~=\"'".contains(c))
}

/// `request.headers.Content-Type` → `request.headers.content-type`.
fn lowercase_header_names(expression: &str) -> String {
    const PREFIX: &str = "request.headers.";
    let mut out = String::with_capacity(expression.len());
    let mut rest = expression;
    while let Some(idx) = rest.find(PREFIX) {
        let (before, tail) = rest.split_at(idx + PREFIX.len());
        out.push_str(before);
        let name_len = tail.find(|c: char| !is_name_char(c)).unwrap_or(tail.len());
        out.push_str(&tail[..name_len].to_ascii_lowercase());
        rest = &tail[name_len..];
    }
    out.push_str(rest);
    out
}

/// A lone `request.query.x` / `request.headers.x` mustache addresses the
/// first value.
fn index_bare_multi_value(expression: &str) -> String {
    let core = expression
        .trim_start_matches('{')
        .trim_end_matches('}')
        .trim_matches(|c: char| c == '~' || c.is_whitespace());

    let is_bare = ["request.query.", "request.headers."].iter().any(|prefix| {
        core.strip_prefix(prefix)
            .is_some_and(|name| !name.is_empty() && name.chars().all(is_name_char))
    });
    if !is_bare {
        return expression.to_string();
    }
    match expression.find(core) {
        Some(idx) => {
            let end = idx + core.len();
            format!("{}.[0]{}", &expression[..end], &expression[end..])
        }
        None => expression.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Evaluate the `<source> "<expression>"` arguments of a JSON path helper.
fn select_from_params(h: &Helper, name: &'static str) -> Result<Vec<Value>, RenderError> {
    let source = h
        .param(0)
        .map(|p| p.value())
        .filter(|v| !is_blank(v))
        .ok_or(RenderErrorReason::ParamNotFoundForIndex(name, 0))?;
    let expression = h
        .param(1)
        .and_then(|p| p.value().as_str())
        .filter(|s| !s.is_empty())
        .ok_or(RenderErrorReason::ParamNotFoundForIndex(name, 1))?;

    let json: Cow<Value> = match source {
        Value::String(text) => Cow::Owned(serde_json::from_str(text).map_err(|e| {
            RenderErrorReason::Other(format!("{}: source is not valid JSON: {}", name, e))
        })?),
        other => Cow::Borrowed(other),
    };
    let path = compile_json_path(expression).map_err(|e| {
        RenderErrorReason::Other(format!("{}: invalid expression {}: {}", name, expression, e))
    })?;

    Ok(select_json(&path, &json))
}

/// Indented JSON with the platform line ending.
fn pretty_json(value: &Value, name: &'static str) -> Result<String, RenderError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| RenderErrorReason::Other(format!("{}: {}", name, e)))?;
    if cfg!(windows) {
        Ok(text.replace('\n', "\r\n"))
    } else {
        Ok(text)
    }
}

fn select_token_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let selected = select_from_params(h, SELECT_TOKEN)?;
    match selected.into_iter().next() {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) => out.write(&s)?,
        Some(value @ (Value::Object(_) | Value::Array(_))) => {
            out.write(&pretty_json(&value, SELECT_TOKEN)?)?
        }
        Some(value) => out.write(&value.to_string())?,
    }
    Ok(())
}

fn select_tokens_helper<'reg, 'rc>(
    h: &Helper<'rc>,
    r: &'reg Handlebars<'reg>,
    ctx: &'rc Context,
    rc: &mut RenderContext<'reg, 'rc>,
    out: &mut dyn Output,
) -> HelperResult {
    let selected = Value::Array(select_from_params(h, SELECT_TOKENS)?);
    match h.template() {
        Some(template) => {
            let mut block = BlockContext::new();
            block.set_base_value(selected);
            rc.push_block(block);
            let result = template.render(r, ctx, rc, out);
            rc.pop_block();
            result
        }
        None => {
            out.write(&pretty_json(&selected, SELECT_TOKENS)?)?;
            Ok(())
        }
    }
}

handlebars_helper!(random_uuid: |*_args| uuid::Uuid::new_v4().to_string());
handlebars_helper!(upper: |v: Json| scalar_text(v).to_uppercase());
handlebars_helper!(lower: |v: Json| scalar_text(v).to_lowercase());

/// Text of a value; multi-valued query and header entries yield their first value.
fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(values) => values.first().map(scalar_text).unwrap_or_default(),
        other => other.to_string(),
    }
}

fn now_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    out.write(&chrono::Utc::now().format(format).to_string())?;
    Ok(())
}

fn default_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let fallback = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match h.param(0).map(|v| v.value()) {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(Value::Array(values)) if !values.is_empty() => out.write(&scalar_text(&values[0]))?,
        Some(v) if !is_blank(v) && !v.is_array() => out.write(&v.to_string())?,
        _ => out.write(fallback)?,
    }
    Ok(())
}
