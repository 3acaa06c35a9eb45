//! Error types for response generation and configuration.

use thiserror::Error;

/// Failures raised while rendering a response template.
///
/// Data that is simply absent from the request never produces one of these;
/// it renders as empty text. These errors mean the mapping itself is broken.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A helper was invoked without one of its required arguments.
    #[error("helper {helper} requires argument {index}, but it was missing or empty")]
    HelperArgument { helper: String, index: usize },

    /// A helper received its arguments but could not evaluate them.
    #[error("helper {helper} failed: {message}")]
    Helper { helper: String, message: String },

    /// The template could not be parsed or rendered.
    #[error("template rendering failed: {0}")]
    Render(String),
}

impl TemplateError {
    /// True when the failure is a missing helper argument.
    pub fn is_helper_argument(&self) -> bool {
        matches!(self, TemplateError::HelperArgument { .. })
    }
}

impl From<handlebars::RenderError> for TemplateError {
    fn from(err: handlebars::RenderError) -> Self {
        use handlebars::RenderErrorReason;

        match err.reason() {
            RenderErrorReason::ParamNotFoundForIndex(helper, index) => {
                TemplateError::HelperArgument {
                    helper: (*helper).to_string(),
                    index: *index,
                }
            }
            RenderErrorReason::ParamNotFoundForName(helper, _) => TemplateError::HelperArgument {
                helper: (*helper).to_string(),
                index: 0,
            },
            RenderErrorReason::Other(message) => match message.split_once(": ") {
                Some((helper, detail)) if helper.starts_with("JsonPath.") => TemplateError::Helper {
                    helper: helper.to_string(),
                    message: detail.to_string(),
                },
                _ => TemplateError::Render(message.clone()),
            },
            _ => TemplateError::Render(err.to_string()),
        }
    }
}

/// Top-level error for the mock server pipeline.
#[derive(Debug, Error)]
pub enum MockError {
    /// Response generation failed for a matched mapping.
    #[error("failed to build response for mapping {mapping_id}: {source}")]
    Template {
        mapping_id: uuid::Uuid,
        #[source]
        source: TemplateError,
    },

    /// Invalid configuration or mapping definition.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid request definition.
    #[error("invalid request: {0}")]
    Request(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
