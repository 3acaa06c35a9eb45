//! mockwire
//!
//! A request-matching and response-templating engine for HTTP mock servers.
//! Incoming requests are scored against registered mappings, the best
//! mapping's response is rendered from Handlebars templates, and every
//! request is recorded in a bounded log.
//!
//! # Features
//!
//! - **Scored Matching**: Every matcher yields a score in `[0, 1]`; a mapping
//!   matches when its mean score is perfect, otherwise the closest miss is
//!   reported
//! - **Priorities**: Lower priority values win among perfect matches
//! - **Templates**: Handlebars responses with JSONPath helpers
//! - **Scenarios**: Mappings gated on, and advancing, named state machines
//! - **Correlation**: Match on which mapping served an earlier logged request
//! - **Latency Simulation**: Fixed or random delays
//!
//! # Example Configuration
//!
//! ```yaml
//! mappings:
//!   - title: hello
//!     request:
//!       - type: method
//!         methods: [GET]
//!       - type: path
//!         patterns:
//!           - type: exact
//!             value: /hello
//!     response:
//!       status: 200
//!       transform: true
//!       body:
//!         type: json
//!         content:
//!           message: "Hello from {{request.path}}"
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod log;
pub mod mapping;
pub mod matcher;
pub mod request;
pub mod resolver;
pub mod response;
pub mod scenario;
pub mod server;
pub mod template;

pub use config::MockServerConfig;
pub use error::{MockError, TemplateError};
pub use log::{LogEntry, RequestLog};
pub use mapping::{Mapping, MappingRegistry};
pub use request::{RequestDefinition, RequestMessage};
pub use resolver::{MatchResult, ResolveOutcome};
pub use response::ResponseMessage;
pub use server::MockServer;
pub use template::TemplateEngine;
