//! Parsing of the adapter's per-route configuration block.
//!
//! The block lives in [`RouteConfig::extra_config`] under [`NAMESPACE`]:
//!
//! ```yaml
//! extra_config:
//!   io.gateway.backend.lambda:
//!     function_param_name: fn      # or `function_name: my-function`
//!     qualifier: live
//!     region: eu-west-1
//!     endpoint: http://localhost:4566
//!     max_retries: 2
//!     aws_api_gateway_format:
//!       enabled: true
//! ```

use serde_json::{Map, Value};

use crate::{error::Error, payload::PayloadFormat, proxy::Request, spec::RouteConfig};

/// Configuration key identifying this adapter's options.
pub const NAMESPACE: &str = "io.gateway.backend.lambda";

/// Request parameter holding the function name when no other key is configured.
pub const DEFAULT_FUNCTION_PARAM: &str = "function";

#[derive(Debug, Clone, PartialEq, Eq)]
/// How the target function name is chosen for a request.
pub enum FunctionResolver {
    /// Same function for every request.
    Constant(String),
    /// Read from the named route parameter. A missing parameter resolves to an empty name.
    Param(String),
}

impl FunctionResolver {
    pub fn resolve<'a>(&'a self, req: &'a Request) -> &'a str {
        match self {
            Self::Constant(name) => name,
            Self::Param(key) => req.params.get(key).map(String::as_str).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Client connection overrides. Unset fields fall back to the ambient AWS configuration.
pub struct ConnectionOptions {
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Resolved adapter options for one route. Immutable once built.
pub struct Options {
    pub function: FunctionResolver,
    pub payload: PayloadFormat,
    pub qualifier: Option<String>,
    /// `None` when no connection override is configured.
    pub connection: Option<ConnectionOptions>,
}

impl Options {
    /// Build the options for `route`.
    ///
    /// Returns [`Error::NoAdapterConfig`] when the route has no block under [`NAMESPACE`]; callers
    /// should treat that as "not mine" and hand the route to a fallback.
    pub fn from_route(route: &RouteConfig) -> Result<Self, Error> {
        let Some(value) = route.extra_config.get(NAMESPACE) else {
            return Err(Error::NoAdapterConfig);
        };
        let Some(cfg) = value.as_object() else {
            return Err(Error::MalformedAdapterConfig(format!(
                "expected a mapping under {NAMESPACE}, found {}",
                json_type_name(value)
            )));
        };

        let endpoint = string_option(cfg, "endpoint");
        if let Some(endpoint) = &endpoint {
            url::Url::parse(endpoint).map_err(|err| {
                Error::MalformedAdapterConfig(format!("invalid endpoint {endpoint:?}: {err}"))
            })?;
        }

        let function = match string_option(cfg, "function_name") {
            Some(name) => FunctionResolver::Constant(name),
            None => FunctionResolver::Param(
                string_option(cfg, "function_param_name")
                    .unwrap_or_else(|| DEFAULT_FUNCTION_PARAM.to_string()),
            ),
        };

        let api_gateway_format = cfg
            .get("aws_api_gateway_format")
            .and_then(Value::as_object)
            .and_then(|format| format.get("enabled"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let payload = if api_gateway_format {
            PayloadFormat::ApiGatewayV1
        } else if route.is_get() {
            PayloadFormat::Params
        } else {
            PayloadFormat::Body
        };

        let connection = ConnectionOptions {
            region: string_option(cfg, "region"),
            endpoint,
            max_retries: cfg
                .get("max_retries")
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok()),
        };
        let connection = (connection != ConnectionOptions::default()).then_some(connection);

        Ok(Self {
            function,
            payload,
            qualifier: string_option(cfg, "qualifier"),
            connection,
        })
    }
}

/// A string-valued option. Any other type counts as unset.
fn string_option(cfg: &Map<String, Value>, key: &str) -> Option<String> {
    cfg.get(key).and_then(Value::as_str).map(str::to_string)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}
