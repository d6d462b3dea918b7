//! OpenAPI-ish routes document parsing and matching.
//!
//! Routes are declared as a lightweight subset of OpenAPI (`paths` + HTTP methods). Each operation
//! carries an `x-backend` vendor extension describing the backend: response formatting, an
//! optional timeout, and free-form `extra_config` keyed by adapter namespace.

use std::collections::{BTreeMap, HashMap};

use http::Method;
use matchit::Router;
use percent_encoding::percent_decode_str;
use serde::Deserialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
/// Response formatting applied after a backend answers.
pub struct FormatterConfig {
    /// Dotted path of a nested object that replaces the whole response body.
    #[serde(default)]
    pub target: Option<String>,
    /// Dotted paths to keep. When non-empty, `deny` is ignored.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Dotted paths to remove.
    #[serde(default)]
    pub deny: Vec<String>,
    /// Top-level field renames (`from: to`).
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
    /// Wrap the whole body under this key.
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
/// `x-backend` vendor extension (per operation).
pub struct BackendSpec {
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    #[serde(flatten)]
    pub formatter: FormatterConfig,

    #[serde(default)]
    pub extra_config: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
/// One operation entry under a path item.
pub struct Operation {
    #[serde(rename = "operationId", default)]
    pub operation_id: Option<String>,

    #[serde(rename = "x-backend", default)]
    pub backend: BackendSpec,
}

#[derive(Debug, Clone, Deserialize, Default)]
/// OpenAPI-ish "path item" containing method operations.
pub struct PathItem {
    #[serde(default)]
    pub get: Option<Operation>,
    #[serde(default)]
    pub post: Option<Operation>,
    #[serde(default)]
    pub put: Option<Operation>,
    #[serde(default)]
    pub delete: Option<Operation>,
    #[serde(default)]
    pub patch: Option<Operation>,
    #[serde(default)]
    pub head: Option<Operation>,
    #[serde(default)]
    pub options: Option<Operation>,
}

#[derive(Debug, Clone, Deserialize)]
/// Minimal OpenAPI-ish document containing only `paths`.
pub struct OpenApiLikeSpec {
    pub paths: BTreeMap<String, PathItem>,
}

#[derive(Debug, Clone, Default)]
/// Fully resolved, immutable configuration of one route's backend.
pub struct RouteConfig {
    pub route_template: String,
    /// Upper-case HTTP method of the route.
    pub method: String,
    pub operation_id: Option<String>,
    pub timeout_ms: u64,
    pub formatter: FormatterConfig,
    pub extra_config: serde_json::Map<String, serde_json::Value>,
}

impl RouteConfig {
    pub fn is_get(&self) -> bool {
        self.method == Method::GET.as_str()
    }
}

#[derive(Debug, Clone)]
struct PathRoutes {
    ops_by_method: HashMap<Method, RouteConfig>,
}

#[derive(Debug, Clone)]
/// A compiled route matcher.
pub struct CompiledSpec {
    router: Router<PathRoutes>,
    routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone)]
/// Outcome of matching an incoming request to a configured route.
pub enum RouteMatch<'a> {
    /// No configured path matched.
    NotFound,
    /// Path matched but method wasn't configured.
    MethodNotAllowed { allowed: Vec<Method> },
    /// Path+method matched.
    Matched {
        route: &'a RouteConfig,
        params: BTreeMap<String, String>,
    },
}

impl CompiledSpec {
    /// Parse and compile a YAML routes document.
    pub fn from_yaml_bytes(bytes: &[u8], default_timeout_ms: u64) -> anyhow::Result<Self> {
        let spec: OpenApiLikeSpec = serde_yaml::from_slice(bytes)?;
        Self::compile(spec, default_timeout_ms)
    }

    /// Every configured route, in path order.
    pub fn routes(&self) -> &[RouteConfig] {
        &self.routes
    }

    /// Match an `(HTTP method, path)` pair.
    pub fn match_request<'a>(&'a self, method: &Method, path: &str) -> RouteMatch<'a> {
        let Ok(matched) = self.router.at(path) else {
            return RouteMatch::NotFound;
        };

        match matched.value.ops_by_method.get(method) {
            Some(route) => RouteMatch::Matched {
                route,
                params: matched
                    .params
                    .iter()
                    .map(|(k, v)| {
                        (
                            k.to_string(),
                            percent_decode_str(v).decode_utf8_lossy().into_owned(),
                        )
                    })
                    .collect(),
            },
            None => RouteMatch::MethodNotAllowed {
                allowed: {
                    let mut methods: Vec<Method> =
                        matched.value.ops_by_method.keys().cloned().collect();
                    methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                    methods
                },
            },
        }
    }

    fn compile(spec: OpenApiLikeSpec, default_timeout_ms: u64) -> anyhow::Result<Self> {
        let mut router = Router::new();
        let mut routes = Vec::new();
        for (route_template, item) in spec.paths {
            validate_path_template(&route_template)?;

            let mut ops_by_method = HashMap::new();
            for (method, op) in [
                (Method::GET, item.get),
                (Method::POST, item.post),
                (Method::PUT, item.put),
                (Method::DELETE, item.delete),
                (Method::PATCH, item.patch),
                (Method::HEAD, item.head),
                (Method::OPTIONS, item.options),
            ] {
                let Some(op) = op else {
                    continue;
                };
                if op.backend.timeout_ms == Some(0) {
                    anyhow::bail!("x-backend.timeout_ms must be > 0 for {method} {route_template}");
                }
                let route = RouteConfig {
                    route_template: route_template.clone(),
                    method: method.as_str().to_string(),
                    operation_id: op.operation_id,
                    timeout_ms: op.backend.timeout_ms.unwrap_or(default_timeout_ms),
                    formatter: op.backend.formatter,
                    extra_config: op.backend.extra_config,
                };
                routes.push(route.clone());
                ops_by_method.insert(method, route);
            }

            if ops_by_method.is_empty() {
                continue;
            }

            router.insert(route_template, PathRoutes { ops_by_method })?;
        }
        Ok(Self { router, routes })
    }
}

/// Check `{param}` placeholders are balanced, non-empty and not nested.
fn validate_path_template(path: &str) -> anyhow::Result<()> {
    if !path.starts_with('/') {
        anyhow::bail!("path templates must start with '/': {path}");
    }

    let mut param: Option<usize> = None;
    for ch in path.chars() {
        match (ch, param) {
            ('{', Some(_)) => anyhow::bail!("nested '{{' in path template: {path}"),
            ('{', None) => param = Some(0),
            ('}', None) => anyhow::bail!("unmatched '}}' in path template: {path}"),
            ('}', Some(0)) => anyhow::bail!("empty '{{}}' param in path template: {path}"),
            ('}', Some(_)) => param = None,
            (_, Some(len)) => param = Some(len + 1),
            (_, None) => {}
        }
    }

    if param.is_some() {
        anyhow::bail!("unclosed '{{' in path template: {path}");
    }
    Ok(())
}
