//! Lambda-backed route handling.
//!
//! [`LambdaBackendFactory`] decides once per route whether the route belongs to this adapter. Routes
//! without a block under [`crate::options::NAMESPACE`] are handed to the fallback factory untouched;
//! everything else gets a [`LambdaBackend`] that turns each request into one synchronous invocation.

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{Map, Value};

use crate::{
    context::RequestContext,
    error::Error,
    formatter::EntityFormatter,
    lambda::{InvocationType, InvokeInput, InvokeOutput, Invoker, InvokerFactory, LogType},
    options::Options,
    proxy::{Backend, BackendFactory, Metadata, Request, Response},
    spec::RouteConfig,
};

/// Response header carrying the function version that served the request.
pub const EXECUTED_VERSION_HEADER: &str = "X-Amz-Executed-Version";

const SUCCESS_STATUS: i32 = 200;

/// [`BackendFactory`] producing Lambda backends, deferring to `fallback` for routes it doesn't own.
pub struct LambdaBackendFactory {
    fallback: Arc<dyn BackendFactory>,
    invokers: Arc<dyn InvokerFactory>,
}

impl LambdaBackendFactory {
    pub fn new(fallback: Arc<dyn BackendFactory>, invokers: Arc<dyn InvokerFactory>) -> Self {
        Self { fallback, invokers }
    }
}

#[async_trait]
impl BackendFactory for LambdaBackendFactory {
    async fn build(&self, route: &RouteConfig) -> Arc<dyn Backend> {
        let options = match Options::from_route(route) {
            Ok(options) => options,
            Err(Error::NoAdapterConfig) => {
                tracing::debug!(
                    event = "lambda_backend_skipped",
                    method = %route.method,
                    route = %route.route_template,
                    "no lambda config, using fallback backend"
                );
                return self.fallback.build(route).await;
            }
            Err(err) => {
                tracing::error!(
                    event = "lambda_backend_misconfigured",
                    method = %route.method,
                    route = %route.route_template,
                    error = %err,
                    "invalid lambda config"
                );
                let reason = match err {
                    Error::MalformedAdapterConfig(reason) => reason,
                    other => other.to_string(),
                };
                return Arc::new(MisconfiguredBackend { reason });
            }
        };

        let invoker = self.invokers.build(options.connection.as_ref()).await;
        tracing::debug!(
            event = "lambda_backend_ready",
            method = %route.method,
            route = %route.route_template,
            payload = ?options.payload,
            "lambda backend configured"
        );

        Arc::new(LambdaBackend::new(route, options, invoker))
    }
}

/// Serves every request of a route whose adapter config could not be parsed.
struct MisconfiguredBackend {
    reason: String,
}

#[async_trait]
impl Backend for MisconfiguredBackend {
    async fn call(&self, _ctx: &RequestContext, _req: Request) -> Result<Response, Error> {
        Err(Error::MalformedAdapterConfig(self.reason.clone()))
    }
}

/// Invokes one Lambda function per request.
pub struct LambdaBackend {
    route: String,
    options: Options,
    invoker: Arc<dyn Invoker>,
    formatter: EntityFormatter,
}

impl LambdaBackend {
    pub fn new(route: &RouteConfig, options: Options, invoker: Arc<dyn Invoker>) -> Self {
        Self {
            route: route.route_template.clone(),
            options,
            invoker,
            formatter: EntityFormatter::new(&route.formatter),
        }
    }
}

#[async_trait]
impl Backend for LambdaBackend {
    async fn call(&self, ctx: &RequestContext, mut req: Request) -> Result<Response, Error> {
        let function_name = self.options.function.resolve(&req).to_string();
        let payload = self.options.payload.extract(&mut req).await?;

        let input = InvokeInput {
            function_name,
            invocation_type: InvocationType::RequestResponse,
            log_type: LogType::Tail,
            qualifier: self.options.qualifier.clone(),
            payload,
        };

        tracing::info!(
            event = "lambda_invoke",
            function = %input.function_name,
            route = %self.route,
            method = %req.method,
            payload_bytes = input.payload.len(),
            "invoking lambda"
        );

        let output = ctx
            .run(self.invoker.invoke(ctx, input.clone()))
            .await
            .inspect_err(|err| {
                tracing::warn!(
                    event = "lambda_invoke_aborted",
                    function = %input.function_name,
                    route = %self.route,
                    error = %err,
                    "lambda invocation aborted"
                );
            })?
            .map_err(Error::Invoke)?;

        let response = into_response(&input.function_name, output)?;
        Ok(self.formatter.format(response))
    }
}

fn into_response(function_name: &str, output: InvokeOutput) -> Result<Response, Error> {
    if let Some(encoded) = &output.log_result {
        log_tail(function_name, encoded);
    }

    if output.status_code != Some(SUCCESS_STATUS) {
        return Err(Error::BadStatusCode(output.status_code));
    }

    let data: Map<String, Value> =
        serde_json::from_slice(&output.payload).map_err(Error::ResponseDecode)?;

    if let Some(function_error) = &output.function_error {
        tracing::warn!(
            event = "lambda_function_error",
            function = %function_name,
            function_error = %function_error,
            "function reported an error"
        );
    }

    let mut metadata = Metadata {
        status_code: 200,
        ..Default::default()
    };
    if let Some(version) = output.executed_version {
        metadata
            .headers
            .insert(EXECUTED_VERSION_HEADER.to_string(), vec![version]);
    }

    Ok(Response {
        data,
        is_complete: true,
        metadata,
    })
}

/// Decoded execution log tail, or `None` when it isn't valid base64.
fn decode_log_tail(encoded: &str) -> Option<String> {
    STANDARD
        .decode(encoded)
        .ok()
        .map(|raw| String::from_utf8_lossy(&raw).into_owned())
}

fn log_tail(function_name: &str, encoded: &str) {
    match decode_log_tail(encoded) {
        Some(log) => tracing::debug!(
            event = "lambda_log_tail",
            function = %function_name,
            log = %log,
            "function log tail"
        ),
        None => tracing::debug!(
            event = "lambda_log_tail",
            function = %function_name,
            "undecodable function log tail"
        ),
    }
}
