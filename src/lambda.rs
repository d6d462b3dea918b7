//! Lambda invocation abstraction.
//!
//! [`Invoker`] is the single seam between the backend pipeline and AWS: tests substitute it, and
//! [`AwsLambdaInvoker`] implements it on top of `aws-sdk-lambda`. Invokers are built once per route
//! by an [`InvokerFactory`] and shared by all requests on that route.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{context::RequestContext, options::ConnectionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    /// Synchronous invocation; the call returns the function result.
    RequestResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    /// Ask Lambda to return the last 4 KB of the execution log.
    Tail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single synchronous invocation request.
pub struct InvokeInput {
    pub function_name: String,
    pub invocation_type: InvocationType,
    pub log_type: LogType,
    /// Version or alias to invoke.
    pub qualifier: Option<String>,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Raw result of an invocation.
pub struct InvokeOutput {
    pub status_code: Option<i32>,
    pub payload: Bytes,
    pub executed_version: Option<String>,
    /// Set by Lambda when the function itself raised an error.
    pub function_error: Option<String>,
    /// Base64-encoded log tail, when requested with [`LogType::Tail`].
    pub log_result: Option<String>,
}

#[async_trait]
/// Abstract Lambda invoker to allow unit-testing the backend without AWS.
///
/// Implementations must be safe to call concurrently and should honour the context's deadline.
pub trait Invoker: Send + Sync {
    async fn invoke(&self, ctx: &RequestContext, input: InvokeInput) -> anyhow::Result<InvokeOutput>;
}

#[async_trait]
/// Builds the invoker for a route from its connection overrides.
pub trait InvokerFactory: Send + Sync {
    async fn build(&self, connection: Option<&ConnectionOptions>) -> Arc<dyn Invoker>;
}

/// [`InvokerFactory`] handing the same invoker to every route.
#[derive(Clone)]
pub struct SharedInvokerFactory {
    invoker: Arc<dyn Invoker>,
}

impl SharedInvokerFactory {
    pub fn new(invoker: Arc<dyn Invoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl InvokerFactory for SharedInvokerFactory {
    async fn build(&self, _connection: Option<&ConnectionOptions>) -> Arc<dyn Invoker> {
        Arc::clone(&self.invoker)
    }
}

/// [`InvokerFactory`] producing [`AwsLambdaInvoker`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsInvokerFactory;

#[async_trait]
impl InvokerFactory for AwsInvokerFactory {
    async fn build(&self, connection: Option<&ConnectionOptions>) -> Arc<dyn Invoker> {
        Arc::new(AwsLambdaInvoker::new(connection).await)
    }
}

/// AWS SDK implementation of [`Invoker`].
#[derive(Debug, Clone)]
pub struct AwsLambdaInvoker {
    client: aws_sdk_lambda::Client,
}

impl AwsLambdaInvoker {
    /// Create an invoker using standard AWS credential resolution plus the given overrides.
    pub async fn new(connection: Option<&ConnectionOptions>) -> Self {
        Self::from_sdk_config(&load_sdk_config(connection).await)
    }

    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig) -> Self {
        Self::from_client(aws_sdk_lambda::Client::new(sdk_config))
    }

    pub fn from_client(client: aws_sdk_lambda::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &aws_sdk_lambda::Client {
        &self.client
    }
}

/// Load the ambient AWS configuration with `connection` applied on top.
///
/// `max_retries` counts retries, so the SDK is given `max_retries + 1` attempts.
pub async fn load_sdk_config(connection: Option<&ConnectionOptions>) -> aws_config::SdkConfig {
    let connection = connection.cloned().unwrap_or_default();

    let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
    if let Some(region) = connection.region {
        loader = loader.region(aws_config::Region::new(region));
    }
    if let Some(endpoint) = connection.endpoint {
        loader = loader.endpoint_url(endpoint);
    }
    if let Some(max_retries) = connection.max_retries {
        loader = loader.retry_config(
            aws_config::retry::RetryConfig::standard()
                .with_max_attempts(max_retries.saturating_add(1)),
        );
    }
    loader.load().await
}

#[async_trait]
impl Invoker for AwsLambdaInvoker {
    async fn invoke(&self, ctx: &RequestContext, input: InvokeInput) -> anyhow::Result<InvokeOutput> {
        let invocation_type = match input.invocation_type {
            InvocationType::RequestResponse => aws_sdk_lambda::types::InvocationType::RequestResponse,
        };
        let log_type = match input.log_type {
            LogType::Tail => aws_sdk_lambda::types::LogType::Tail,
        };

        let request = self
            .client
            .invoke()
            .function_name(&input.function_name)
            .invocation_type(invocation_type)
            .log_type(log_type)
            .set_qualifier(input.qualifier)
            .payload(aws_sdk_lambda::primitives::Blob::new(input.payload));

        let out = match ctx.remaining() {
            Some(remaining) => {
                request
                    .customize()
                    .config_override(
                        aws_sdk_lambda::config::Builder::default().timeout_config(
                            aws_sdk_lambda::config::timeout::TimeoutConfig::builder()
                                .operation_timeout(remaining)
                                .build(),
                        ),
                    )
                    .send()
                    .await?
            }
            None => request.send().await?,
        };

        Ok(InvokeOutput {
            status_code: Some(out.status_code()),
            payload: out
                .payload()
                .map(|b| Bytes::copy_from_slice(b.as_ref()))
                .unwrap_or_default(),
            executed_version: out.executed_version().map(str::to_string),
            function_error: out.function_error().map(str::to_string),
            log_result: out.log_result().map(str::to_string),
        })
    }
}
