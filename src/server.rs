//! axum server wiring.
//!
//! The router exposes:
//! - `/healthz` and `/readyz`
//! - a catch-all handler that matches the request against the routes document and hands it to the
//!   route's [`Backend`]

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Request as HttpRequest, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::get,
    Router,
};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    config::ServerConfig,
    context::RequestContext,
    error::Error,
    proxy::{Backend, BackendFactory, Metadata, Request, RequestBody, Response},
    spec::{CompiledSpec, RouteConfig, RouteMatch},
};

#[derive(Clone)]
struct AppState {
    spec: Arc<CompiledSpec>,
    backends: Arc<HashMap<(Method, String), Arc<dyn Backend>>>,
    max_body_bytes: usize,
}

/// Raised by the body stream once more than `max_body_bytes` have been read.
#[derive(Debug, thiserror::Error)]
#[error("request body exceeds {limit} bytes")]
struct BodyTooLarge {
    limit: usize,
}

/// [`BackendFactory`] for routes no adapter claims. Its backend answers `501 Not Implemented`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredBackendFactory;

#[async_trait]
impl BackendFactory for UnconfiguredBackendFactory {
    async fn build(&self, _route: &RouteConfig) -> Arc<dyn Backend> {
        Arc::new(UnconfiguredBackend)
    }
}

struct UnconfiguredBackend;

#[async_trait]
impl Backend for UnconfiguredBackend {
    async fn call(&self, _ctx: &RequestContext, _req: Request) -> Result<Response, Error> {
        let mut data = serde_json::Map::new();
        data.insert(
            "error".to_string(),
            serde_json::Value::from("no backend configured for this route"),
        );
        Ok(Response {
            data,
            is_complete: false,
            metadata: Metadata {
                status_code: StatusCode::NOT_IMPLEMENTED.as_u16(),
                ..Default::default()
            },
        })
    }
}

/// Build one backend per configured route and wire them into an axum router.
pub async fn build_app(
    spec: CompiledSpec,
    factory: &dyn BackendFactory,
    max_body_bytes: usize,
) -> anyhow::Result<Router> {
    let mut backends = HashMap::with_capacity(spec.routes().len());
    for route in spec.routes() {
        let method = Method::from_bytes(route.method.as_bytes())?;
        let backend = factory.build(route).await;
        backends.insert((method, route.route_template.clone()), backend);
    }

    let state = AppState {
        spec: Arc::new(spec),
        backends: Arc::new(backends),
        max_body_bytes,
    };

    Ok(Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .fallback(handle_any)
        .with_state(state))
}

pub async fn run(
    cfg: ServerConfig,
    spec: CompiledSpec,
    factory: Arc<dyn BackendFactory>,
) -> anyhow::Result<()> {
    let app = build_app(spec, factory.as_ref(), cfg.max_body_bytes).await?;

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr).await?;
    tracing::info!(event = "listening", addr = %cfg.listen_addr, "server started");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Catch-all handler for user-defined routes.
async fn handle_any(State(state): State<AppState>, req: HttpRequest) -> HttpResponse {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    let (route, params) = match state.spec.match_request(&parts.method, &path) {
        RouteMatch::NotFound => return (StatusCode::NOT_FOUND, "not found").into_response(),
        RouteMatch::MethodNotAllowed { allowed } => {
            let mut resp = (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response();
            let allow = allowed
                .iter()
                .map(Method::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            if let Ok(value) = HeaderValue::from_str(&allow) {
                resp.headers_mut().insert(header::ALLOW, value);
            }
            return resp;
        }
        RouteMatch::Matched { route, params } => (route, params),
    };

    let Some(backend) = state
        .backends
        .get(&(parts.method.clone(), route.route_template.clone()))
        .cloned()
    else {
        return (StatusCode::INTERNAL_SERVER_ERROR, "route has no backend").into_response();
    };

    let request = Request {
        method: parts.method.as_str().to_string(),
        url: request_url(&parts),
        path,
        params,
        query: parse_query(parts.uri.query()),
        headers: collect_headers(&parts.headers),
        body: Some(limited_body(body, state.max_body_bytes)),
    };

    // Cancelled when this handler returns or is dropped on client disconnect.
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let ctx = RequestContext::new()
        .with_cancellation(cancel)
        .with_timeout(Duration::from_millis(route.timeout_ms));

    let span = tracing::info_span!(
        "request",
        id = %format!("r-{}", Uuid::new_v4()),
        method = %request.method,
        route = %route.route_template,
    );
    let started = Instant::now();
    let result = backend.call(&ctx, request).instrument(span.clone()).await;

    match result {
        Ok(resp) => render_response(resp),
        Err(err) => {
            let status = error_status(&err);
            if matches!(err, Error::DeadlineExceeded) {
                tracing::warn!(
                    parent: &span,
                    event = "request_timeout",
                    timeout_ms = route.timeout_ms,
                    elapsed_ms = started.elapsed().as_millis(),
                    "request timed out waiting for backend"
                );
            } else {
                tracing::warn!(
                    parent: &span,
                    event = "backend_error",
                    status = status.as_u16(),
                    error = %err,
                    "backend call failed"
                );
            }
            (status, err.to_string()).into_response()
        }
    }
}

fn request_url(parts: &http::request::Parts) -> http::Uri {
    if parts.uri.scheme().is_some() {
        return parts.uri.clone();
    }
    let Some(host) = parts
        .headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
    else {
        return parts.uri.clone();
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    http::Uri::builder()
        .scheme("http")
        .authority(host)
        .path_and_query(path_and_query)
        .build()
        .unwrap_or_else(|_| parts.uri.clone())
}

fn parse_query(raw: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(raw) = raw.filter(|q| !q.is_empty()) else {
        return query;
    };
    for (k, v) in url::form_urlencoded::parse(raw.as_bytes()) {
        query.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    query
}

fn collect_headers(headers: &http::HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        out.entry(canonical_header_name(name.as_str()))
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

/// `content-type` -> `Content-Type`.
fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn limited_body(body: Body, limit: usize) -> RequestBody {
    let mut read = 0usize;
    RequestBody::from_stream(body.into_data_stream().map(move |chunk| {
        let chunk = chunk.map_err(std::io::Error::other)?;
        read += chunk.len();
        if read > limit {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                BodyTooLarge { limit },
            ));
        }
        Ok(chunk)
    }))
}

fn render_response(resp: Response) -> HttpResponse {
    let status = StatusCode::from_u16(resp.metadata.status_code).unwrap_or(StatusCode::OK);
    let body = match serde_json::to_vec(&resp.data) {
        Ok(body) => body,
        Err(err) => {
            tracing::error!(event = "response_encode_failed", error = %err, "encoding response");
            return (StatusCode::INTERNAL_SERVER_ERROR, "encoding response").into_response();
        }
    };

    let mut out = (status, body).into_response();
    let headers = out.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    for (name, values) in resp.metadata.headers {
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.append(name.clone(), value);
            }
        }
    }
    out
}

fn error_status(err: &Error) -> StatusCode {
    match err {
        Error::BodyRead(io)
            if io
                .get_ref()
                .is_some_and(|inner| inner.is::<BodyTooLarge>()) =>
        {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        Error::BodyRead(_) => StatusCode::BAD_REQUEST,
        Error::NoAdapterConfig | Error::MalformedAdapterConfig(_) | Error::PayloadEncode(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Error::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Error::Invoke(_) | Error::BadStatusCode(_) | Error::ResponseDecode(_) | Error::Cancelled => {
            StatusCode::BAD_GATEWAY
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use tower::ServiceExt as _;

    use super::*;
    use crate::{
        backend::{LambdaBackendFactory, EXECUTED_VERSION_HEADER},
        lambda::{InvokeInput, InvokeOutput, Invoker, SharedInvokerFactory},
    };

    /// Echoes the payload back as the function result.
    #[derive(Default)]
    struct EchoInvoker {
        calls: Mutex<Vec<InvokeInput>>,
        status_code: Option<i32>,
    }

    impl EchoInvoker {
        fn ok() -> Self {
            Self {
                status_code: Some(200),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Invoker for EchoInvoker {
        async fn invoke(
            &self,
            _ctx: &RequestContext,
            input: InvokeInput,
        ) -> anyhow::Result<InvokeOutput> {
            let payload = input.payload.clone();
            self.calls.lock().unwrap().push(input);
            Ok(InvokeOutput {
                status_code: self.status_code,
                payload,
                executed_version: Some("$LATEST".to_string()),
                ..Default::default()
            })
        }
    }

    /// Never answers; records the request's cancellation token.
    #[derive(Default)]
    struct PendingInvoker {
        started: tokio::sync::Notify,
        tokens: Mutex<Vec<CancellationToken>>,
    }

    #[async_trait]
    impl Invoker for PendingInvoker {
        async fn invoke(
            &self,
            ctx: &RequestContext,
            _input: InvokeInput,
        ) -> anyhow::Result<InvokeOutput> {
            self.tokens
                .lock()
                .unwrap()
                .push(ctx.cancellation_token().clone());
            self.started.notify_one();
            std::future::pending().await
        }
    }

    const ROUTES: &[u8] = br#"
paths:
  /users/{first_name}/{last_name}:
    get:
      x-backend:
        timeout_ms: 50
        deny: [function]
        extra_config:
          io.gateway.backend.lambda:
            function_name: greeter
  /events/{id}:
    post:
      x-backend:
        extra_config:
          io.gateway.backend.lambda:
            function_name: events
            aws_api_gateway_format: { enabled: true }
  /raw:
    post:
      x-backend:
        extra_config:
          io.gateway.backend.lambda:
            function_name: raw
  /plain:
    get: {}
"#;

    async fn app_with(invoker: Arc<dyn Invoker>, max_body_bytes: usize) -> Router {
        let spec = CompiledSpec::from_yaml_bytes(ROUTES, 1000).unwrap();
        let factory = LambdaBackendFactory::new(
            Arc::new(UnconfiguredBackendFactory),
            Arc::new(SharedInvokerFactory::new(invoker)),
        );
        build_app(spec, &factory, max_body_bytes).await.unwrap()
    }

    async fn json_body(res: HttpResponse) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn healthz_works() {
        let app = app_with(Arc::new(EchoInvoker::ok()), 1024).await;
        let res = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn not_found_when_no_route_matches() {
        let app = app_with(Arc::new(EchoInvoker::ok()), 1024).await;
        let res = app
            .oneshot(HttpRequest::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn method_not_allowed_sets_allow_header() {
        let app = app_with(Arc::new(EchoInvoker::ok()), 1024).await;
        let res = app
            .oneshot(
                HttpRequest::builder()
                    .method("DELETE")
                    .uri("/raw")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers().get(header::ALLOW).unwrap(), "POST");
    }

    #[tokio::test]
    async fn get_route_invokes_with_params_and_formats_response() {
        let invoker = Arc::new(EchoInvoker::ok());
        let app = app_with(invoker.clone(), 1024).await;

        let res = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/users/fooo/bar")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers().get(EXECUTED_VERSION_HEADER).unwrap(), "$LATEST");
        assert_eq!(
            res.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            json_body(res).await,
            serde_json::json!({ "first_name": "fooo", "last_name": "bar" })
        );

        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function_name, "greeter");
    }

    #[tokio::test]
    async fn encoded_path_params_reach_the_payload_decoded() {
        let invoker = Arc::new(EchoInvoker::ok());
        let app = app_with(invoker.clone(), 1024).await;

        let res = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/users/J%C3%BCrgen/van%20Dyk")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            json_body(res).await,
            serde_json::json!({ "first_name": "Jürgen", "last_name": "van Dyk" })
        );
    }

    #[tokio::test]
    async fn api_gateway_event_carries_query_headers_and_scheme() {
        let app = app_with(Arc::new(EchoInvoker::ok()), 1024).await;

        let res = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/events/42?tag=a&tag=b&single=x")
                    .header("host", "gateway.local")
                    .header("user-agent", "curl/8")
                    .body(Body::from(r#"{"k":"v"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let event = json_body(res).await;
        assert_eq!(event["version"], "1.0");
        assert_eq!(event["httpMethod"], "POST");
        assert_eq!(event["path"], "/events/42");
        assert_eq!(event["pathParameters"]["id"], "42");
        assert_eq!(event["queryStringParameters"]["tag"], "a");
        assert_eq!(
            event["multiValueQueryStringParameters"]["tag"],
            serde_json::json!(["a", "b"])
        );
        assert_eq!(event["headers"]["User-Agent"], "curl/8");
        assert_eq!(event["requestContext"]["protocol"], "http");
        assert_eq!(event["requestContext"]["identity"]["userAgent"], "curl/8");
        assert_eq!(event["body"], r#"{"k":"v"}"#);
    }

    #[tokio::test]
    async fn payload_too_large_is_rejected_before_invoking() {
        let invoker = Arc::new(EchoInvoker::ok());
        let app = app_with(invoker.clone(), 4).await;

        let res = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/raw")
                    .body(Body::from("too-big"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_route_answers_not_implemented() {
        let invoker = Arc::new(EchoInvoker::ok());
        let app = app_with(invoker.clone(), 1024).await;

        let res = app
            .oneshot(HttpRequest::builder().uri("/plain").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_IMPLEMENTED);
        assert!(invoker.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn bad_function_status_is_bad_gateway() {
        let invoker = Arc::new(EchoInvoker {
            status_code: Some(201),
            ..Default::default()
        });
        let app = app_with(invoker, 1024).await;

        let res = app
            .oneshot(
                HttpRequest::builder()
                    .method("POST")
                    .uri("/raw")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test(start_paused = true)]
    async fn route_timeout_is_gateway_timeout() {
        let invoker = Arc::new(PendingInvoker::default());
        let app = app_with(invoker.clone(), 1024).await;

        let res = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/users/a/b")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn client_disconnect_cancels_invocation() {
        let invoker = Arc::new(PendingInvoker::default());
        let app = app_with(invoker.clone(), 1024).await;

        let task = tokio::spawn(app.oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/raw")
                .body(Body::from("{}"))
                .unwrap(),
        ));
        invoker.started.notified().await;

        let token = invoker.tokens.lock().unwrap()[0].clone();
        assert!(!token.is_cancelled());

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(token.is_cancelled());
    }

    #[test]
    fn canonicalizes_header_names() {
        assert_eq!(canonical_header_name("user-agent"), "User-Agent");
        assert_eq!(canonical_header_name("x-amz-executed-version"), "X-Amz-Executed-Version");
        assert_eq!(canonical_header_name("accept"), "Accept");
    }

    #[test]
    fn non_ascii_header_values_are_kept() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            "x-city",
            http::HeaderValue::from_bytes(b"caf\xc3\xa9").unwrap(),
        );
        headers.append("x-raw", http::HeaderValue::from_bytes(b"a\xffb").unwrap());
        headers.append("accept", http::HeaderValue::from_static("text/plain"));

        let collected = collect_headers(&headers);
        assert_eq!(collected["X-City"], vec!["café".to_string()]);
        assert_eq!(collected["X-Raw"], vec!["a\u{FFFD}b".to_string()]);
        assert_eq!(collected["Accept"], vec!["text/plain".to_string()]);
    }

    #[test]
    fn query_keeps_repeated_values_in_order() {
        let query = parse_query(Some("a=1&b=x%20y&a=2"));
        assert_eq!(query["a"], vec!["1".to_string(), "2".to_string()]);
        assert_eq!(query["b"], vec!["x y".to_string()]);
        assert!(parse_query(None).is_empty());
        assert!(parse_query(Some("")).is_empty());
    }

    #[tokio::test]
    async fn body_limit_applies_across_chunks() {
        let body = Body::from_stream(futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
        ]));
        let err = limited_body(body, 4).read_to_end().await.unwrap_err();
        assert_eq!(
            error_status(&Error::BodyRead(err)),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
