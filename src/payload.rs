//! Invocation payload formats.
//!
//! The format is chosen once per route (see [`crate::options::Options::from_route`]) and applied
//! to every request on that route.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Serialize;

use crate::{error::Error, proxy::Request};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// JSON object of the route params, keys lower-cased, newline terminated.
    Params,
    /// The request body, unmodified.
    Body,
    /// An API Gateway REST (v1.0) proxy event.
    ApiGatewayV1,
}

impl PayloadFormat {
    /// Build the payload for `req`. Takes the request body when the format needs it.
    pub async fn extract(&self, req: &mut Request) -> Result<Bytes, Error> {
        match self {
            Self::Params => from_params(req),
            Self::Body => read_body(req).await,
            Self::ApiGatewayV1 => from_api_gateway_v1(req).await,
        }
    }
}

fn from_params(req: &Request) -> Result<Bytes, Error> {
    let params: BTreeMap<String, &str> = req
        .params
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v.as_str()))
        .collect();
    let mut buf = serde_json::to_vec(&params).map_err(Error::PayloadEncode)?;
    buf.push(b'\n');
    Ok(Bytes::from(buf))
}

async fn read_body(req: &mut Request) -> Result<Bytes, Error> {
    match req.take_body() {
        Some(body) => body.read_to_end().await.map_err(Error::BodyRead),
        None => Ok(Bytes::new()),
    }
}

#[derive(Serialize)]
struct Identity<'a> {
    #[serde(rename = "userAgent")]
    user_agent: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyRequestContext<'a> {
    path: &'a str,
    protocol: &'a str,
    http_method: &'a str,
    identity: Identity<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyRequestEvent<'a> {
    version: &'static str,
    path: &'a str,
    http_method: &'a str,
    headers: BTreeMap<&'a str, &'a str>,
    multi_value_headers: Option<&'a BTreeMap<String, Vec<String>>>,
    query_string_parameters: BTreeMap<&'a str, &'a str>,
    multi_value_query_string_parameters: Option<&'a BTreeMap<String, Vec<String>>>,
    path_parameters: Option<&'a BTreeMap<String, String>>,
    request_context: ProxyRequestContext<'a>,
    body: String,
}

fn first_values(values: &BTreeMap<String, Vec<String>>) -> BTreeMap<&str, &str> {
    values
        .iter()
        .filter_map(|(k, v)| v.first().map(|first| (k.as_str(), first.as_str())))
        .collect()
}

fn non_empty<K, V>(map: &BTreeMap<K, V>) -> Option<&BTreeMap<K, V>> {
    (!map.is_empty()).then_some(map)
}

async fn from_api_gateway_v1(req: &mut Request) -> Result<Bytes, Error> {
    let body = read_body(req).await?;

    let headers = first_values(&req.headers);
    let user_agent = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("user-agent"))
        .map(|(_, v)| *v)
        .unwrap_or_default();

    let event = ProxyRequestEvent {
        version: "1.0",
        path: &req.path,
        http_method: &req.method,
        multi_value_headers: non_empty(&req.headers),
        query_string_parameters: first_values(&req.query),
        multi_value_query_string_parameters: non_empty(&req.query),
        path_parameters: non_empty(&req.params),
        request_context: ProxyRequestContext {
            path: &req.path,
            protocol: req.url.scheme_str().unwrap_or_default(),
            http_method: &req.method,
            identity: Identity { user_agent },
        },
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };

    serde_json::to_vec(&event)
        .map(Bytes::from)
        .map_err(Error::PayloadEncode)
}
