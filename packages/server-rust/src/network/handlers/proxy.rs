//! Forwards `/api/{service}/{*path}` to the service over the bridge.
//!
//! Verb, path, headers and body go out verbatim; the reply's status, headers
//! and body come back verbatim. Only failures of the call itself are
//! answered here.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::json;
use topicrpc_core::Headers;
use tracing::warn;

use super::AppState;
use crate::bridge::CallError;

/// Handles `/api/{service}/{*path}`.
pub async fn proxy_handler(
    State(state): State<AppState>,
    Path((service, path)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(&state, &service, &format!("/{path}"), &method, &headers, body).await
}

/// Handles `/api/{service}` and `/api/{service}/` as the service root.
pub async fn proxy_root_handler(
    State(state): State<AppState>,
    Path(service): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    forward(&state, &service, "/", &method, &headers, body).await
}

async fn forward(
    state: &AppState,
    service: &str,
    path: &str,
    method: &Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Response {
    if !state.shutdown.is_accepting() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Gateway is not accepting requests");
    }
    let _in_flight = state.shutdown.in_flight_guard();

    let result = state
        .gateway
        .request(
            service,
            method.as_str(),
            path,
            envelope_headers(headers),
            body.to_vec(),
        )
        .await;

    match result {
        Ok(reply) => relay(reply),
        Err(e) => {
            warn!(service, path, error = %e, "bridge call failed");
            call_error_response(&e)
        }
    }
}

/// Flattens an HTTP header map; repeated headers are joined with `,`.
fn envelope_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        out.insert(name.as_str().to_string(), joined);
    }
    out
}

fn relay(reply: topicrpc_core::Response) -> Response {
    let (status, headers, body) = reply.into_parts();
    let Ok(status) = StatusCode::from_u16(status) else {
        warn!(status, "service replied with an invalid status code");
        return error_response(StatusCode::BAD_GATEWAY, "Service replied with an invalid status");
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = %name, "dropping unrepresentable reply header"),
        }
    }
    response
}

fn call_error_response(error: &CallError) -> Response {
    match error {
        CallError::UnknownService(service) => {
            error_response(StatusCode::NOT_FOUND, &format!("Unknown service: {service}"))
        }
        CallError::Timeout { .. } => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            &format!("Service communication error: {error}"),
        ),
        CallError::Transport(_) | CallError::MalformedMessage(_) => error_response(
            StatusCode::BAD_GATEWAY,
            &format!("Service communication error: {error}"),
        ),
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BrokerError;

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/plain"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert("x-one", HeaderValue::from_static("1"));

        let flat = envelope_headers(&headers);
        assert_eq!(flat["accept"], "text/plain,application/json");
        assert_eq!(flat["x-one"], "1");
    }

    #[test]
    fn reply_is_relayed_verbatim() {
        let request = topicrpc_core::Request::builder("GET", "/").build();
        let reply = topicrpc_core::Response::reply(&request, 201)
            .with_header("Content-Type", "application/json")
            .with_header("X-Trace", "t1")
            .with_body(b"{\"id\":1}".to_vec());

        let response = relay(reply);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(response.headers()["x-trace"], "t1");
    }

    #[test]
    fn invalid_status_becomes_bad_gateway() {
        let request = topicrpc_core::Request::builder("GET", "/").build();
        let response = relay(topicrpc_core::Response::reply(&request, 42));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn call_errors_map_to_statuses() {
        let cases = [
            (CallError::UnknownService("x".into()), StatusCode::NOT_FOUND),
            (
                CallError::Timeout {
                    service: "x".into(),
                    timeout: std::time::Duration::from_secs(30),
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                CallError::Transport(BrokerError::Closed),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(call_error_response(&error).status(), status);
        }
    }
}
