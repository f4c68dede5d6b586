//! HTTP response building module
//!
//! Builders for the JSON envelope replies and the few transport-level
//! replies the function produces.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::CorsPolicy;

/// Build a JSON response
pub fn build_json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
    cors: &CorsPolicy,
    server_name: &str,
) -> Response<Full<Bytes>> {
    let json = match serde_json::to_vec(body) {
        Ok(j) => j,
        Err(e) => {
            log_error(&format!("Failed to serialize response: {e}"));
            return build_text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
                cors,
                server_name,
            );
        }
    };

    cors.apply(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .header("Server", server_name)
        .body(Full::new(Bytes::from(json)))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build OPTIONS response (preflight request)
pub fn build_options_response(cors: &CorsPolicy, server_name: &str) -> Response<Full<Bytes>> {
    cors.apply_preflight(Response::builder())
        .status(StatusCode::NO_CONTENT)
        .header("Allow", "GET, POST, DELETE, OPTIONS")
        .header("Server", server_name)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("OPTIONS", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 413 Payload Too Large response
pub fn build_413_response(cors: &CorsPolicy, server_name: &str) -> Response<Full<Bytes>> {
    build_text_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        "413 Payload Too Large",
        cors,
        server_name,
    )
}

fn build_text_response(
    status: StatusCode,
    text: &'static str,
    cors: &CorsPolicy,
    server_name: &str,
) -> Response<Full<Bytes>> {
    cors.apply(Response::builder())
        .status(status)
        .header("Content-Type", "text/plain")
        .header("Server", server_name)
        .body(Full::new(Bytes::from(text)))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            Response::new(Full::new(Bytes::from(text)))
        })
}

fn log_error(message: &str) {
    crate::logger::log_error(message);
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    log_error(&format!("Failed to build {status} response: {error}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use http_body_util::BodyExt;

    fn cors() -> CorsPolicy {
        CorsPolicy::from_config(&HttpConfig {
            server_name: "api-bigquery".to_string(),
            enable_cors: true,
            cors_allow_origin: "*".to_string(),
            max_body_size: 1024,
        })
    }

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_json_response() {
        let response = build_json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({"err": "Dataset name required."}),
            &cors(),
            "api-bigquery",
        );
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(response.headers()["server"], "api-bigquery");
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert_eq!(body_text(response).await, r#"{"err":"Dataset name required."}"#);
    }

    #[tokio::test]
    async fn test_options_response_is_empty() {
        let response = build_options_response(&cors(), "api-bigquery");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response
            .headers()
            .contains_key("access-control-allow-methods"));
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn test_413_response() {
        let response = build_413_response(&cors(), "api-bigquery");
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body_text(response).await, "413 Payload Too Large");
    }
}
