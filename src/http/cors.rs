//! CORS policy
//!
//! Browsers pre-flight cross-origin POST and DELETE calls; the same headers
//! are attached to every response so the actual call is accepted too.

use hyper::http::response::Builder;

use crate::config::HttpConfig;

const ALLOW_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization";
const MAX_AGE: &str = "3600";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsPolicy {
    enabled: bool,
    allow_origin: String,
}

impl CorsPolicy {
    pub fn from_config(http: &HttpConfig) -> Self {
        Self {
            enabled: http.enable_cors,
            allow_origin: http.cors_allow_origin.clone(),
        }
    }

    /// Headers sent with every response
    pub fn apply(&self, builder: Builder) -> Builder {
        if !self.enabled {
            return builder;
        }
        let builder = builder.header("Access-Control-Allow-Origin", self.allow_origin.as_str());
        if self.allow_origin == "*" {
            builder
        } else {
            builder.header("Vary", "Origin")
        }
    }

    /// Extra headers only meaningful on a pre-flight reply
    pub fn apply_preflight(&self, builder: Builder) -> Builder {
        if !self.enabled {
            return builder;
        }
        self.apply(builder)
            .header("Access-Control-Allow-Methods", ALLOW_METHODS)
            .header("Access-Control-Allow-Headers", ALLOW_HEADERS)
            .header("Access-Control-Max-Age", MAX_AGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Response;

    fn policy(enabled: bool, origin: &str) -> CorsPolicy {
        CorsPolicy {
            enabled,
            allow_origin: origin.to_string(),
        }
    }

    #[test]
    fn test_disabled_policy_adds_nothing() {
        let response = policy(false, "*")
            .apply_preflight(Response::builder())
            .body(())
            .unwrap();
        assert!(response.headers().is_empty());
    }

    #[test]
    fn test_wildcard_origin() {
        let response = policy(true, "*").apply(Response::builder()).body(()).unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
        assert!(response.headers().get("vary").is_none());
    }

    #[test]
    fn test_preflight_headers() {
        let response = policy(true, "https://app.example.com")
            .apply_preflight(Response::builder())
            .body(())
            .unwrap();
        let headers = response.headers();
        assert_eq!(
            headers["access-control-allow-origin"],
            "https://app.example.com"
        );
        assert_eq!(headers["vary"], "Origin");
        assert_eq!(headers["access-control-allow-methods"], ALLOW_METHODS);
        assert_eq!(headers["access-control-max-age"], MAX_AGE);
    }
}
