//! HTTP protocol layer module
//!
//! Response builders and the CORS policy, decoupled from request routing.

mod cors;
pub mod response;

// Re-export commonly used types
pub use cors::CorsPolicy;
pub use response::{build_413_response, build_json_response, build_options_response};
