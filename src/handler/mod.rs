//! Request handler module
//!
//! Decodes each request into a warehouse operation and dispatches it.

pub mod request;
pub mod router;

// Re-export main entry point
pub use router::handle_request;
