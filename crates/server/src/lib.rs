//! HTTP API for the policy QA engine
//!
//! Routes, input sanitation and component bootstrap. Transport-level
//! concerns only; all pipeline behavior lives in the engine crate.

pub mod http;
pub mod sanitize;
pub mod state;

pub use http::create_router;
pub use state::{build_engine, AppState};
