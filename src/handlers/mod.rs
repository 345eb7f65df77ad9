//! HTTP/RPC surface (spec §6).

pub mod http;

pub use http::router;
