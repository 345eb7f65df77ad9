//! Subscriber Transport (C7): WebSocket session protocol and the
//! per-subscriber broadcast fan-out it rides on.

pub mod broadcast;
pub mod ws;

pub use ws::events_handler;
