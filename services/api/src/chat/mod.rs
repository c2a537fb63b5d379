//! Mentoring chat: persistence, live fan-out and the WebSocket endpoint

pub mod hub;
pub mod service;
pub mod ws;

pub use hub::ChatHub;
pub use service::ChatService;
