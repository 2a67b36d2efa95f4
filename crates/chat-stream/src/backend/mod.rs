//! Chat job API transports.

pub mod http;

pub use http::HttpChatBackend;
