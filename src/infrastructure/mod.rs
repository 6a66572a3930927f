pub mod config;
pub mod credential_store;
pub mod error;
pub mod room_client;
pub mod session_cache;
