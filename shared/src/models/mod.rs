//! Data models shared between the server and its clients

pub mod order;

pub use order::*;
