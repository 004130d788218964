pub mod enhance;
pub mod error;
pub mod handler_utils;
pub mod routes;
pub mod server;
