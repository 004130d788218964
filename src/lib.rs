pub mod api;
pub mod enhance;
pub mod settings;
