mod connection;
mod migrations;
pub mod queries;

pub use connection::Database;
