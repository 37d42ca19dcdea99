pub mod admin;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod persistence;
pub mod wire;
pub mod worker;

pub use error::{Error, Result};
