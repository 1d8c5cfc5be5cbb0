#[macro_use]
extern crate log;

pub mod config;
pub mod connection;
pub mod dump;
pub mod request;
pub mod server;
