extern crate serde;
extern crate serde_json;

pub mod config;
pub mod index_db;
pub mod jobs;
pub mod logging;
pub mod server;
pub mod utils;
