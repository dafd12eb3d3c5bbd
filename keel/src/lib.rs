#![deny(
    clippy::expect_used,
    clippy::panic,
    clippy::print_stdout,
    clippy::todo,
    clippy::unimplemented,
    clippy::unwrap_used
)]

pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod response;
pub mod schema;
pub mod server;
pub mod supervisor;
pub mod validate;
