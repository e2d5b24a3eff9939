#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub use config::Config;
pub use server::start;

pub mod config;
pub mod explain;
pub mod helpers;
pub mod model;
pub mod overlay;
pub mod pipeline;
pub mod preprocess;
pub mod upload;

mod errors;
mod routes;
mod runner;
mod server;
mod shutdown;
