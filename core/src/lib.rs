#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod http;
pub mod labels;

pub use labels::{is_detected, Label, LABELS};
