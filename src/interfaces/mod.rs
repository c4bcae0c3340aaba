//! Edges of the crate: JSON fixtures that script a backend, and the JSON-lines
//! event stream the CLI prints.

pub mod fixture;
pub mod output;
