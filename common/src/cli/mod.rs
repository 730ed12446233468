//! Command-line policy shared by the agent binaries.

mod color;

pub use color::ColorWhen;
