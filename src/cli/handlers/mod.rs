// src/cli/handlers/mod.rs

// Bodies of the built-in leaves. Every handler receives the arguments left
// after its command path and returns the exit code.

pub mod commons;
pub mod config;
pub mod dep;
pub mod env;
pub mod telemetry;
