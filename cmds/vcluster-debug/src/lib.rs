pub mod archive;
pub mod collect;
pub mod commands;
pub mod config;
pub mod k8s;
pub mod poll;
pub mod resources;
pub mod telemetry;
