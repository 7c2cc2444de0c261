//! A3S Build CLI - Dockerfile to OCI image layout.

pub mod commands;
pub mod output;
