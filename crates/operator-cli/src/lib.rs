//! # operator-cli
//!
//! Command-line interface for the AI operator.
//!
//! ## Commands
//!
//! - `operator models` — list, import, set-default, remove registry rows
//! - `operator select` — show the tools a query would be offered (`--explain`)
//! - `operator chat` — run turns through the operator, one-shot or interactive
//! - `operator memory` — show a subject's memory context, edit core memory
//! - `operator image` / `operator video` — media generation through the bridge
//! - `operator config` — show or validate configuration

pub mod commands;

pub use commands::Cli;
