//! Library side of the `gridclear` binary: argument definitions and the
//! subcommand handlers, kept here so they can be tested without a process.

pub mod cli;
pub mod commands;
