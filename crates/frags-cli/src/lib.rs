//! Frags CLI: command implementations shared by the `frags` binary and its tests.

pub mod commands;
