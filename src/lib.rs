//! Cli/daemon that classifies window activity through user-defined rules,
//! tracks focus sessions, and interrupts distractions while a focus session is
//! running. Everything is stored in plain files, no runtime or database
//! required.

pub mod cli;
pub mod engine;
pub mod fs;
pub mod storage;
pub mod utils;
