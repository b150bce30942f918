// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for OIC CLI

pub mod config;
pub mod optimize;
pub mod run;

pub use self::config::ConfigCommand;
pub use self::optimize::OptimizeArgs;
pub use self::run::RunArgs;
