// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod config;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod manager;
pub mod provider;
pub mod run;
pub mod single_flight;
pub mod state;
pub mod store;
