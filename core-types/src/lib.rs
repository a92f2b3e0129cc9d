// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Shared instrument/snapshot types, the partition schema, configuration and retry policy
//! for the options snapshot collector.

pub mod config;
pub mod retry;
pub mod schema;
pub mod types;
