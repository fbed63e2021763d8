// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Core types shared across the extraction workspace.

pub mod config;
pub mod types;
