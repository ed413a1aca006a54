#![cfg_attr(not(test), forbid(unsafe_code))]
#![deny(clippy::pedantic)]

//! Models and configuration shared by the `MatchIT` realtime library and CLI.

pub mod config;
pub mod models;
