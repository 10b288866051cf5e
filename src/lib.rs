//! Client core for a remote mod-compatibility analyzer: request sequencing, issue
//! consolidation, report filtering, a replicated session context and the fix guide.

pub mod api;
pub mod app;
pub mod cli;
pub mod config;
pub mod consolidate;
pub mod document;
pub mod error;
pub mod export;
pub mod filter;
pub mod game;
pub mod log;
pub mod modlist;
pub mod report;
pub mod sequencer;
pub mod session;
pub mod storage;
