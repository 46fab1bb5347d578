//! Poll visibility and voting engine.
//!
//! Polls are created by authenticated users, are either public or private, and collect at
//! most one vote per voter. Results are always computed from the stored votes.

pub mod app_config;
pub mod db;
pub mod error;
pub mod identity;
pub mod orm;
pub mod polls;
pub mod rate_limit;
pub mod results;
pub mod schema;
pub mod visibility;
pub mod votes;
pub mod web;
