//! tagperm - vCenter tag-to-permission reconciliation library
//!
//! This library exposes the rule model, the inventory abstraction and the
//! reconciliation engine that assigns tags and permissions from CSV rules.

pub mod config;
pub mod constants;
pub mod decision;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod output;
pub mod planner;
pub mod reconcile;
pub mod rules;
pub mod tags;
