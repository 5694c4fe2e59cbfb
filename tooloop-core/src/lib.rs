//! Core contracts for the tool-calling loop: capabilities, results, disclosure nodes and the replan signal.

pub mod capability;
pub mod config;
pub mod disclosure;
pub mod error;
pub mod replan;
pub mod transcript;
pub mod turn;
