//! Employee shift scheduling with incremental re-optimization.
//!
//! Assigns employees to shifts under hard, medium and soft constraints,
//! and re-optimizes an already-solved schedule when the workforce changes
//! by pinning everything the change cannot legitimately touch.
//!
//! The crate splits into the domain model ([`domain`]), the score
//! evaluator ([`constraints`]), the solver engine ([`solver`]), the
//! incremental planner ([`continuous`]) and the asynchronous job
//! lifecycle ([`jobs`], [`store`]).

pub mod config;
pub mod constraints;
pub mod continuous;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod score;
pub mod solver;
pub mod store;
