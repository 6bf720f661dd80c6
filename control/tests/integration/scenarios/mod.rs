//! Test scenarios

pub mod cluster_config;
pub mod fault_tolerance;
pub mod global_rule;
