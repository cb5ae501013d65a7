//! Client-side server-state cache and mutation coordination for the exam
//! management dashboard.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
