// Common library for the trigger checker: scheduling engine, storage and telemetry

pub mod cache;
pub mod checker;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod remote;
pub mod storage;
pub mod supervisor;
pub mod telemetry;
