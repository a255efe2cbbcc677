pub mod config;
pub mod controller;
pub mod fleet;
pub mod geometry;
pub mod logging;
pub mod report;
pub mod vehicle;
