pub mod agent;
pub mod config;
pub mod controller;
pub mod cycle;
pub mod dispatch;
pub mod errors;
pub mod failure;
pub mod learning;
pub mod manifest;
pub mod memory;
pub mod objective;
pub mod strategy;
pub mod tend_config;
pub mod tracker;
pub mod ui;
