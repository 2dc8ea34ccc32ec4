pub mod action;
pub mod audit;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod runner;

// Command execution
pub mod executor;

// Status polling + lifecycle
pub mod controller;
pub mod poller;

// Presenter contract
pub mod bridge;
pub mod event;
pub mod intent;
pub mod supervisor;

// Simulated container engine for demo mode and tests
pub mod fake;
