// Crate root library declaration and module exports.
pub mod cli;
pub mod client;
pub mod config;
pub mod context;
pub mod directory;
pub mod jobs;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod notifier;
pub mod poller;
pub mod reconcile;
pub mod runner;
pub mod scheduler;
pub mod storage;
