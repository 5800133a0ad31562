pub mod classifier;
pub mod config;
pub mod deployment;
pub mod events;
pub mod evidence;
pub mod holders;
pub mod monitor;
pub mod notifier;
pub mod poller;
pub mod pools;
pub mod repository;
pub mod report;
pub mod resolver;
pub mod rpc;
