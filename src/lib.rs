pub mod api;
pub mod config;
pub mod engine;
pub mod gateway;
pub mod hours;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod wal;
pub mod webhook;
