pub mod agent;
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod export;
pub mod load;
pub mod producer;
pub mod sched;
pub mod sink;
pub mod telemetry;
