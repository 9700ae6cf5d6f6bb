// Configuration, counters and the event trace shared by the binary and the library.
pub mod config;
pub mod events;
pub mod metrics;
