pub mod common;
pub mod config;
pub mod fee;
pub mod interface;
pub mod manager;
pub mod protocol;
pub mod task;
pub mod testing;
pub mod trade;
