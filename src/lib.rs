pub mod access;
pub mod concurrency;
pub mod config;
pub mod database;
pub mod storage;
pub mod transaction;
