pub mod classifier;
pub mod config;
pub mod routes;
pub mod storage;
