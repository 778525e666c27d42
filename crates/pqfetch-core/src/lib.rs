pub mod batch;
pub mod config;
pub mod control;
pub mod driver;
pub mod engine;
pub mod fetch;
pub mod lifecycle;
pub mod logging;
pub mod progress;
pub mod record_store;
pub mod retry;
pub mod storage;
pub mod url_model;
