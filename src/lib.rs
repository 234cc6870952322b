pub mod app_state;
pub mod capture;
pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod retention;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod upload;
