pub mod bootstrap;
pub mod config;
pub mod error;
pub mod funding;
pub mod ledger;
pub mod session;
pub mod settlement;
pub mod storage;

#[cfg(test)]
pub mod testing;

pub use bootstrap::AppState;
pub use config::Config;
pub use error::{AppError, AppResult};
