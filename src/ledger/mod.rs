pub mod memory;
pub mod models;
pub mod postgres;
pub mod repository;
pub mod store;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use repository::Ledger;
pub use store::LedgerStore;
