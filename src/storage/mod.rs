// Paid uploads: pricing, upload metadata, and the debit-then-store flow
pub mod models;
pub mod pricing;
pub mod repository;
pub mod uploads;

pub use models::{UploadOutcome, UploadRecord, UploadStatus};
pub use pricing::{LinearPricing, StorageCostModel};
pub use repository::{MemoryUploadStore, PgUploadStore, UploadStore};
pub use uploads::{RefundPolicy, UploadService};
