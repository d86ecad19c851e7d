// Cross-chain settlement: route table, bridge client, and the polling orchestrator
pub mod bridge;
pub mod http;
pub mod orchestrator;
pub mod routes;
pub mod signal;

pub use bridge::{BridgeClient, FeeEstimate, FulfillmentReceipt, FulfillmentSource, IntentParams};
pub use http::{HttpBridgeClient, HttpFulfillmentSource};
pub use orchestrator::{PollOptions, PollProgress, ResolvedSettlement, SettlementOrchestrator};
pub use routes::{Route, RouteTable};
pub use signal::Signal;
