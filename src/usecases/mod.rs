//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the core's workflows.
//!
//! Use cases:
//! - `DistributionHub`: merge rule, snapshot store and tick fan-out
//! - `AlertEvaluator`: price alerts evaluated inline on the hub loop
//! - `MarketDataService`: query surface over the hub and alert book

pub mod alert_evaluator;
pub mod hub;
pub mod market_data;

pub use alert_evaluator::{AlertBook, AlertEvaluator};
pub use hub::{DistributionHub, HubHandle, HubSettings, InlineSubscriber, Subscription, SubscriptionId};
pub use market_data::MarketDataService;
