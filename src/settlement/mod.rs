// Settlement bundle engine
pub mod adjustments;
pub mod builder;
pub mod engine;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod query;
pub mod store;
pub mod totals;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{EngineConfig, SettlementEngine};
pub use store::SettlementStore;
