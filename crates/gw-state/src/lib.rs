//! gw-state: Engine state snapshots and the observer bus
//!
//! `EngineState` is a value-typed copy of the live engine at a point in
//! time: consumers hold snapshots as long as they wish without touching
//! live internals. The observer bus delivers snapshots synchronously in
//! subscription order.

mod observer;
mod snapshot;

pub use observer::*;
pub use snapshot::*;
