//! ClickHouse target adapter: table lifecycle management and the insert,
//! watermark, and key/hash lookup queries the engine crate drives.

mod adapter;
mod ddl;
mod insert;

pub use adapter::{ClickHouseTarget, TargetAdapter, TargetHandle};
pub use ddl::{EngineChoice, OrderByChoice};
pub use insert::PreparedRow;
