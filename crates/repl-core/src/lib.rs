//! Shared types, configuration, and error taxonomy for the replication
//! engine. Every other workspace crate depends on this one.

pub mod config;
pub mod error;
pub mod ident;
pub mod types;

pub use config::{AuthMode, ReplConfig, Secret, SourceConfig, TargetConfig, TlsMode};
pub use error::{ReplError, ReplResult};
pub use ident::sanitize_identifier;
pub use types::{
    build_column_mappings, ChangeClassification, Column, ColumnMapping, ColumnType, Row,
    SourceType, SourceTypeFamily, Strategy, TableIdent, TableSpec, Value, Watermark,
};
