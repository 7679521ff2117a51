//! Flattening engine: nested documents → typed tabular rows
//!
//! A run is configured once (split path + one [`TableConfig`] per
//! discriminator value) and then applied to batches of documents:
//!
//! 1. the split path picks the table configuration for a document,
//! 2. the table's [`AxisPlan`] says which arrays to explode and which
//!    fields travel together,
//! 3. the [`RowExpander`] enumerates the rows and coerces each cell,
//! 4. rows are accumulated per table into a [`ProcessingResult`].

pub mod path;
pub mod coerce;
pub mod config;
pub mod plan;
pub mod expander;
pub mod processor;
pub mod writer;

pub use path::{PathExpression, Resolved, Step};
pub use coerce::{CellValue, CoerceMode, Coercer, CoercionRules, TypeTag};
pub use config::{Column, FieldSpec, RunConfig, SplitPathSpec, TableConfig, TableConfigs};
pub use plan::{align, AxisGroup, AxisNode, AxisPlan};
pub use expander::{EmptyArrayPolicy, Expansion, Row, RowExpander};
pub use processor::{
    BatchStats, DocumentFailure, JsonProcessor, MetadataColumns, ProcessingResult, ProcessorSettings, RunContext,
    SourceMetadata, Table, TableStats,
};
pub use writer::{StreamWriter, TableFileWriter, TableSink};
