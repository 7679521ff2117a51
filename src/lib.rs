//! # Rowhouse - JSON Flattening Toolkit
//!
//! Turns streams of nested, semi-structured JSON documents into flat typed
//! tables, and discovers which field tells the document shapes apart.
//!
//! ## Modules
//!
//! - **unfurl**: route documents by a discriminator and explode them into rows
//! - **discover**: find splitter fields and draft table configurations
//! - **input**: decode array-wrapped or line-delimited JSON
//!
//! ## Quick Start
//!
//! ### Flattening
//!
//! ```rust
//! use rowhouse::unfurl::{JsonProcessor, PathExpression, ProcessorSettings, RunContext, TableConfigs};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let tables = TableConfigs::from_value(&json!({
//!     "OrderCreated": {
//!         "table_name": "order_items",
//!         "fields": [
//!             {"source": "body.items[].sku", "alias": "sku", "type": "string"},
//!             {"source": "body.items[].price", "alias": "price", "type": "float", "coerce": true}
//!         ]
//!     }
//! }))?;
//! let processor = JsonProcessor::new(
//!     PathExpression::parse("header.action")?,
//!     tables,
//!     ProcessorSettings::default(),
//! )?;
//!
//! let doc = json!({
//!     "header": {"action": "OrderCreated"},
//!     "body": {"items": [{"sku": "A", "price": "$10.00"}, {"sku": "B", "price": "25%"}]}
//! });
//! let result = processor.process(&[doc], &RunContext::new());
//!
//! // two rows: {sku: "A", price: 10.0} and {sku: "B", price: 0.25}
//! assert_eq!(result.table("order_items").map(|t| t.rows.len()), Some(2));
//! # Ok(())
//! # }
//! ```
//!
//! ### Discovery
//!
//! ```rust
//! use rowhouse::discover::StructureAnalyzer;
//! use serde_json::json;
//!
//! let docs: Vec<_> = (0..10)
//!     .map(|i| if i % 2 == 0 {
//!         json!({"kind": "order", "items": [{"sku": "A"}]})
//!     } else {
//!         json!({"kind": "user", "user": {"name": "x"}})
//!     })
//!     .collect();
//!
//! let candidates = StructureAnalyzer::new().find_splitters(&docs);
//! assert_eq!(candidates[0].field.to_string(), "kind");
//! ```

pub mod error;
pub mod unfurl;
pub mod discover;
pub mod input;

// Re-export commonly used types for convenience
pub use error::{CoerceError, ConfigError, UnfurlError};
pub use unfurl::{
    CellValue, JsonProcessor, PathExpression, ProcessingResult, ProcessorSettings, Row, RunConfig, RunContext,
    TableConfig, TableConfigs, TypeTag,
};
pub use discover::{SplitterCandidate, StructureAnalyzer};
pub use input::{read_documents, InputFormat};
