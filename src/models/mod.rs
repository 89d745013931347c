pub mod enums;
pub mod field;
pub mod invoice;
pub mod result;
pub mod batch;

pub use enums::*;
pub use field::{FieldAlternative, TrackedField};
pub use invoice::{ArithmeticCheck, InvoiceHeader, InvoiceItem, InvoiceRecord, InvoiceTotals};
pub use result::{
    Citation, EngineReport, InvoiceResult, PipelineWarning, RunMetadata, ValidationFinding,
};
pub use batch::{BatchEntry, BatchReport, CurrencyTotals, RuleTally};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },
}
