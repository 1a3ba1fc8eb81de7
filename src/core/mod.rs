pub mod error;
pub mod types;
pub mod value;

pub use error::{EntityError, Result};
pub use types::{
    Cardinality, EntityId, FieldItem, FieldItemList, LANGCODE_NOT_SPECIFIED, RevisionId,
    normalize_items, validate_machine_name,
};
pub use value::{DataType, Value};
