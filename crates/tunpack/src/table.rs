//! Object tables: well-known values written as a one-byte reference.

use crate::Value;

/// Substitutes well-known values with a table index on the wire.
pub trait ObjectTable: Send + Sync + 'static {
    /// Returns the table index for `value`, if it is a well-known entry.
    fn index_of(&self, value: &Value) -> Option<u8>;

    /// Returns the value stored at `index`.
    fn value_at(&self, index: u8) -> Option<Value>;
}

/// A table with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyObjectTable;

impl ObjectTable for EmptyObjectTable {
    fn index_of(&self, _value: &Value) -> Option<u8> {
        None
    }

    fn value_at(&self, _index: u8) -> Option<Value> {
        None
    }
}
