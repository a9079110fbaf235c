//! # Payload Frames
//!
//! The bodies of invocation requests and responses.
//!
//! ## Layout
//! - **Request**: transaction descriptor, then one object per declared parameter,
//!   then a packed attachment count followed by `(key, value)` object pairs.
//! - **Response**: the result object, then the attachments in the same form.
//!
//! ## Invariants
//! - **Drained**: Decoding consumes the whole body; trailing bytes are an error.
//! - **Ordered**: Attachments keep insertion order on the wire.

use std::collections::HashMap;

use tunpack::Marshaller;
use tunpack::Unmarshaller;
use tunpack::Value;
use tunpack::packed::read_packed;
use tunpack::packed::write_packed;

use crate::Error;
use crate::Result;
use crate::TransactionDescriptor;

/// Insertion-ordered string-keyed context carried alongside an invocation.
///
/// Entries live in a `Vec` for wire order; `index` maps each key to its slot so
/// lookups and replacing inserts stay O(1) however many entries a peer sends.
#[derive(Clone, Default)]
pub struct Attachments {
    entries: Vec<(String, Value)>,
    index: HashMap<String, usize>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing an existing entry in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        if let Some(&slot) = self.index.get(&key) {
            return Some(std::mem::replace(&mut self.entries[slot].1, value));
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.index.get(key).map(|&slot| &self.entries[slot].1)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let slot = self.index.remove(key)?;
        let (_, value) = self.entries.remove(slot);
        for later in self.index.values_mut().filter(|s| **s > slot) {
            *later -= 1;
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to(&self, out: &mut dyn Marshaller) -> Result<()> {
        let count = u32::try_from(self.entries.len())
            .map_err(|_| Error::ProtocolViolation("too many attachments".into()))?;
        write_packed(out, count)?;
        for (key, value) in &self.entries {
            out.write_object(&Value::String(key.clone()))?;
            out.write_object(value)?;
        }
        Ok(())
    }

    pub fn read_from(input: &mut dyn Unmarshaller) -> Result<Self> {
        let count = read_packed(input)?;
        let mut attachments = Self::new();
        for _ in 0..count {
            let key = match input.read_object()? {
                Value::String(key) => key,
                other => {
                    return Err(Error::ProtocolViolation(format!("attachment key is not a string: {:?}", other)));
                }
            };
            let value = input.read_object()?;
            attachments.insert(key, value);
        }
        Ok(attachments)
    }
}

impl std::fmt::Debug for Attachments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl PartialEq for Attachments {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl FromIterator<(String, Value)> for Attachments {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut attachments = Self::new();
        for (k, v) in iter {
            attachments.insert(k, v);
        }
        attachments
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InvocationRequest {
    pub transaction: Option<TransactionDescriptor>,
    pub parameters: Vec<Value>,
    pub attachments: Attachments,
}

impl InvocationRequest {
    pub fn encode(&self, out: &mut dyn Marshaller) -> Result<()> {
        TransactionDescriptor::write_optional(out, self.transaction.as_ref())?;
        for parameter in &self.parameters {
            out.write_object(parameter)?;
        }
        self.attachments.write_to(out)
    }

    /// Reads a request body declaring `parameter_count` parameters, to the end.
    pub fn decode(input: &mut dyn Unmarshaller, parameter_count: usize) -> Result<Self> {
        let transaction = TransactionDescriptor::read_optional(input)?;
        let mut parameters = Vec::with_capacity(parameter_count.min(64));
        for _ in 0..parameter_count {
            parameters.push(input.read_object()?);
        }
        let attachments = Attachments::read_from(input)?;
        input.finish()?;
        Ok(Self { transaction, parameters, attachments })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationResponse {
    pub result: Value,
    pub attachments: Attachments,
}

impl InvocationResponse {
    pub fn encode(&self, out: &mut dyn Marshaller) -> Result<()> {
        out.write_object(&self.result)?;
        self.attachments.write_to(out)
    }

    pub fn decode(input: &mut dyn Unmarshaller) -> Result<Self> {
        let result = input.read_object()?;
        let attachments = Attachments::read_from(input)?;
        input.finish()?;
        Ok(Self { result, attachments })
    }
}
