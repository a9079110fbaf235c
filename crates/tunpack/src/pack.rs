//! # Pack Codec
//!
//! The bundled `Marshaller`/`Unmarshaller` implementation.
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Recursion Safety**: Nesting is bounded by `MAX_RECURSION_DEPTH` in both directions.
//! - **Resolve First**: Named types are resolved before their bodies are read, so a
//!   refused type stops decoding before any of its contents are materialised.

use std::sync::Arc;

use crate::ClassResolver;
use crate::Error;
use crate::Marshaller;
use crate::MarshallerFactory;
use crate::ObjectTable;
use crate::Result;
use crate::Tag;
use crate::Unmarshaller;
use crate::Value;

/// The maximum nesting depth for Values before failing.
const MAX_RECURSION_DEPTH: usize = 64;

/// Creates `PackMarshaller` and `PackUnmarshaller` instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackFactory;

impl MarshallerFactory for PackFactory {
    fn create_marshaller(
        &self,
        resolver: Arc<dyn ClassResolver>,
        table: Arc<dyn ObjectTable>,
    ) -> Box<dyn Marshaller> {
        Box::new(PackMarshaller::new(resolver, table))
    }

    fn create_unmarshaller(
        &self,
        resolver: Arc<dyn ClassResolver>,
        table: Arc<dyn ObjectTable>,
        input: Vec<u8>,
    ) -> Box<dyn Unmarshaller> {
        Box::new(PackUnmarshaller::new(resolver, table, input))
    }
}

pub struct PackMarshaller {
    buf: Vec<u8>,
    resolver: Arc<dyn ClassResolver>,
    table: Arc<dyn ObjectTable>,
}

impl PackMarshaller {
    pub fn new(resolver: Arc<dyn ClassResolver>, table: Arc<dyn ObjectTable>) -> Self {
        Self { buf: Vec::with_capacity(256), resolver, table }
    }

    fn tag(&mut self, tag: Tag) {
        self.buf.push(tag as u8);
    }

    fn len(&mut self, n: usize) -> Result<()> {
        let n = u32::try_from(n).map_err(|_| Error::TooLarge(n))?;
        self.buf.extend_from_slice(&n.to_be_bytes());
        Ok(())
    }

    fn name(&mut self, name: &str) -> Result<()> {
        self.len(name.len())?;
        self.buf.extend_from_slice(name.as_bytes());
        Ok(())
    }

    fn write_value(&mut self, value: &Value, depth: usize) -> Result<()> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }

        if let Some(index) = self.table.index_of(value) {
            self.tag(Tag::TableRef);
            self.buf.push(index);
            return Ok(());
        }

        match value {
            Value::Null => self.tag(Tag::Null),
            Value::Bool(true) => self.tag(Tag::BoolTrue),
            Value::Bool(false) => self.tag(Tag::BoolFalse),
            Value::Int(v) => {
                self.tag(Tag::Int);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Long(v) => {
                self.tag(Tag::Long);
                self.buf.extend_from_slice(&v.to_be_bytes());
            }
            Value::Double(v) => {
                self.tag(Tag::Double);
                self.buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            Value::String(s) => {
                self.tag(Tag::String);
                self.name(s)?;
            }
            Value::Bytes(b) => {
                self.tag(Tag::Bytes);
                self.len(b.len())?;
                self.buf.extend_from_slice(b);
            }
            Value::List(items) => {
                self.tag(Tag::List);
                self.len(items.len())?;
                for item in items {
                    self.write_value(item, depth + 1)?;
                }
            }
            Value::Object { class, fields } => {
                self.tag(Tag::Object);
                let wire_name = self.resolver.annotate_class(class);
                self.name(&wire_name)?;
                self.len(fields.len())?;
                for (key, field) in fields {
                    self.name(key)?;
                    self.write_value(field, depth + 1)?;
                }
            }
            Value::Proxy { interfaces, handler } => {
                self.tag(Tag::Proxy);
                self.len(interfaces.len())?;
                for iface in interfaces {
                    let wire_name = self.resolver.annotate_class(iface);
                    self.name(&wire_name)?;
                }
                self.write_value(handler, depth + 1)?;
            }
        }
        Ok(())
    }
}

impl Marshaller for PackMarshaller {
    fn write_object(&mut self, value: &Value) -> Result<()> {
        self.write_value(value, 0)
    }

    fn write_byte(&mut self, b: u8) -> Result<()> {
        self.buf.push(b);
        Ok(())
    }

    fn write_int(&mut self, v: i32) -> Result<()> {
        self.buf.extend_from_slice(&v.to_be_bytes());
        Ok(())
    }

    fn write_bytes(&mut self, b: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(b);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        Ok(self.buf)
    }
}

pub struct PackUnmarshaller {
    buf: Vec<u8>,
    pos: usize,
    resolver: Arc<dyn ClassResolver>,
    table: Arc<dyn ObjectTable>,
}

impl PackUnmarshaller {
    pub fn new(resolver: Arc<dyn ClassResolver>, table: Arc<dyn ObjectTable>, input: Vec<u8>) -> Self {
        Self { buf: input, pos: 0, resolver, table }
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&[u8]> {
        if n > self.remaining() {
            return Err(Error::UnexpectedEnd);
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn len(&mut self) -> Result<usize> {
        Ok(u32::from_be_bytes(self.take_array()?) as usize)
    }

    fn name(&mut self) -> Result<String> {
        let len = self.len()?;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| Error::InvalidUtf8)
    }

    fn read_value(&mut self, depth: usize) -> Result<Value> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded);
        }

        let b = self.take_array::<1>()?[0];
        let tag = Tag::from_u8(b).ok_or(Error::InvalidTag(b))?;

        let value = match tag {
            Tag::Null => Value::Null,
            Tag::BoolTrue => Value::Bool(true),
            Tag::BoolFalse => Value::Bool(false),
            Tag::Int => Value::Int(i32::from_be_bytes(self.take_array()?)),
            Tag::Long => Value::Long(i64::from_be_bytes(self.take_array()?)),
            Tag::Double => Value::Double(f64::from_bits(u64::from_be_bytes(self.take_array()?))),
            Tag::String => Value::String(self.name()?),
            Tag::Bytes => {
                let len = self.len()?;
                Value::Bytes(self.take(len)?.to_vec())
            }
            Tag::List => {
                let count = self.len()?;
                // each item is at least one byte, so a count past the input is malformed
                if count > self.remaining() {
                    return Err(Error::UnexpectedEnd);
                }
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value(depth + 1)?);
                }
                Value::List(items)
            }
            Tag::Object => {
                let wire_name = self.name()?;
                let class = self.resolver.resolve_class(&wire_name)?;
                let count = self.len()?;
                if count > self.remaining() {
                    return Err(Error::UnexpectedEnd);
                }
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.name()?;
                    let field = self.read_value(depth + 1)?;
                    fields.push((key, field));
                }
                Value::Object { class, fields }
            }
            Tag::Proxy => {
                let count = self.len()?;
                if count > self.remaining() {
                    return Err(Error::UnexpectedEnd);
                }
                let mut wire_names = Vec::with_capacity(count);
                for _ in 0..count {
                    wire_names.push(self.name()?);
                }
                let interfaces = self.resolver.resolve_proxy(&wire_names)?;
                let handler = Box::new(self.read_value(depth + 1)?);
                Value::Proxy { interfaces, handler }
            }
            Tag::TableRef => {
                let index = self.take_array::<1>()?[0];
                self.table.value_at(index).ok_or(Error::UnknownTableEntry(index))?
            }
        };
        Ok(value)
    }
}

impl Unmarshaller for PackUnmarshaller {
    fn read_object(&mut self) -> Result<Value> {
        self.read_value(0)
    }

    fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    fn read_int(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    fn finish(&mut self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }
}
