//! # Tunpack
//!
//! A small, bounded object marshalling codec for tunnelled invocations.
//!
//! ## Philosophy
//!
//! - **Opaque Values**: The codec moves a closed `Value` model. It knows nothing
//!   about invocations, transactions or HTTP.
//! - **Gated Types**: Every named type (`Object` classes and `Proxy` interfaces)
//!   passes through a `ClassResolver` before it is materialised. A resolver can
//!   refuse a name, and that refusal is a distinct error kind.
//! - **Raw Primitives**: Protocol framing (ints, bytes, packed integers) is
//!   written untagged next to tagged objects, so frames stay compact.
//!
//! ## Format
//!
//! - **Raw int**: `[i32 BE]`
//! - **Objects**: `[Tag: 1b][Body]`
//! - **Blobs**: `[Tag: 1b][Len: u32 BE][Data: Len]`
//! - **Named types**: `[Tag][NameLen][Name]...` where the name is resolved on read.

pub mod pack;
pub mod packed;
pub mod resolver;
pub mod table;

pub use pack::PackFactory;
pub use pack::PackMarshaller;
pub use pack::PackUnmarshaller;
pub use resolver::ClassResolver;
pub use resolver::DefaultClassResolver;
pub use resolver::FilteringClassResolver;
pub use table::EmptyObjectTable;
pub use table::ObjectTable;

use std::sync::Arc;


/// Tunpack marshalling and unmarshalling errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// Blob or container length exceeds `u32::MAX`.
    TooLarge(usize),
    /// A packed integer ran past five bytes.
    PackedIntegerOverflow,
    /// The nested depth of the value exceeded the safety limit.
    RecursionLimitExceeded,
    /// An object table reference pointed at no entry.
    UnknownTableEntry(u8),
    /// The resolver refused to materialise this type name.
    RejectedClass(String),
    /// The resolver does not know this type name.
    ClassNotFound(String),
    /// `finish` was called with unread input left over.
    TrailingBytes(usize),
}

impl Error {
    /// True when decoding stopped because a type was refused by a resolver filter,
    /// as opposed to the payload being malformed.
    pub fn is_security(&self) -> bool {
        matches!(self, Error::RejectedClass(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "Invalid Tag byte: {:#04x}", b),
            Error::TooLarge(n) => write!(f, "Length {} exceeds u32::MAX", n),
            Error::UnknownTableEntry(i) => write!(f, "Unknown object table entry {}", i),
            Error::RejectedClass(name) => write!(f, "Cannot resolve filtered class {}", name),
            Error::ClassNotFound(name) => write!(f, "Class not found: {}", name),
            Error::TrailingBytes(n) => write!(f, "{} unread bytes after end of stream", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for Tunpack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Identifies the type of an encoded object.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Null = 0x01,
    BoolTrue = 0x02,
    BoolFalse = 0x03,
    Int = 0x04,
    Long = 0x05,
    Double = 0x06,

    // Blobs (Tag + u32 Len + Bytes)
    String = 0x10,
    Bytes = 0x11,

    // Containers (Tag + u32 Count + Items)
    List = 0x20,

    // Named types (resolved on read)
    Object = 0x30,
    Proxy = 0x31,

    // Object table reference (Tag + u8 Index)
    TableRef = 0x40,
}

impl Tag {
    /// Returns the Tag variant for a given byte, or `None` if invalid.
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::Null),
            0x02 => Some(Tag::BoolTrue),
            0x03 => Some(Tag::BoolFalse),
            0x04 => Some(Tag::Int),
            0x05 => Some(Tag::Long),
            0x06 => Some(Tag::Double),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x20 => Some(Tag::List),
            0x30 => Some(Tag::Object),
            0x31 => Some(Tag::Proxy),
            0x40 => Some(Tag::TableRef),
            _ => None,
        }
    }
}

/// The opaque object model carried by the codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// A named structured value. `class` is checked by the resolver on read.
    Object { class: String, fields: Vec<(String, Value)> },
    /// A dynamic proxy. Every interface name is checked by the resolver on read.
    Proxy { interfaces: Vec<String>, handler: Box<Value> },
}

impl Value {
    /// Convenience constructor for a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Convenience constructor for an object value.
    pub fn object(class: impl Into<String>, fields: Vec<(String, Value)>) -> Self {
        Value::Object { class: class.into(), fields }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Looks up a field on an `Object` value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object { fields, .. } => fields.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// The class name of an `Object` value.
    pub fn class(&self) -> Option<&str> {
        match self {
            Value::Object { class, .. } => Some(class),
            _ => None,
        }
    }
}

/// Writes objects and raw primitives into an output stream.
///
/// A marshaller is single-use: `finish` consumes it and yields the bytes.
pub trait Marshaller: Send {
    fn write_object(&mut self, value: &Value) -> Result<()>;
    fn write_byte(&mut self, b: u8) -> Result<()>;
    /// Writes a raw big-endian i32.
    fn write_int(&mut self, v: i32) -> Result<()>;
    /// Writes raw bytes with no length prefix.
    fn write_bytes(&mut self, b: &[u8]) -> Result<()>;
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Reads objects and raw primitives from an input stream.
pub trait Unmarshaller: Send {
    fn read_object(&mut self) -> Result<Value>;
    fn read_byte(&mut self) -> Result<u8>;
    /// Reads a raw big-endian i32.
    fn read_int(&mut self) -> Result<i32>;
    /// Reads exactly `len` raw bytes.
    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>>;
    /// Ends the stream. Fails with `Error::TrailingBytes` if input remains.
    fn finish(&mut self) -> Result<()>;
}

/// Creates marshaller/unmarshaller pairs bound to a resolver and object table.
///
/// Each call yields a fresh instance; instances are never shared between invocations.
pub trait MarshallerFactory: Send + Sync + 'static {
    fn create_marshaller(
        &self,
        resolver: Arc<dyn ClassResolver>,
        table: Arc<dyn ObjectTable>,
    ) -> Box<dyn Marshaller>;

    fn create_unmarshaller(
        &self,
        resolver: Arc<dyn ClassResolver>,
        table: Arc<dyn ObjectTable>,
        input: Vec<u8>,
    ) -> Box<dyn Unmarshaller>;
}
