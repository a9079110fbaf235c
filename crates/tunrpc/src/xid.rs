//! # Transaction Branch Codec
//!
//! Xids and the optional transaction descriptor that prefixes an invocation payload.
//!
//! Wire layout of an Xid, written through any `Marshaller`:
//!
//! ```text
//! format_id:i32 | gtid_len:i32 | gtid | bq_len:i32 | bq
//! ```
//!
//! A descriptor is a marker byte (`0` none, `1` present) followed, when present,
//! by the Xid and the remaining timeout in seconds.

use tunpack::Marshaller;
use tunpack::Unmarshaller;

use crate::Error;
use crate::Result;

pub const MAX_GTRID_SIZE: usize = 64;
pub const MAX_BQUAL_SIZE: usize = 64;

const NO_TRANSACTION: u8 = 0;
const REMOTE_TRANSACTION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    global_id: Vec<u8>,
    branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, global_id: impl Into<Vec<u8>>, branch_qualifier: impl Into<Vec<u8>>) -> Result<Self> {
        let global_id = global_id.into();
        let branch_qualifier = branch_qualifier.into();
        if global_id.len() > MAX_GTRID_SIZE {
            return Err(Error::InvalidXid(format!("global id is {} bytes", global_id.len())));
        }
        if branch_qualifier.len() > MAX_BQUAL_SIZE {
            return Err(Error::InvalidXid(format!("branch qualifier is {} bytes", branch_qualifier.len())));
        }
        Ok(Self { format_id, global_id, branch_qualifier })
    }

    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    pub fn global_id(&self) -> &[u8] {
        &self.global_id
    }

    pub fn branch_qualifier(&self) -> &[u8] {
        &self.branch_qualifier
    }

    pub fn write_to(&self, out: &mut dyn Marshaller) -> Result<()> {
        out.write_int(self.format_id)?;
        write_block(out, &self.global_id)?;
        write_block(out, &self.branch_qualifier)?;
        Ok(())
    }

    pub fn read_from(input: &mut dyn Unmarshaller) -> Result<Self> {
        let format_id = input.read_int()?;
        let global_id = read_block(input, MAX_GTRID_SIZE)?;
        let branch_qualifier = read_block(input, MAX_BQUAL_SIZE)?;
        Ok(Self { format_id, global_id, branch_qualifier })
    }
}

fn write_block(out: &mut dyn Marshaller, bytes: &[u8]) -> Result<()> {
    // lengths are bounded at construction
    out.write_int(bytes.len() as i32)?;
    out.write_bytes(bytes)?;
    Ok(())
}

fn read_block(input: &mut dyn Unmarshaller, max: usize) -> Result<Vec<u8>> {
    let len = input.read_int()?;
    let len = usize::try_from(len)
        .ok()
        .filter(|&n| n <= max)
        .ok_or_else(|| Error::InvalidXid(format!("block length {}", len)))?;
    Ok(input.read_bytes(len)?)
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for b in &self.global_id {
            write!(f, "{:02x}", b)?;
        }
        f.write_str(":")?;
        for b in &self.branch_qualifier {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// The transaction context an invocation runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDescriptor {
    pub xid: Xid,
    pub remaining_timeout: i32,
}

impl TransactionDescriptor {
    pub fn new(xid: Xid, remaining_timeout: i32) -> Self {
        Self { xid, remaining_timeout }
    }

    pub fn write_optional(out: &mut dyn Marshaller, descriptor: Option<&Self>) -> Result<()> {
        match descriptor {
            None => out.write_byte(NO_TRANSACTION)?,
            Some(d) => {
                out.write_byte(REMOTE_TRANSACTION)?;
                d.xid.write_to(out)?;
                out.write_int(d.remaining_timeout)?;
            }
        }
        Ok(())
    }

    pub fn read_optional(input: &mut dyn Unmarshaller) -> Result<Option<Self>> {
        match input.read_byte()? {
            NO_TRANSACTION => Ok(None),
            REMOTE_TRANSACTION => {
                let xid = Xid::read_from(input)?;
                let remaining_timeout = input.read_int()?;
                Ok(Some(Self { xid, remaining_timeout }))
            }
            other => Err(Error::UnknownTransactionMarker(other)),
        }
    }
}
