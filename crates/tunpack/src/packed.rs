//! Packed integers: 7-bit groups, least significant first, high bit set on
//! every byte except the last.

use crate::Error;
use crate::Marshaller;
use crate::Result;
use crate::Unmarshaller;

/// A u32 never needs more than five groups.
const MAX_PACKED_BYTES: usize = 5;

pub fn write_packed(out: &mut dyn Marshaller, mut value: u32) -> Result<()> {
    while value > 0x7F {
        out.write_byte((value as u8 & 0x7F) | 0x80)?;
        value >>= 7;
    }
    out.write_byte(value as u8)
}

pub fn read_packed(input: &mut dyn Unmarshaller) -> Result<u32> {
    let mut value: u32 = 0;
    for i in 0..MAX_PACKED_BYTES {
        let b = input.read_byte()?;
        let group = (b & 0x7F) as u32;
        // the fifth group only has four usable bits
        if i == MAX_PACKED_BYTES - 1 && group > 0x0F {
            return Err(Error::PackedIntegerOverflow);
        }
        value |= group << (7 * i);
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::PackedIntegerOverflow)
}
