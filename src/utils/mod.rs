use encoding::all::UTF_16LE;
use encoding::{DecoderTrap, Encoding};

use crate::err::{Result, XbfError};
use byteorder::ReadBytesExt;
use std::io::Cursor;

/// Decodes `num_chars` UTF-16LE code units from the cursor.
pub(crate) fn read_utf16_by_size(
    cursor: &mut Cursor<&[u8]>,
    num_chars: usize,
    what: &'static str,
) -> Result<String> {
    if num_chars == 0 {
        return Ok(String::new());
    }

    let start = cursor.position();
    let needed = num_chars
        .checked_mul(2)
        .ok_or(XbfError::UnexpectedEof { offset: start, t: what })?;

    let data = *cursor.get_ref();
    let from = start as usize;
    let to = from
        .checked_add(needed)
        .filter(|&to| to <= data.len())
        .ok_or(XbfError::UnexpectedEof { offset: start, t: what })?;

    match UTF_16LE.decode(&data[from..to], DecoderTrap::Strict) {
        Ok(s) => {
            // The decoder does not advance the stream, seek manually.
            cursor.set_position(to as u64);
            Ok(s)
        }
        Err(_) => Err(XbfError::FailedToDecodeUtf16String { offset: start }),
    }
}

/// Reads an i32 character count followed by that many UTF-16LE code units.
///
/// This is the inline string layout of the node stream; table strings carry
/// an extra `u16` terminator that the metadata loader checks separately.
pub(crate) fn read_len_prefixed_utf16_string(
    cursor: &mut Cursor<&[u8]>,
    what: &'static str,
) -> Result<String> {
    let pos = cursor.position();
    let expected_number_of_characters = try_read!(cursor, i32, what)?;
    let num_chars = usize::try_from(expected_number_of_characters).map_err(|_| {
        XbfError::UnexpectedByte {
            value: expected_number_of_characters as u32,
            expected: "a non-negative string length",
            offset: pos,
        }
    })?;

    read_utf16_by_size(cursor, num_chars, what)
}

/// Reads a little-endian base-128 integer of at most five bytes.
pub(crate) fn read_7bit_encoded_u32(
    cursor: &mut Cursor<&[u8]>,
    what: &'static str,
) -> Result<u32> {
    let mut value = 0u32;

    for shift in 0..5 {
        let byte = try_read!(cursor, u8, what)?;
        value |= u32::from(byte & 0x7f) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(XbfError::UnexpectedByte {
        value,
        expected: "a 7-bit encoded integer of at most five bytes",
        offset: cursor.position(),
    })
}
