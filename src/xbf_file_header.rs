use crate::err::{Result, XbfError};
use crate::utils::read_utf16_by_size;

use byteorder::ReadBytesExt;
use std::io::{Cursor, Read};

pub(crate) const XBF_MAGIC: [u8; 4] = [b'X', b'B', b'F', 0x00];

/// Fixed-layout header at the start of every XBF file.
///
/// The six table offsets are absolute file offsets; the tables are laid out
/// back to back so the loader reads them sequentially anyway, but the values
/// are surfaced for analysis tooling. The hash is stored opaque, it is never
/// validated.
#[derive(Debug, PartialEq, Clone)]
pub struct XbfFileHeader {
    pub metadata_size: u32,
    pub node_size: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub string_table_offset: u64,
    pub assembly_table_offset: u64,
    pub type_namespace_table_offset: u64,
    pub type_table_offset: u64,
    pub property_table_offset: u64,
    pub xml_namespace_table_offset: u64,
    pub hash: String,
}

impl XbfFileHeader {
    pub fn from_stream(stream: &mut Cursor<&[u8]>) -> Result<XbfFileHeader> {
        let mut magic = [0_u8; 4];
        stream
            .read_exact(&mut magic)
            .map_err(|_| XbfError::UnexpectedEof {
                offset: 0,
                t: "file header magic",
            })?;

        if magic != XBF_MAGIC {
            return Err(XbfError::InvalidMagic { magic });
        }

        let metadata_size = try_read!(stream, u32, "header metadata size")?;
        let node_size = try_read!(stream, u32, "header node size")?;
        let major_version = try_read!(stream, u32, "header major version")?;
        let minor_version = try_read!(stream, u32, "header minor version")?;
        let string_table_offset = try_read!(stream, u64, "string table offset")?;
        let assembly_table_offset = try_read!(stream, u64, "assembly table offset")?;
        let type_namespace_table_offset = try_read!(stream, u64, "type namespace table offset")?;
        let type_table_offset = try_read!(stream, u64, "type table offset")?;
        let property_table_offset = try_read!(stream, u64, "property table offset")?;
        let xml_namespace_table_offset = try_read!(stream, u64, "xml namespace table offset")?;
        let hash = read_utf16_by_size(stream, 32, "header hash")?;

        Ok(XbfFileHeader {
            metadata_size,
            node_size,
            major_version,
            minor_version,
            string_table_offset,
            assembly_table_offset,
            type_namespace_table_offset,
            type_table_offset,
            property_table_offset,
            xml_namespace_table_offset,
            hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};

    fn sample_header_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&XBF_MAGIC);
        bytes.write_u32::<LittleEndian>(0x100).unwrap();
        bytes.write_u32::<LittleEndian>(0x200).unwrap();
        bytes.write_u32::<LittleEndian>(2).unwrap();
        bytes.write_u32::<LittleEndian>(1).unwrap();
        for offset in 0..6_u64 {
            bytes.write_u64::<LittleEndian>(132 + offset * 8).unwrap();
        }
        for _ in 0..32 {
            bytes.write_u16::<LittleEndian>(u16::from(b'a')).unwrap();
        }
        bytes
    }

    #[test]
    fn test_parses_xbf_file_header() {
        let bytes = sample_header_bytes();
        let mut stream = Cursor::new(bytes.as_slice());
        let header = XbfFileHeader::from_stream(&mut stream).unwrap();

        assert_eq!(
            header,
            XbfFileHeader {
                metadata_size: 0x100,
                node_size: 0x200,
                major_version: 2,
                minor_version: 1,
                string_table_offset: 132,
                assembly_table_offset: 140,
                type_namespace_table_offset: 148,
                type_table_offset: 156,
                property_table_offset: 164,
                xml_namespace_table_offset: 172,
                hash: "a".repeat(32),
            }
        );
        assert_eq!(stream.position(), 132);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = sample_header_bytes();
        bytes[0] = b'E';
        let err = XbfFileHeader::from_stream(&mut Cursor::new(bytes.as_slice())).unwrap_err();
        assert!(matches!(err, XbfError::InvalidMagic { .. }));
    }

    #[test]
    fn test_truncated_header_is_eof() {
        let bytes = sample_header_bytes();
        let err =
            XbfFileHeader::from_stream(&mut Cursor::new(&bytes[..16])).unwrap_err();
        assert!(matches!(err, XbfError::UnexpectedEof { .. }));
    }
}
