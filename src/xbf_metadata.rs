use crate::err::{Result, XbfError};
use crate::utils::read_len_prefixed_utf16_string;

use byteorder::ReadBytesExt;
use log::debug;
use std::io::Cursor;

/// Provider kind of an assembly record.
///
/// The values are documented for XBF v1 and have not been re-verified for
/// v2, so records keep the raw integer and expose this view on top of it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum AssemblyKind {
    Unknown,
    Native,
    Managed,
    System,
    Parser,
    Alternate,
}

impl AssemblyKind {
    pub fn from_i32(value: i32) -> Option<AssemblyKind> {
        match value {
            0 => Some(AssemblyKind::Unknown),
            1 => Some(AssemblyKind::Native),
            2 => Some(AssemblyKind::Managed),
            3 => Some(AssemblyKind::System),
            4 => Some(AssemblyKind::Parser),
            5 => Some(AssemblyKind::Alternate),
            _ => None,
        }
    }
}

bitflags! {
    /// Type record flags, as documented for XBF v1.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct TypeFlags: i32 {
        const IS_MARKUP_DIRECTIVE = 0x1;
    }
}

bitflags! {
    /// Property record flags, as documented for XBF v1.
    #[derive(Debug, PartialEq, Eq, Clone, Copy)]
    pub struct PropertyFlags: i32 {
        const IS_XML_PROPERTY = 0x1;
        const IS_MARKUP_DIRECTIVE = 0x2;
        const IS_IMPLICIT_PROPERTY = 0x4;
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct XbfAssembly {
    pub kind: i32,
    pub name_id: i32,
}

impl XbfAssembly {
    pub fn known_kind(&self) -> Option<AssemblyKind> {
        AssemblyKind::from_i32(self.kind)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct XbfTypeNamespace {
    pub assembly_id: i32,
    pub name_id: i32,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct XbfType {
    pub flags: i32,
    pub namespace_id: i32,
    pub name_id: i32,
}

impl XbfType {
    /// Unknown bits are kept as-is.
    pub fn type_flags(&self) -> TypeFlags {
        TypeFlags::from_bits_retain(self.flags)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct XbfProperty {
    pub flags: i32,
    /// Declaring type id; occupies the slot the type record uses for its
    /// namespace id.
    pub type_id: i32,
    pub name_id: i32,
}

impl XbfProperty {
    pub fn property_flags(&self) -> PropertyFlags {
        PropertyFlags::from_bits_retain(self.flags)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct XbfXmlNamespace {
    pub name_id: i32,
}

/// One entry of the v2 node section directory.
///
/// Both offsets are relative to the node section base (the file position
/// right after the directory); `positional_offset` marks the end of the
/// section's nodes and the start of its positional metadata.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct NodeSection {
    pub node_offset: u32,
    pub positional_offset: u32,
}

/// The metadata tables of an XBF v2 file, read back to back after the header.
#[derive(Debug, Default, PartialEq, Clone)]
pub struct XbfMetadata {
    pub strings: Vec<String>,
    pub assemblies: Vec<XbfAssembly>,
    pub type_namespaces: Vec<XbfTypeNamespace>,
    pub types: Vec<XbfType>,
    pub properties: Vec<XbfProperty>,
    pub xml_namespaces: Vec<XbfXmlNamespace>,
    pub node_sections: Vec<NodeSection>,
    /// Absolute file position of the byte after the node section directory;
    /// every section offset is added to this.
    pub node_section_base: u64,
}

impl XbfMetadata {
    pub fn from_stream(stream: &mut Cursor<&[u8]>) -> Result<XbfMetadata> {
        let strings = read_string_table(stream)?;

        let assemblies = read_table(stream, "assembly table", |s| {
            Ok(XbfAssembly {
                kind: try_read!(s, i32, "assembly kind")?,
                name_id: try_read!(s, i32, "assembly name id")?,
            })
        })?;

        let type_namespaces = read_table(stream, "type namespace table", |s| {
            Ok(XbfTypeNamespace {
                assembly_id: try_read!(s, i32, "type namespace assembly id")?,
                name_id: try_read!(s, i32, "type namespace name id")?,
            })
        })?;

        let types = read_table(stream, "type table", |s| {
            Ok(XbfType {
                flags: try_read!(s, i32, "type flags")?,
                namespace_id: try_read!(s, i32, "type namespace id")?,
                name_id: try_read!(s, i32, "type name id")?,
            })
        })?;

        let properties = read_table(stream, "property table", |s| {
            Ok(XbfProperty {
                flags: try_read!(s, i32, "property flags")?,
                type_id: try_read!(s, i32, "property type id")?,
                name_id: try_read!(s, i32, "property name id")?,
            })
        })?;

        let xml_namespaces = read_table(stream, "xml namespace table", |s| {
            Ok(XbfXmlNamespace {
                name_id: try_read!(s, i32, "xml namespace name id")?,
            })
        })?;

        let node_sections = read_table(stream, "node section directory", |s| {
            let node_offset = read_section_offset(s, "node section offset")?;
            let positional_offset = read_section_offset(s, "node section positional offset")?;
            Ok(NodeSection {
                node_offset,
                positional_offset,
            })
        })?;

        let node_section_base = stream.position();

        debug!(
            "metadata: {} strings, {} assemblies, {} types, {} properties, {} node sections, base {}",
            strings.len(),
            assemblies.len(),
            types.len(),
            properties.len(),
            node_sections.len(),
            node_section_base
        );

        Ok(XbfMetadata {
            strings,
            assemblies,
            type_namespaces,
            types,
            properties,
            xml_namespaces,
            node_sections,
            node_section_base,
        })
    }

    pub fn string(&self, id: i32) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|id| self.strings.get(id))
            .map(String::as_str)
    }
}

fn read_table_len(stream: &mut Cursor<&[u8]>, what: &'static str) -> Result<usize> {
    let pos = stream.position();
    let count = try_read!(stream, i32, what)?;
    usize::try_from(count).map_err(|_| XbfError::UnexpectedByte {
        value: count as u32,
        expected: "a non-negative table length",
        offset: pos,
    })
}

fn read_table<T>(
    stream: &mut Cursor<&[u8]>,
    what: &'static str,
    mut read_one: impl FnMut(&mut Cursor<&[u8]>) -> Result<T>,
) -> Result<Vec<T>> {
    let count = read_table_len(stream, what)?;

    // Length words are untrusted, cap the preallocation.
    let mut records = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        records.push(read_one(stream)?);
    }

    Ok(records)
}

fn read_string_table(stream: &mut Cursor<&[u8]>) -> Result<Vec<String>> {
    let count = read_table_len(stream, "string table")?;

    let mut strings = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        let string = read_len_prefixed_utf16_string(stream, "string table entry")?;

        // v2 strings carry a terminator word after the counted characters.
        let terminator_pos = stream.position();
        let terminator = try_read!(stream, u16, "string table terminator")?;
        if terminator != 0 {
            return Err(XbfError::UnexpectedByte {
                value: u32::from(terminator),
                expected: "a zero string table terminator",
                offset: terminator_pos,
            });
        }

        strings.push(string);
    }

    Ok(strings)
}

fn read_section_offset(stream: &mut Cursor<&[u8]>, what: &'static str) -> Result<u32> {
    let pos = stream.position();
    let offset = try_read!(stream, i32, what)?;
    u32::try_from(offset).map_err(|_| XbfError::UnexpectedByte {
        value: offset as u32,
        expected: "a non-negative node section offset",
        offset: pos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_kind_round_trip() {
        crate::ensure_env_logger_initialized();
        assert_eq!(AssemblyKind::from_i32(1), Some(AssemblyKind::Native));
        assert_eq!(AssemblyKind::from_i32(5), Some(AssemblyKind::Alternate));
        assert_eq!(AssemblyKind::from_i32(17), None);
    }

    #[test]
    fn test_flags_preserve_unknown_bits() {
        let ty = XbfType {
            flags: 0x41,
            namespace_id: 0,
            name_id: 0,
        };
        assert!(ty.type_flags().contains(TypeFlags::IS_MARKUP_DIRECTIVE));
        assert_eq!(ty.type_flags().bits(), 0x41);

        let prop = XbfProperty {
            flags: 0x86,
            type_id: 0,
            name_id: 0,
        };
        assert!(prop.property_flags().contains(PropertyFlags::IS_MARKUP_DIRECTIVE));
        assert!(prop.property_flags().contains(PropertyFlags::IS_IMPLICIT_PROPERTY));
        assert_eq!(prop.property_flags().bits(), 0x86);
    }

    #[test]
    fn test_string_lookup_rejects_negative_ids() {
        let metadata = XbfMetadata {
            strings: vec!["Grid".to_string()],
            ..Default::default()
        };
        assert_eq!(metadata.string(0), Some("Grid"));
        assert_eq!(metadata.string(-1), None);
        assert_eq!(metadata.string(1), None);
    }
}
