use crate::binxaml::deserializer::XbfDeserializer;
use crate::binxaml::disassembler::Disassembly;
use crate::err::{Result, XbfError};
use crate::framework::{FrameworkResolver, NullFramework};
use crate::model::XamlObjectRef;
use crate::xbf_file_header::XbfFileHeader;
use crate::xbf_metadata::XbfMetadata;

use log::debug;
use std::io::Cursor;
use std::path::Path;

pub const DEFAULT_SECTION_DEPTH_LIMIT: usize = 256;

/// Configuration for an `XbfParser`.
#[derive(Debug, Clone)]
pub struct ParserSettings {
    /// Maximum nesting depth of node section descents; offsets come from
    /// the file, so unbounded recursion would be input-controlled.
    section_depth_limit: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        ParserSettings {
            section_depth_limit: DEFAULT_SECTION_DEPTH_LIMIT,
        }
    }
}

impl ParserSettings {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn section_depth(mut self, limit: usize) -> Self {
        self.section_depth_limit = limit;
        self
    }

    pub(crate) fn section_depth_limit(&self) -> usize {
        self.section_depth_limit
    }
}

/// Reader over a complete XBF v2 file.
///
/// The parser owns the file bytes for its lifetime and validates the header
/// magic, the major version and the metadata tables on construction. Each
/// parse call walks the node streams with fresh interpreter state; an error
/// aborts that call only.
pub struct XbfParser {
    data: Option<Vec<u8>>,
    header: XbfFileHeader,
    metadata: XbfMetadata,
    settings: ParserSettings,
    framework: Box<dyn FrameworkResolver>,
}

impl std::fmt::Debug for XbfParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XbfParser")
            .field("data", &self.data)
            .field("header", &self.header)
            .field("metadata", &self.metadata)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl XbfParser {
    /// Attempts to load an XBF file from disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| XbfError::FailedToOpenFile {
            source: e,
            path: path.to_path_buf(),
        })?;

        Self::from_buffer(data)
    }

    /// Attempts to load an XBF file from an in-memory buffer.
    pub fn from_buffer(data: Vec<u8>) -> Result<Self> {
        let mut stream = Cursor::new(data.as_slice());
        let header = XbfFileHeader::from_stream(&mut stream)?;

        if header.major_version != 2 {
            return Err(XbfError::UnsupportedVersion {
                major: header.major_version,
                minor: header.minor_version,
            });
        }

        let metadata = XbfMetadata::from_stream(&mut stream)?;
        debug!(
            "loaded XBF {}.{}, node section base {}",
            header.major_version, header.minor_version, metadata.node_section_base
        );

        Ok(XbfParser {
            data: Some(data),
            header,
            metadata,
            settings: ParserSettings::default(),
            framework: Box::new(NullFramework),
        })
    }

    pub fn with_configuration(mut self, settings: ParserSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Installs the framework oracle used to resolve high-bit ids.
    pub fn with_framework(mut self, framework: Box<dyn FrameworkResolver>) -> Self {
        self.framework = framework;
        self
    }

    pub fn header(&self) -> &XbfFileHeader {
        &self.header
    }

    pub fn metadata(&self) -> &XbfMetadata {
        &self.metadata
    }

    /// Parses node section 0 as a root and returns the assembled object tree.
    pub fn read_root_node_section(&self) -> Result<XamlObjectRef> {
        self.deserializer(false)?.read_root_node_section()
    }

    /// Parses node section 0 as a root, recording every executed opcode.
    pub fn disassemble_root_node_section(&self) -> Result<Disassembly> {
        self.deserializer(true)?.disassemble_root_node_section()
    }

    /// Disassembles an arbitrary node section by directory index.
    pub fn disassemble_node_section(&self, index: usize) -> Result<Disassembly> {
        self.deserializer(true)?.disassemble_node_section(index)
    }

    /// Releases the underlying bytes; any further parse fails with
    /// `Disposed`.
    pub fn close(&mut self) {
        self.data = None;
    }

    fn deserializer(&self, record_trace: bool) -> Result<XbfDeserializer<'_>> {
        let data = self.data.as_deref().ok_or(XbfError::Disposed)?;
        Ok(XbfDeserializer::new(
            data,
            &self.metadata,
            self.framework.as_ref(),
            &self.settings,
            record_trace,
        ))
    }
}
