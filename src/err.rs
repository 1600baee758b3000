use thiserror::Error;

pub type Result<T> = std::result::Result<T, XbfError>;

#[derive(Debug, Error)]
pub enum XbfError {
    #[error("Invalid XBF file header magic, expected `58 42 46 00`, found `{magic:02X?}`")]
    InvalidMagic { magic: [u8; 4] },

    #[error("Unsupported XBF version {major}.{minor}, only major version 2 is supported")]
    UnsupportedVersion { major: u32, minor: u32 },

    #[error("Offset {offset}: unexpected end of data while reading {t}")]
    UnexpectedEof { offset: u64, t: &'static str },

    #[error("Offset {offset}: unexpected value `{value:#x}`, expected {expected}")]
    UnexpectedByte {
        value: u32,
        expected: &'static str,
        offset: u64,
    },

    #[error("Offset {offset}: tried to read an invalid byte `{value:02x}` as a node stream opcode")]
    UnknownOpcode { value: u8, offset: u64 },

    #[error("Offset {offset}: tried to read an invalid byte `{value:02x}` as a property value tag")]
    UnknownValueType { value: u8, offset: u64 },

    #[error("Offset {offset}: unknown node section kind {kind}")]
    UnknownSectionKind { kind: u32, offset: u64 },

    #[error("Object or collection stack corrupted: {detail}")]
    StackCorruption { detail: &'static str },

    #[error("Parser was closed, create a new parser to read again")]
    Disposed,

    #[error("Node section recursion exceeded the configured depth limit of {limit}")]
    DepthExceeded { limit: usize },

    #[error("Unsupported XBF feature: {name}")]
    UnsupportedFeature { name: &'static str },

    #[error("Offset {offset}: failed to decode UTF-16 string")]
    FailedToDecodeUtf16String { offset: u64 },

    #[error("Failed to open file {}", path.display())]
    FailedToOpenFile {
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    /// Wrapper added by the outermost node stream call so callers see where
    /// dispatch stood when a nested read failed.
    #[error("Node stream parsing failed at offset {position} (node section base {section_base})")]
    NodeStream {
        position: u64,
        section_base: u64,
        source: Box<XbfError>,
    },
}

impl XbfError {
    /// Peels `NodeStream` wrappers down to the failure that started it all.
    pub fn root_cause(&self) -> &XbfError {
        match self {
            XbfError::NodeStream { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
