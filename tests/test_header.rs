use fixtures::*;

use pretty_assertions::assert_eq;
use xbf::err::XbfError;
use xbf::XbfParser;

#[test]
fn test_parses_header_of_minimal_image() {
    ensure_env_logger_initialized();
    let image = XbfImageBuilder::new().build();
    let parser = XbfParser::from_buffer(image).unwrap();

    let header = parser.header();
    assert_eq!(header.major_version, 2);
    assert_eq!(header.minor_version, 1);
    assert_eq!(header.string_table_offset, 132);
    assert_eq!(header.node_size, 0);
    assert_eq!(header.hash, "0".repeat(32));

    // Seven empty tables: 7 * 4 length bytes.
    assert_eq!(header.metadata_size, 28);
}

#[test]
fn test_rejects_bad_magic() {
    ensure_env_logger_initialized();
    let mut image = XbfImageBuilder::new().build();
    image[0] = b'A';

    let err = XbfParser::from_buffer(image).unwrap_err();
    assert!(matches!(err, XbfError::InvalidMagic { .. }));
}

#[test]
fn test_rejects_unsupported_major_version() {
    ensure_env_logger_initialized();
    let image = XbfImageBuilder::new().major_version(1).build();

    let err = XbfParser::from_buffer(image).unwrap_err();
    assert!(matches!(
        err,
        XbfError::UnsupportedVersion { major: 1, minor: 1 }
    ));
}

#[test]
fn test_truncated_image_is_eof() {
    ensure_env_logger_initialized();
    let image = XbfImageBuilder::new().build();

    let err = XbfParser::from_buffer(image[..40].to_vec()).unwrap_err();
    assert!(matches!(err, XbfError::UnexpectedEof { .. }));
}

#[test]
fn test_header_only_file_parses_tables_but_has_no_root() {
    ensure_env_logger_initialized();
    let image = XbfImageBuilder::new().build();
    let parser = XbfParser::from_buffer(image).unwrap();

    assert!(parser.metadata().strings.is_empty());
    assert!(parser.metadata().types.is_empty());
    assert!(parser.metadata().node_sections.is_empty());

    // No node bytes at all, so the root opcode is missing.
    let err = parser.read_root_node_section().unwrap_err();
    assert!(matches!(
        err.root_cause(),
        XbfError::UnexpectedEof { t: "root node stream opcode", .. }
    ));
}

#[test]
fn test_loads_metadata_tables() {
    ensure_env_logger_initialized();
    let image = XbfImageBuilder::new()
        .string("Grid")
        .string("App")
        .assembly(1, 1)
        .type_namespace(0, 1)
        .xbf_type(0, 0, 0)
        .property(0, 0, 0)
        .xml_namespace(1)
        .build();

    let parser = XbfParser::from_buffer(image).unwrap();
    let metadata = parser.metadata();

    assert_eq!(metadata.strings, vec!["Grid".to_string(), "App".to_string()]);
    assert_eq!(metadata.assemblies.len(), 1);
    assert_eq!(
        metadata.assemblies[0].known_kind(),
        Some(xbf::AssemblyKind::Native)
    );
    assert_eq!(metadata.types[0].name_id, 0);
    assert_eq!(metadata.properties[0].name_id, 0);
    assert_eq!(metadata.xml_namespaces[0].name_id, 1);
}

#[test]
fn test_rejects_nonzero_string_terminator() {
    ensure_env_logger_initialized();
    let mut image = XbfImageBuilder::new().string("Hi").build();

    // String table: count (4) + char count (4) + "Hi" (4) puts the
    // terminator word at offset 144.
    image[144] = 1;

    let err = XbfParser::from_buffer(image).unwrap_err();
    assert!(matches!(
        err,
        XbfError::UnexpectedByte { value: 1, offset: 144, .. }
    ));
}

#[test]
fn test_closed_parser_is_disposed() {
    ensure_env_logger_initialized();
    let image = XbfImageBuilder::new()
        .string("Grid")
        .xbf_type(0, 0, 0)
        .section(NodeWriter::new().op(0x17).u16(0).op(0x21).finish())
        .build();

    let mut parser = XbfParser::from_buffer(image).unwrap();
    assert!(parser.read_root_node_section().is_ok());

    parser.close();
    assert!(matches!(
        parser.read_root_node_section().unwrap_err(),
        XbfError::Disposed
    ));
    assert!(matches!(
        parser.disassemble_root_node_section().unwrap_err(),
        XbfError::Disposed
    ));
}

#[test]
fn test_missing_file_fails_to_open() {
    ensure_env_logger_initialized();
    let err = XbfParser::from_path("does-not-exist.xbf").unwrap_err();
    assert!(matches!(err, XbfError::FailedToOpenFile { .. }));
}
