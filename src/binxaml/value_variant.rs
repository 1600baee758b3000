//! Inline typed property values of the node stream.

use crate::binxaml::name;
use crate::err::{Result, XbfError};
use crate::framework::FrameworkResolver;
use crate::model::XamlValue;
use crate::utils::read_len_prefixed_utf16_string;
use crate::xbf_metadata::XbfMetadata;

use byteorder::ReadBytesExt;
use std::io::Cursor;

/// One-byte tag preceding every inline property value.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum XbfValueKind {
    BoolFalse,
    BoolTrue,
    Float32,
    Int32,
    TableString,
    Thickness,
    GridLength,
    Color,
    Duration,
    EmptyString,
    Enum,
}

impl XbfValueKind {
    pub fn from_u8(byte: u8) -> Option<XbfValueKind> {
        match byte {
            0x01 => Some(XbfValueKind::BoolFalse),
            0x02 => Some(XbfValueKind::BoolTrue),
            0x03 => Some(XbfValueKind::Float32),
            0x04 => Some(XbfValueKind::Int32),
            0x05 => Some(XbfValueKind::TableString),
            0x06 => Some(XbfValueKind::Thickness),
            0x07 => Some(XbfValueKind::GridLength),
            0x08 => Some(XbfValueKind::Color),
            0x09 => Some(XbfValueKind::Duration),
            0x0a => Some(XbfValueKind::EmptyString),
            0x0b => Some(XbfValueKind::Enum),
            _ => None,
        }
    }
}

pub(crate) fn read_value(
    cursor: &mut Cursor<&[u8]>,
    metadata: &XbfMetadata,
    framework: &dyn FrameworkResolver,
) -> Result<XamlValue> {
    let tag_pos = cursor.position();
    let tag = try_read!(cursor, u8, "property value tag")?;

    let kind = XbfValueKind::from_u8(tag).ok_or(XbfError::UnknownValueType {
        value: tag,
        offset: tag_pos,
    })?;

    let value = match kind {
        XbfValueKind::BoolFalse => XamlValue::Bool(false),
        XbfValueKind::BoolTrue => XamlValue::Bool(true),
        XbfValueKind::Float32 => XamlValue::Float(try_read!(cursor, f32, "f32 value")?),
        XbfValueKind::Int32 => XamlValue::Int32(try_read!(cursor, i32, "i32 value")?),
        XbfValueKind::TableString => {
            let id_pos = cursor.position();
            let id = try_read!(cursor, u16, "string value id")?;
            let string = metadata
                .string(i32::from(id))
                .ok_or(XbfError::UnexpectedByte {
                    value: u32::from(id),
                    expected: "a string table index",
                    offset: id_pos,
                })?;
            XamlValue::String(string.to_string())
        }
        XbfValueKind::Thickness => {
            let left = try_read!(cursor, f32, "thickness left")?;
            let top = try_read!(cursor, f32, "thickness top")?;
            let right = try_read!(cursor, f32, "thickness right")?;
            let bottom = try_read!(cursor, f32, "thickness bottom")?;
            XamlValue::String(format_thickness(left, top, right, bottom))
        }
        XbfValueKind::GridLength => {
            let kind_pos = cursor.position();
            let grid_kind = try_read!(cursor, i32, "grid length kind")?;
            let value = try_read!(cursor, f32, "grid length value")?;
            match grid_kind {
                0 => XamlValue::String("Auto".to_string()),
                1 => XamlValue::Float(value),
                2 if value == 1.0 => XamlValue::String("*".to_string()),
                2 => XamlValue::String(format!("{value}*")),
                other => {
                    return Err(XbfError::UnexpectedByte {
                        value: other as u32,
                        expected: "a grid length kind of 0, 1 or 2",
                        offset: kind_pos,
                    })
                }
            }
        }
        XbfValueKind::Color => {
            let b = try_read!(cursor, u8, "color blue")?;
            let g = try_read!(cursor, u8, "color green")?;
            let r = try_read!(cursor, u8, "color red")?;
            let a = try_read!(cursor, u8, "color alpha")?;
            XamlValue::String(format!("#{a:02X}{r:02X}{g:02X}{b:02X}"))
        }
        XbfValueKind::Duration => {
            XamlValue::String(read_len_prefixed_utf16_string(cursor, "duration value")?)
        }
        XbfValueKind::EmptyString => XamlValue::String(String::new()),
        XbfValueKind::Enum => {
            let enum_id = try_read!(cursor, u16, "enum id")?;
            let value = try_read!(cursor, i32, "enum value")?;
            XamlValue::String(name::enum_value(framework, enum_id, value))
        }
    };

    Ok(value)
}

fn format_thickness(left: f32, top: f32, right: f32, bottom: f32) -> String {
    if left == right && top == bottom {
        if left == top {
            format!("{left}")
        } else {
            format!("{left},{top}")
        }
    } else {
        format!("{left},{top},{right},{bottom}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::NullFramework;
    use byteorder::{LittleEndian, WriteBytesExt};
    use pretty_assertions::assert_eq;

    fn decode(bytes: &[u8]) -> Result<XamlValue> {
        let metadata = XbfMetadata {
            strings: vec!["Grid".to_string(), "AccentBrush".to_string()],
            ..Default::default()
        };
        read_value(&mut Cursor::new(bytes), &metadata, &NullFramework)
    }

    fn thickness_bytes(l: f32, t: f32, r: f32, b: f32) -> Vec<u8> {
        let mut bytes = vec![0x06];
        for v in [l, t, r, b] {
            bytes.write_f32::<LittleEndian>(v).unwrap();
        }
        bytes
    }

    fn grid_length_bytes(kind: i32, value: f32) -> Vec<u8> {
        let mut bytes = vec![0x07];
        bytes.write_i32::<LittleEndian>(kind).unwrap();
        bytes.write_f32::<LittleEndian>(value).unwrap();
        bytes
    }

    #[test]
    fn test_decodes_scalars() {
        crate::ensure_env_logger_initialized();
        assert_eq!(decode(&[0x01]).unwrap(), XamlValue::Bool(false));
        assert_eq!(decode(&[0x02]).unwrap(), XamlValue::Bool(true));
        assert_eq!(
            decode(&[0x04, 0x2a, 0x00, 0x00, 0x00]).unwrap(),
            XamlValue::Int32(42)
        );
        assert_eq!(
            decode(&[0x03, 0x00, 0x00, 0x20, 0x41]).unwrap(),
            XamlValue::Float(10.0)
        );
        assert_eq!(decode(&[0x0a]).unwrap(), XamlValue::String(String::new()));
    }

    #[test]
    fn test_decodes_table_strings() {
        assert_eq!(
            decode(&[0x05, 0x01, 0x00]).unwrap(),
            XamlValue::String("AccentBrush".to_string())
        );
        let err = decode(&[0x05, 0x07, 0x00]).unwrap_err();
        assert!(matches!(err, XbfError::UnexpectedByte { value: 7, .. }));
    }

    #[test]
    fn test_thickness_normalization() {
        assert_eq!(
            decode(&thickness_bytes(4.0, 4.0, 4.0, 4.0)).unwrap(),
            XamlValue::String("4".to_string())
        );
        assert_eq!(
            decode(&thickness_bytes(12.0, 6.0, 12.0, 6.0)).unwrap(),
            XamlValue::String("12,6".to_string())
        );
        assert_eq!(
            decode(&thickness_bytes(1.0, 2.0, 3.0, 4.5)).unwrap(),
            XamlValue::String("1,2,3,4.5".to_string())
        );
    }

    #[test]
    fn test_grid_length_forms() {
        assert_eq!(
            decode(&grid_length_bytes(0, 0.0)).unwrap(),
            XamlValue::String("Auto".to_string())
        );
        assert_eq!(
            decode(&grid_length_bytes(1, 24.0)).unwrap(),
            XamlValue::Float(24.0)
        );
        assert_eq!(
            decode(&grid_length_bytes(2, 1.0)).unwrap(),
            XamlValue::String("*".to_string())
        );
        assert_eq!(
            decode(&grid_length_bytes(2, 0.5)).unwrap(),
            XamlValue::String("0.5*".to_string())
        );
        let err = decode(&grid_length_bytes(3, 1.0)).unwrap_err();
        assert!(matches!(err, XbfError::UnexpectedByte { value: 3, .. }));
    }

    #[test]
    fn test_color_is_argb_hex() {
        assert_eq!(
            decode(&[0x08, 0x33, 0x22, 0x11, 0xff]).unwrap(),
            XamlValue::String("#FF112233".to_string())
        );
    }

    #[test]
    fn test_duration_is_inline_string() {
        let mut bytes = vec![0x09, 0x02, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&[b'0', 0x00, b':', 0x00]);
        assert_eq!(
            decode(&bytes).unwrap(),
            XamlValue::String("0:".to_string())
        );
    }

    #[test]
    fn test_enum_without_oracle_uses_fallback() {
        let mut bytes = vec![0x0b, 0x02, 0x80];
        bytes.write_i32::<LittleEndian>(3).unwrap();
        assert_eq!(
            decode(&bytes).unwrap(),
            XamlValue::String("(Enum0x8002)3".to_string())
        );
    }

    #[test]
    fn test_unknown_tag_fails() {
        let err = decode(&[0x0c]).unwrap_err();
        assert!(matches!(
            err,
            XbfError::UnknownValueType {
                value: 0x0c,
                offset: 0
            }
        ));
    }
}
