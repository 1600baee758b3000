/// Reads a little-endian primitive from the cursor, capturing the position
/// where the read began if the data runs out.
macro_rules! try_read {
    ($cursor:expr, u8, $t:expr) => {{
        let pos = $cursor.position();
        $cursor
            .read_u8()
            .map_err(|_| $crate::err::XbfError::UnexpectedEof { offset: pos, t: $t })
    }};

    ($cursor:expr, u16, $t:expr) => {{
        let pos = $cursor.position();
        $cursor
            .read_u16::<byteorder::LittleEndian>()
            .map_err(|_| $crate::err::XbfError::UnexpectedEof { offset: pos, t: $t })
    }};

    ($cursor:expr, i32, $t:expr) => {{
        let pos = $cursor.position();
        $cursor
            .read_i32::<byteorder::LittleEndian>()
            .map_err(|_| $crate::err::XbfError::UnexpectedEof { offset: pos, t: $t })
    }};

    ($cursor:expr, u32, $t:expr) => {{
        let pos = $cursor.position();
        $cursor
            .read_u32::<byteorder::LittleEndian>()
            .map_err(|_| $crate::err::XbfError::UnexpectedEof { offset: pos, t: $t })
    }};

    ($cursor:expr, u64, $t:expr) => {{
        let pos = $cursor.position();
        $cursor
            .read_u64::<byteorder::LittleEndian>()
            .map_err(|_| $crate::err::XbfError::UnexpectedEof { offset: pos, t: $t })
    }};

    ($cursor:expr, f32, $t:expr) => {{
        let pos = $cursor.position();
        $cursor
            .read_f32::<byteorder::LittleEndian>()
            .map_err(|_| $crate::err::XbfError::UnexpectedEof { offset: pos, t: $t })
    }};
}
