/// Lookup oracle for framework-defined names.
///
/// Type and property ids with the high bit set refer to names baked into the
/// hosting UI framework instead of the in-file tables. The concrete tables
/// are large and version-dependent, so they stay behind this trait; the
/// parser only needs the three lookups.
pub trait FrameworkResolver {
    /// Well-known type name for a framework type id (high bit stripped).
    fn type_name(&self, id: u16) -> Option<&str>;

    /// Well-known property name for a framework property id (high bit stripped).
    fn property_name(&self, id: u16) -> Option<&str>;

    /// Member name for `value` of the enumeration identified by `enum_id`.
    fn enum_value(&self, enum_id: u16, value: i32) -> Option<String>;
}

/// Resolver that knows nothing.
///
/// Every framework reference falls back to a placeholder such as
/// `UnknownType0x8010` or `(Enum0x8002)3`, which keeps the output readable
/// without shipping the framework tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullFramework;

impl FrameworkResolver for NullFramework {
    fn type_name(&self, _id: u16) -> Option<&str> {
        None
    }

    fn property_name(&self, _id: u16) -> Option<&str> {
        None
    }

    fn enum_value(&self, _enum_id: u16, _value: i32) -> Option<String> {
        None
    }
}
