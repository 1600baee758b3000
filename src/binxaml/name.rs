//! Resolution of type, property and enum ids into display names.
//!
//! Ids with the high bit set refer to names baked into the hosting
//! framework and go through the oracle; the rest index the in-file tables.
//! Missing entries produce placeholder names instead of failing, the
//! surrounding markup is usually still worth reconstructing.

use std::collections::HashMap;

use crate::framework::FrameworkResolver;
use crate::xbf_metadata::XbfMetadata;

const FRAMEWORK_ID_BIT: u16 = 0x8000;

pub(crate) fn type_name(
    metadata: &XbfMetadata,
    framework: &dyn FrameworkResolver,
    prefixes: &HashMap<String, String>,
    id: u16,
) -> String {
    if id & FRAMEWORK_ID_BIT != 0 {
        return match framework.type_name(id & !FRAMEWORK_ID_BIT) {
            Some(name) => name.to_string(),
            None => format!("UnknownType0x{id:04X}"),
        };
    }

    let Some(ty) = metadata.types.get(usize::from(id)) else {
        return format!("UnknownType0x{id:04X}");
    };

    let name = metadata.string(ty.name_id).unwrap_or_default().to_string();

    // Qualify with the declared prefix when the type's `using:` namespace
    // was bound by a root namespace declaration.
    if let Some(namespace) = usize::try_from(ty.namespace_id)
        .ok()
        .and_then(|id| metadata.type_namespaces.get(id))
    {
        if let Some(namespace_name) = metadata.string(namespace.name_id) {
            let uri = format!("using:{namespace_name}");
            if let Some(prefix) = prefixes.get(&uri) {
                if !prefix.is_empty() {
                    return format!("{prefix}:{name}");
                }
            }
        }
    }

    name
}

pub(crate) fn property_name(
    metadata: &XbfMetadata,
    framework: &dyn FrameworkResolver,
    id: u16,
) -> String {
    if id & FRAMEWORK_ID_BIT != 0 {
        return match framework.property_name(id & !FRAMEWORK_ID_BIT) {
            Some(name) => name.to_string(),
            None => format!("UnknownProperty0x{id:04X}"),
        };
    }

    match metadata
        .properties
        .get(usize::from(id))
        .and_then(|property| metadata.string(property.name_id))
    {
        Some(name) => name.to_string(),
        None => format!("UnknownProperty0x{id:04X}"),
    }
}

pub(crate) fn enum_value(framework: &dyn FrameworkResolver, enum_id: u16, value: i32) -> String {
    framework
        .enum_value(enum_id, value)
        .unwrap_or_else(|| format!("(Enum0x{enum_id:04X}){value}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::NullFramework;
    use crate::xbf_metadata::{XbfType, XbfTypeNamespace};

    struct StubFramework;

    impl FrameworkResolver for StubFramework {
        fn type_name(&self, id: u16) -> Option<&str> {
            (id == 0x10).then_some("Button")
        }

        fn property_name(&self, id: u16) -> Option<&str> {
            (id == 0x21).then_some("Background")
        }

        fn enum_value(&self, enum_id: u16, value: i32) -> Option<String> {
            (enum_id == 0x2 && value == 3).then(|| "Right".to_string())
        }
    }

    fn sample_metadata() -> XbfMetadata {
        XbfMetadata {
            strings: vec!["MyControl".to_string(), "My.App.Controls".to_string()],
            type_namespaces: vec![XbfTypeNamespace {
                assembly_id: 0,
                name_id: 1,
            }],
            types: vec![XbfType {
                flags: 0,
                namespace_id: 0,
                name_id: 0,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_high_bit_routes_to_framework() {
        let metadata = XbfMetadata::default();
        let prefixes = HashMap::new();
        assert_eq!(
            type_name(&metadata, &StubFramework, &prefixes, 0x8010),
            "Button"
        );
        assert_eq!(property_name(&metadata, &StubFramework, 0x8021), "Background");
    }

    #[test]
    fn test_unknown_framework_ids_fall_back() {
        let metadata = XbfMetadata::default();
        let prefixes = HashMap::new();
        assert_eq!(
            type_name(&metadata, &NullFramework, &prefixes, 0x8010),
            "UnknownType0x8010"
        );
        assert_eq!(
            property_name(&metadata, &NullFramework, 0x8021),
            "UnknownProperty0x8021"
        );
    }

    #[test]
    fn test_table_type_without_prefix_is_unqualified() {
        let metadata = sample_metadata();
        let prefixes = HashMap::new();
        assert_eq!(
            type_name(&metadata, &NullFramework, &prefixes, 0),
            "MyControl"
        );
    }

    #[test]
    fn test_table_type_with_registered_prefix_is_qualified() {
        let metadata = sample_metadata();
        let mut prefixes = HashMap::new();
        prefixes.insert("using:My.App.Controls".to_string(), "local".to_string());
        assert_eq!(
            type_name(&metadata, &NullFramework, &prefixes, 0),
            "local:MyControl"
        );
    }

    #[test]
    fn test_default_prefix_stays_unqualified() {
        let metadata = sample_metadata();
        let mut prefixes = HashMap::new();
        prefixes.insert("using:My.App.Controls".to_string(), String::new());
        assert_eq!(
            type_name(&metadata, &NullFramework, &prefixes, 0),
            "MyControl"
        );
    }

    #[test]
    fn test_out_of_range_table_ids_fall_back() {
        let metadata = XbfMetadata::default();
        let prefixes = HashMap::new();
        assert_eq!(
            type_name(&metadata, &NullFramework, &prefixes, 7),
            "UnknownType0x0007"
        );
        assert_eq!(
            property_name(&metadata, &NullFramework, 9),
            "UnknownProperty0x0009"
        );
    }

    #[test]
    fn test_enum_fallback_format() {
        assert_eq!(enum_value(&StubFramework, 0x2, 3), "Right");
        assert_eq!(enum_value(&NullFramework, 0x2, 3), "(Enum0x0002)3");
    }
}
