#![deny(unused_must_use)]
#![forbid(unsafe_code)]
// Don't allow dbg! prints in release.
#![cfg_attr(not(debug_assertions), deny(clippy::dbg_macro))]
#[macro_use]
extern crate bitflags;

#[macro_use]
mod macros;

pub use binxaml::disassembler::{Command, Disassembly};
pub use binxaml::value_variant::XbfValueKind;
pub use framework::{FrameworkResolver, NullFramework};
pub use model::{
    XamlCollection, XamlCollectionRef, XamlObject, XamlObjectRef, XamlValue,
};
pub use xbf_file_header::XbfFileHeader;
pub use xbf_metadata::{
    AssemblyKind, NodeSection, PropertyFlags, TypeFlags, XbfAssembly, XbfMetadata, XbfProperty,
    XbfType, XbfTypeNamespace, XbfXmlNamespace,
};
pub use xbf_parser::{ParserSettings, XbfParser, DEFAULT_SECTION_DEPTH_LIMIT};

pub mod binxaml;
pub mod err;
pub mod model;

mod framework;
mod utils;
mod xbf_file_header;
mod xbf_metadata;
mod xbf_parser;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

// Cannot use `cfg(test)` here since `rustdoc` won't look at it.
#[cfg(debug_assertions)]
mod test_readme {
    macro_rules! calculated_doc {
        ($doc:expr, $id:ident) => {
            #[doc = $doc]
            enum $id {}
        };
    }

    calculated_doc!(include_str!("../README.md"), _DoctestReadme);
}
