//! Linear trace of node stream execution.
//!
//! One `Command` per executed opcode (plus synthetic section markers), in
//! dispatch order. Stack snapshots are deep copies taken at capture time so
//! later interpreter mutation cannot corrupt a recorded command.

use crate::model::{XamlCollectionRef, XamlObjectRef};

use std::fmt;

#[derive(Debug, Clone)]
pub struct Command {
    /// Absolute file position of the opcode byte.
    pub position: u64,
    /// Bytes consumed by the opcode and its inline operands.
    pub bytes: Vec<u8>,
    /// Node section the command was dispatched in.
    pub node_section: usize,
    /// Rendered mnemonic and operands.
    pub text: String,
    pub object_stack: Vec<XamlObjectRef>,
    pub collection_stack: Vec<XamlCollectionRef>,
    /// Logical nesting depth at dispatch.
    pub indent: usize,
}

#[derive(Debug, Default)]
pub struct Disassembly {
    pub commands: Vec<Command>,
}

const MAX_RENDERED_BYTES: usize = 12;

fn format_bytes(bytes: &[u8]) -> String {
    let mut rendered = bytes
        .iter()
        .take(MAX_RENDERED_BYTES)
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(" ");

    if bytes.len() > MAX_RENDERED_BYTES {
        rendered.push_str(" ..");
    }

    rendered
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X} [{}] {:<36} {}{}",
            self.position,
            self.node_section,
            format_bytes(&self.bytes),
            "  ".repeat(self.indent),
            self.text
        )
    }
}

impl fmt::Display for Disassembly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for command in &self.commands {
            writeln!(f, "{command}")?;
        }
        Ok(())
    }
}
