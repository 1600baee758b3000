//! The node stream interpreter.
//!
//! A byte-dispatched state machine over the node sections of an XBF v2
//! file. Three stacks carry the interpreter state: open roots, open objects
//! and open collections. Secondary node sections (styles, resource
//! dictionaries, data templates, deferred elements, visual states) are
//! reached through save/restore descents that must leave the cursor and both
//! value stacks exactly as they found them.

use crate::binxaml::disassembler::{Command, Disassembly};
use crate::binxaml::{name, value_variant};
use crate::err::{Result, XbfError};
use crate::framework::FrameworkResolver;
use crate::model::{XamlCollection, XamlCollectionRef, XamlObject, XamlObjectRef, XamlValue};
use crate::utils::{read_7bit_encoded_u32, read_len_prefixed_utf16_string};
use crate::xbf_metadata::{NodeSection, XbfMetadata};
use crate::xbf_parser::ParserSettings;

use byteorder::ReadBytesExt;
use log::{debug, trace, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Cursor;
use std::rc::Rc;

pub(crate) struct XbfDeserializer<'a> {
    cursor: Cursor<&'a [u8]>,
    metadata: &'a XbfMetadata,
    framework: &'a dyn FrameworkResolver,
    settings: &'a ParserSettings,

    /// XML namespace URI -> declared prefix, filled by root declarations.
    xmlns_prefixes: HashMap<String, String>,

    root_stack: Vec<XamlObjectRef>,
    object_stack: Vec<XamlObjectRef>,
    collection_stack: Vec<XamlCollectionRef>,

    /// Nesting depth of node section descents.
    section_depth: usize,
    /// Section the interpreter is currently dispatching in.
    current_section: usize,
    /// Position of the opcode whose handler is running, for error wrapping.
    dispatch_pos: u64,

    indent: usize,
    trace: Option<Disassembly>,
}

impl<'a> XbfDeserializer<'a> {
    pub(crate) fn new(
        data: &'a [u8],
        metadata: &'a XbfMetadata,
        framework: &'a dyn FrameworkResolver,
        settings: &'a ParserSettings,
        record_trace: bool,
    ) -> Self {
        XbfDeserializer {
            cursor: Cursor::new(data),
            metadata,
            framework,
            settings,
            xmlns_prefixes: HashMap::new(),
            root_stack: Vec::new(),
            object_stack: Vec::new(),
            collection_stack: Vec::new(),
            section_depth: 0,
            current_section: 0,
            dispatch_pos: 0,
            indent: 0,
            trace: record_trace.then(Disassembly::default),
        }
    }

    /// Parses node section 0 as a root and returns the assembled tree.
    pub(crate) fn read_root_node_section(mut self) -> Result<XamlObjectRef> {
        let (start, end) = self.root_section_bounds();
        self.cursor.set_position(start);
        self.current_section = 0;

        self.read_root(end)
            .map_err(|e| self.wrap_node_stream_error(e))?;

        if self.object_stack.len() != 1 || !self.collection_stack.is_empty() {
            return Err(XbfError::StackCorruption {
                detail: "root parse finished with unbalanced stacks",
            });
        }

        self.pop_object("root result")
    }

    /// Like `read_root_node_section`, but returns the recorded trace.
    pub(crate) fn disassemble_root_node_section(mut self) -> Result<Disassembly> {
        let (start, end) = self.root_section_bounds();
        self.cursor.set_position(start);
        self.current_section = 0;

        self.read_root(end)
            .map_err(|e| self.wrap_node_stream_error(e))?;

        Ok(self.trace.take().unwrap_or_default())
    }

    /// Disassembles an arbitrary node section. Secondary sections open with
    /// nested roots or bare nodes; both parse through the regular node frame.
    pub(crate) fn disassemble_node_section(mut self, index: usize) -> Result<Disassembly> {
        let section = self.section(index)?;
        let base = self.metadata.node_section_base;

        self.cursor
            .set_position(base + u64::from(section.node_offset));
        self.current_section = index;

        self.read_nodes(base + u64::from(section.positional_offset), false, false)
            .map_err(|e| self.wrap_node_stream_error(e))?;

        Ok(self.trace.take().unwrap_or_default())
    }

    fn root_section_bounds(&self) -> (u64, u64) {
        let base = self.metadata.node_section_base;
        match self.metadata.node_sections.first() {
            Some(section) => (
                base + u64::from(section.node_offset),
                base + u64::from(section.positional_offset),
            ),
            // No directory; treat everything after the metadata as section 0.
            None => (base, self.cursor.get_ref().len() as u64),
        }
    }

    // ---- root frame ------------------------------------------------------

    /// Reads root-frame opcodes (namespace declarations, class, root begin)
    /// and hands off to the node frame once the root type is known.
    ///
    /// The root is delimited by its own closing opcode, so the node frame
    /// never runs in single-object mode here; callers that wanted a single
    /// object treat the whole root as that object.
    fn read_root(&mut self, end: u64) -> Result<()> {
        let root = XamlObject::unresolved();
        self.root_stack.push(root.clone());
        self.object_stack.push(root.clone());
        self.collection_stack.push(root.borrow().children.clone());

        loop {
            if self.cursor.position() >= end {
                return Err(XbfError::UnexpectedEof {
                    offset: self.cursor.position(),
                    t: "root node stream opcode",
                });
            }

            let pos = self.cursor.position();
            self.dispatch_pos = pos;
            let op = try_read!(self.cursor, u8, "root node stream opcode")?;
            trace!("root opcode {op:#04x} at {pos}");

            match op {
                0x12 | 0x03 => {
                    let id_pos = self.cursor.position();
                    let namespace_id = try_read!(self.cursor, u16, "xml namespace id")?;
                    let uri = self.xml_namespace_uri(namespace_id, id_pos)?;
                    let prefix =
                        read_len_prefixed_utf16_string(&mut self.cursor, "xml namespace prefix")?;

                    let attribute = if prefix.is_empty() {
                        "xmlns".to_string()
                    } else {
                        format!("xmlns:{prefix}")
                    };

                    trace!("declaring {attribute}='{uri}'");
                    self.xmlns_prefixes.insert(uri.clone(), prefix);
                    self.record(pos, format!("rootns {attribute}='{uri}'"));
                    root.borrow_mut()
                        .append_property(attribute, XamlValue::String(uri));
                }
                0x0B => {
                    let class =
                        read_len_prefixed_utf16_string(&mut self.cursor, "root class name")?;
                    self.record(pos, format!("rootclass '{class}'"));
                    root.borrow_mut()
                        .append_property("x:Class", XamlValue::String(class));
                }
                0x17 => {
                    let type_id = try_read!(self.cursor, u16, "root type id")?;
                    let type_name = self.resolve_type(type_id);
                    root.borrow_mut().type_name = type_name.clone();

                    self.record(pos, format!("rootbegin {type_name}"));
                    self.inc_indent();

                    self.read_nodes(end, false, false)?;
                    self.root_stack.pop();
                    return Ok(());
                }
                other => return Err(XbfError::UnknownOpcode { value: other, offset: pos }),
            }
        }
    }

    // ---- node frame ------------------------------------------------------

    /// The main dispatch loop.
    ///
    /// `read_single_object` makes the frame return once the first object it
    /// opened is closed (used when a section offset points at one object);
    /// `read_single_node` returns after a single dispatched opcode (used for
    /// style setters that target an already-pushed object).
    fn read_nodes(
        &mut self,
        end: u64,
        read_single_object: bool,
        read_single_node: bool,
    ) -> Result<()> {
        let mut single_object: Option<XamlObjectRef> = None;

        while self.cursor.position() < end {
            let pos = self.cursor.position();
            self.dispatch_pos = pos;
            let op = try_read!(self.cursor, u8, "node stream opcode")?;
            trace!("opcode {op:#04x} at {pos}");

            match op {
                // Prologue byte at the start of some secondary sections.
                0x01 => self.record(pos, "prologue"),

                0x02 => {
                    self.pop_collection("collection end")?;
                    self.dec_indent();
                    self.record(pos, "collectionend");
                }

                0x04 => self.read_class_or_text(pos)?,

                0x07 | 0x20 => {
                    let property = self.read_property_name()?;
                    let value = self.pop_object("property value object")?;
                    self.record(pos, format!("setproperty {property}"));
                    self.current_object("property target")?
                        .borrow_mut()
                        .append_property(property, XamlValue::Object(value));
                }

                0x08 | 0x09 => {
                    let object = self.pop_object("collection item")?;
                    self.record(pos, "addobj");
                    self.current_collection("collection item target")?
                        .borrow_mut()
                        .items
                        .push(object);
                }

                0x0A => {
                    let object = self.pop_object("keyed collection item")?;
                    let key = self.read_value()?.to_string();
                    self.record(pos, format!("keyaddobj '{key}'"));
                    object.borrow_mut().key = Some(key);
                    self.current_collection("keyed collection target")?
                        .borrow_mut()
                        .items
                        .push(object);
                }

                0x0B => {
                    let class =
                        read_len_prefixed_utf16_string(&mut self.cursor, "class name")?;
                    self.record(pos, format!("class '{class}'"));
                    self.current_object("x:Class target")?
                        .borrow_mut()
                        .append_property("x:Class", XamlValue::String(class));
                }

                0x0C => {
                    let value_pos = self.cursor.position();
                    let value = self.read_value()?;
                    match value {
                        XamlValue::Int32(id) => {
                            self.record(pos, format!("connection {id}"));
                            self.current_object("connection id target")?
                                .borrow_mut()
                                .connection_id = Some(id);
                        }
                        _ => {
                            return Err(XbfError::UnexpectedByte {
                                value: u32::from(self.byte_at(value_pos)),
                                expected: "an i32 connection id value",
                                offset: value_pos,
                            })
                        }
                    }
                }

                0x0D => {
                    let name = self.read_value()?.to_string();
                    self.record(pos, format!("name '{name}'"));
                    self.current_object("x:Name target")?.borrow_mut().name = Some(name);
                }

                0x0E => {
                    let uid = self.read_value()?.to_string();
                    self.record(pos, format!("uid '{uid}'"));
                    self.current_object("x:Uid target")?.borrow_mut().uid = Some(uid);
                }

                0x0F => self.read_section_reference(pos)?,

                0x11 => self.read_data_template(pos)?,

                0x13 => {
                    let property = self.read_property_name()?;
                    let owner = self.current_object("collection owner")?;

                    let collection = Rc::new(RefCell::new(XamlCollection {
                        owner: Rc::downgrade(&owner),
                        owner_property: property.clone(),
                        items: Vec::new(),
                    }));

                    owner
                        .borrow_mut()
                        .append_property(property.clone(), XamlValue::Collection(collection.clone()));
                    self.collection_stack.push(collection);

                    self.record(pos, format!("collectionbegin {property}"));
                    self.inc_indent();
                }

                0x14 => {
                    let type_id = try_read!(self.cursor, u16, "object type id")?;
                    let type_name = self.resolve_type(type_id);

                    let object = XamlObject::new(type_name.clone());
                    self.object_stack.push(object.clone());
                    self.collection_stack.push(object.borrow().children.clone());

                    if read_single_object && single_object.is_none() {
                        single_object = Some(object);
                    }

                    self.record(pos, format!("objbegin {type_name}"));
                    self.inc_indent();
                }

                0x21 | 0x28 => {
                    let current = self.current_object("object end")?;

                    let closing_children = match self.collection_stack.last() {
                        Some(collection) => Rc::ptr_eq(collection, &current.borrow().children),
                        None => false,
                    };
                    if closing_children {
                        self.collection_stack.pop();
                    }

                    self.dec_indent();
                    self.record(pos, if op == 0x28 { "objend return" } else { "objend" });

                    if op == 0x28 {
                        return Ok(());
                    }
                    if let Some(single) = &single_object {
                        if Rc::ptr_eq(single, &current) {
                            return Ok(());
                        }
                    }
                    if let Some(root) = self.root_stack.last() {
                        if Rc::ptr_eq(root, &current) {
                            return Ok(());
                        }
                    }
                }

                0x15 | 0x16 => {
                    let type_id = try_read!(self.cursor, u16, "literal type id")?;
                    let type_name = self.resolve_type(type_id);
                    let value = self.read_value()?;

                    self.record(pos, format!("literal {type_name} '{value}'"));

                    let object = XamlObject::new(type_name);
                    object.borrow_mut().append_property("Value", value);
                    self.object_stack.push(object);
                }

                // A nested root inside the node frame; the opcode belongs to
                // the root frame, so rewind it.
                0x17 | 0x12 => {
                    self.record(pos, "nestedroot");
                    self.cursor.set_position(pos);
                    self.read_root(end)?;
                    if read_single_object {
                        return Ok(());
                    }
                }

                0x18 | 0x19 => {
                    let type_id = try_read!(self.cursor, u16, "created type id")?;
                    let type_name = self.resolve_type(type_id);
                    let argument = self.read_value()?;

                    self.record(pos, format!("createtype {type_name} '{argument}'"));

                    let current = self.current_object("created type target")?;
                    current
                        .borrow_mut()
                        .append_property("x:Class", XamlValue::String(type_name));
                    current.borrow_mut().append_property("x:Arguments", argument);
                }

                0x1A | 0x1B => {
                    let property = self.read_property_name()?;
                    let value = self.read_value()?;
                    self.record(pos, format!("property {property} = '{value}'"));
                    self.current_object("property target")?
                        .borrow_mut()
                        .append_property(property, value);
                }

                0x1C => {
                    let property = self.read_property_name()?;
                    let resolved = self.read_property_name()?;
                    self.record(pos, format!("resolvedproperty {property} = {resolved}"));
                    self.current_object("resolved property target")?
                        .borrow_mut()
                        .append_property(property, XamlValue::String(resolved));
                }

                0x1D => {
                    let property = self.read_property_name()?;
                    let type_id = try_read!(self.cursor, u16, "target type id")?;
                    let type_name = self.resolve_type(type_id);
                    self.record(pos, format!("targettype {type_name}"));
                    self.current_object("target type target")?
                        .borrow_mut()
                        .append_property(property, XamlValue::String(type_name));
                }

                0x1E => {
                    let property = self.read_property_name()?;
                    let value = self.read_value()?;
                    let markup = format!("{{StaticResource {value}}}");
                    self.record(pos, format!("staticresource {property} = '{markup}'"));
                    self.current_object("static resource target")?
                        .borrow_mut()
                        .append_property(property, XamlValue::String(markup));
                }

                0x1F => {
                    let property = self.read_property_name()?;
                    let path = self.read_property_name()?;
                    let markup = format!("{{TemplateBinding {path}}}");
                    self.record(pos, format!("templatebinding {property} = '{markup}'"));
                    self.current_object("template binding target")?
                        .borrow_mut()
                        .append_property(property, XamlValue::String(markup));
                }

                0x22 | 0x23 => {
                    let type_name = if op == 0x22 {
                        "StaticResource"
                    } else {
                        "ThemeResource"
                    };
                    let key = self.read_value()?;

                    self.record(pos, format!("resourceobj {type_name} '{key}'"));

                    let object = XamlObject::new(type_name);
                    object.borrow_mut().append_property("ResourceKey", key);
                    self.object_stack.push(object);

                    // These have no closing opcode.
                    if read_single_object {
                        return Ok(());
                    }
                }

                0x24 => {
                    let property = self.read_property_name()?;
                    let value = self.read_value()?;
                    let markup = format!("{{ThemeResource {value}}}");
                    self.record(pos, format!("themeresource {property} = '{markup}'"));
                    self.current_object("theme resource target")?
                        .borrow_mut()
                        .append_property(property, XamlValue::String(markup));
                }

                0x26 => {
                    let type_id = try_read!(self.cursor, u16, "conditional type id")?;
                    let type_name = self.resolve_type(type_id);
                    let argument = read_len_prefixed_utf16_string(
                        &mut self.cursor,
                        "conditional argument",
                    )?;
                    self.record(pos, format!("condbegin {type_name} '{argument}'"));
                    self.inc_indent();
                }

                0x27 => {
                    self.dec_indent();
                    self.record(pos, "condend");
                }

                // Observed once in the wild; best-effort pop.
                0x8B => {
                    warn!("opcode 0x8b at {pos}: popping object stack, semantics unverified");
                    self.object_stack.pop();
                    self.record(pos, "unknownpop");
                }

                other => return Err(XbfError::UnknownOpcode { value: other, offset: pos }),
            }

            if read_single_node {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Opcode 0x04 is overloaded three ways; the stacks decide which.
    fn read_class_or_text(&mut self, pos: u64) -> Result<()> {
        if !self.collection_is_current_children()? {
            // Text payload inside an explicitly opened collection, e.g. the
            // run text of TextBlock.Inlines.
            let value = self.read_value()?;
            self.record(pos, format!("verbatim '{value}'"));

            let object = XamlObject::new("Verbatim");
            object.borrow_mut().append_property("Value", value);
            self.object_stack.push(object);
        } else if self.current_is_root() {
            let value = self.read_value()?;
            self.record(pos, format!("class '{value}'"));
            self.current_object("x:Class target")?
                .borrow_mut()
                .append_property("x:Class", value);
        } else {
            // Class modifiers ("public") and event handler names; only the
            // trace keeps them.
            let value = self.read_value()?;
            debug!("discarding directive payload '{value}' at {pos}");
            self.record(pos, format!("directive '{value}'"));
        }

        Ok(())
    }

    /// Opcode 0x0F: a reference into another node section, with the payload
    /// layout selected by the section kind.
    fn read_section_reference(&mut self, pos: u64) -> Result<()> {
        let section_index =
            read_7bit_encoded_u32(&mut self.cursor, "node section index")? as usize;

        let padding_pos = self.cursor.position();
        let padding = try_read!(self.cursor, u16, "node section reference padding")?;
        if padding != 0 {
            return Err(XbfError::UnexpectedByte {
                value: u32::from(padding),
                expected: "zero padding after a node section index",
                offset: padding_pos,
            });
        }

        let kind_pos = self.cursor.position();
        let kind = read_7bit_encoded_u32(&mut self.cursor, "node section kind")?;

        self.record(pos, format!("refsection {section_index} kind {kind}"));
        self.inc_indent();

        match kind {
            2 | 8 => self.read_style(section_index, false)?,
            11 => self.read_style(section_index, true)?,
            7 => self.read_resource_dictionary(section_index, false, false)?,
            371 => self.read_resource_dictionary(section_index, true, false)?,
            10 => self.read_resource_dictionary(section_index, true, true)?,
            5 => {
                self.skip_visual_state_bytes()?;
                self.read_node_section(section_index)?;
            }
            6 => self.read_deferred_element(section_index, true, false)?,
            746 => self.read_deferred_element(section_index, false, false)?,
            9 => self.read_deferred_element(section_index, true, true)?,
            other => {
                return Err(XbfError::UnknownSectionKind {
                    kind: other,
                    offset: kind_pos,
                })
            }
        }

        self.dec_indent();
        let end_pos = self.cursor.position();
        self.record(end_pos, "refsectionend");
        Ok(())
    }

    /// Opcode 0x11: a DataTemplate whose content lives in another section.
    fn read_data_template(&mut self, pos: u64) -> Result<()> {
        let property = self.read_property_name()?;
        let section_index =
            read_7bit_encoded_u32(&mut self.cursor, "data template section index")? as usize;

        let static_count =
            read_7bit_encoded_u32(&mut self.cursor, "static resource count")?;
        let theme_count = read_7bit_encoded_u32(&mut self.cursor, "theme resource count")?;
        for _ in 0..static_count.saturating_add(theme_count) {
            let _ = try_read!(self.cursor, u16, "template resource name id")?;
        }

        self.record(pos, format!("datatemplate {property} section {section_index}"));
        self.inc_indent();
        let result = self.read_node_section(section_index);
        self.dec_indent();
        result?;

        let content = self.pop_object("data template content")?;
        self.current_object("data template target")?
            .borrow_mut()
            .append_property(property, XamlValue::Object(content));
        Ok(())
    }

    // ---- style / resource dictionary / deferred / visual state -----------

    /// Setter list of a Style. Property name (and optional implementing
    /// type) come first, then either an inline value or an offset into the
    /// referenced section.
    fn read_style(&mut self, section_index: usize, extended: bool) -> Result<()> {
        let setter_count = read_7bit_encoded_u32(&mut self.cursor, "style setter count")?;

        for _ in 0..setter_count {
            let pos = self.cursor.position();
            let setter_type = try_read!(self.cursor, u8, "style setter type")?;

            match setter_type {
                // Resource-valued setters; the referenced node assigns the
                // value to the setter we push.
                0x01 | 0x02 | 0x11 | 0x12 => {
                    let property = if setter_type & 0x10 != 0 {
                        self.read_property_name()?
                    } else {
                        let id_pos = self.cursor.position();
                        let name_id = try_read!(self.cursor, u16, "setter property string id")?;
                        let property = self.table_string(name_id, id_pos)?;
                        let type_id =
                            try_read!(self.cursor, u16, "setter implementing type id")?;
                        format!("{}.{property}", self.resolve_type(type_id))
                    };

                    let offset = read_7bit_encoded_u32(&mut self.cursor, "setter offset")?;
                    self.record(pos, format!("stylesetter {setter_type:#04x} {property}"));

                    let setter = self.new_setter(&property);
                    self.object_stack.push(setter.clone());
                    let result = self.read_node_in_node_section(section_index, offset);
                    self.object_stack.pop();
                    result?;

                    self.current_collection("style setter target")?
                        .borrow_mut()
                        .items
                        .push(setter);
                }

                // Object- and inline-valued setters.
                0x08 | 0x18 | 0x20 | 0x30 => {
                    let mut property = self.read_property_name()?;
                    if setter_type & 0x10 != 0 {
                        let type_id =
                            try_read!(self.cursor, u16, "setter implementing type id")?;
                        property = format!("{}.{property}", self.resolve_type(type_id));
                    }

                    let value = if setter_type & 0x20 != 0 {
                        let value = self.read_value()?;
                        self.record(
                            pos,
                            format!("stylesetter {setter_type:#04x} {property} = '{value}'"),
                        );
                        value
                    } else {
                        let offset = read_7bit_encoded_u32(&mut self.cursor, "setter offset")?;
                        self.record(pos, format!("stylesetter {setter_type:#04x} {property}"));
                        XamlValue::Object(self.read_object_in_node_section(section_index, offset)?)
                    };

                    let setter = self.new_setter(&property);
                    setter.borrow_mut().append_property("Value", value);
                    self.current_collection("style setter target")?
                        .borrow_mut()
                        .items
                        .push(setter);
                }

                // The referenced object already is a complete Setter.
                0x40 | 0x50 | 0xC0 | 0xD0 => {
                    if setter_type & 0x80 != 0 {
                        let marker_pos = self.cursor.position();
                        let marker =
                            read_7bit_encoded_u32(&mut self.cursor, "setter marker")?;
                        if marker != 1 {
                            return Err(XbfError::UnexpectedByte {
                                value: marker,
                                expected: "a marker equal to one before the setter offset",
                                offset: marker_pos,
                            });
                        }
                    }
                    if !extended {
                        let _property = self.read_property_name()?;
                    }

                    let offset = read_7bit_encoded_u32(&mut self.cursor, "setter offset")?;
                    self.record(pos, format!("stylesetter {setter_type:#04x}"));

                    let setter = self.read_object_in_node_section(section_index, offset)?;
                    self.current_collection("style setter target")?
                        .borrow_mut()
                        .items
                        .push(setter);
                }

                other => {
                    return Err(XbfError::UnexpectedByte {
                        value: u32::from(other),
                        expected: "a known style setter type",
                        offset: pos,
                    })
                }
            }
        }

        if extended {
            let trailer_pos = self.cursor.position();
            let trailer = read_7bit_encoded_u32(&mut self.cursor, "style trailer")?;
            if trailer != 0 {
                return Err(XbfError::UnexpectedByte {
                    value: trailer,
                    expected: "a zero trailer after extended style setters",
                    offset: trailer_pos,
                });
            }
        }

        Ok(())
    }

    /// Keyed resources and target-typed styles of a ResourceDictionary.
    fn read_resource_dictionary(
        &mut self,
        section_index: usize,
        extended: bool,
        extended2: bool,
    ) -> Result<()> {
        let resource_count =
            read_7bit_encoded_u32(&mut self.cursor, "keyed resource count")?;
        for _ in 0..resource_count {
            let pos = self.cursor.position();
            let key_id = try_read!(self.cursor, u16, "resource key string id")?;
            let key = self.table_string(key_id, pos)?;
            let offset = read_7bit_encoded_u32(&mut self.cursor, "resource offset")?;

            self.record(pos, format!("resource '{key}'"));

            let object = self.read_object_in_node_section(section_index, offset)?;
            object.borrow_mut().key = Some(key);
            self.current_collection("resource dictionary target")?
                .borrow_mut()
                .items
                .push(object);
        }

        self.skip_key_subset("resource key subset")?;

        let style_count =
            read_7bit_encoded_u32(&mut self.cursor, "target typed style count")?;
        for _ in 0..style_count {
            let pos = self.cursor.position();
            let type_id = try_read!(self.cursor, u16, "style target type string id")?;
            let target_type = self.table_string(type_id, pos)?;
            let offset = read_7bit_encoded_u32(&mut self.cursor, "style offset")?;

            self.record(pos, format!("resourcestyle '{target_type}'"));

            let object = self.read_object_in_node_section(section_index, offset)?;
            object.borrow_mut().key = Some(target_type);
            self.current_collection("resource dictionary target")?
                .borrow_mut()
                .items
                .push(object);
        }

        if extended2 {
            // Placeholders for extensions this reader does not know.
            for _ in 0..3 {
                let value =
                    read_7bit_encoded_u32(&mut self.cursor, "resource dictionary extension")?;
                if value != 0 {
                    return Err(XbfError::UnsupportedFeature {
                        name: "resource dictionary extension data",
                    });
                }
            }
        } else {
            if extended {
                let marker_pos = self.cursor.position();
                let marker =
                    read_7bit_encoded_u32(&mut self.cursor, "resource dictionary marker")?;
                if marker != 0 {
                    return Err(XbfError::UnexpectedByte {
                        value: marker,
                        expected: "a zero resource dictionary marker",
                        offset: marker_pos,
                    });
                }
            }
            self.skip_key_subset("resource key subset")?;
        }

        Ok(())
    }

    /// Key ids repeated after the resource list; only the trace keeps them.
    fn skip_key_subset(&mut self, what: &'static str) -> Result<()> {
        let pos = self.cursor.position();
        let count = read_7bit_encoded_u32(&mut self.cursor, what)?;
        for _ in 0..count {
            let _ = try_read!(self.cursor, u16, what)?;
        }
        if count > 0 {
            self.record(pos, format!("keysubset {count}"));
        }
        Ok(())
    }

    /// An element whose realization is deferred to another section.
    fn read_deferred_element(
        &mut self,
        section_index: usize,
        extended: bool,
        extended2: bool,
    ) -> Result<()> {
        let pos = self.cursor.position();
        let name_id = try_read!(self.cursor, u16, "deferred element name id")?;
        let name = self.table_string(name_id, pos)?;
        self.record(pos, format!("deferred '{name}'"));

        if extended {
            // The same assignments reappear inside the referenced section.
            let count = read_7bit_encoded_u32(&mut self.cursor, "deferred property count")?;
            for _ in 0..count {
                let property_pos = self.cursor.position();
                let property = self.read_property_name()?;
                let value = self.read_value()?;
                self.record(
                    property_pos,
                    format!("deferredproperty {property} = '{value}'"),
                );
            }
        }

        self.read_node_section(section_index)?;

        let child = self.pop_object("deferred element content")?;
        let target = self.current_object("deferred element target")?;
        let children = target.borrow().children.clone();
        children.borrow_mut().items.push(child);

        if extended2 {
            let _ = read_7bit_encoded_u32(&mut self.cursor, "deferred element trailer")?;
        }

        Ok(())
    }

    /// Metadata block preceding the nodes of a visual state section.
    ///
    /// Nothing in here is extracted, but the structure has to be consumed
    /// positionally; values are only checked where they have been observed
    /// to be constant.
    fn skip_visual_state_bytes(&mut self) -> Result<()> {
        let start = self.cursor.position();

        let state_count = read_7bit_encoded_u32(&mut self.cursor, "visual state count")?;
        for _ in 0..state_count {
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state group membership")?;
        }

        let recount_pos = self.cursor.position();
        let state_recount = read_7bit_encoded_u32(&mut self.cursor, "visual state count")?;
        if state_recount != state_count {
            return Err(XbfError::UnexpectedByte {
                value: state_recount,
                expected: "a visual state count matching the first",
                offset: recount_pos,
            });
        }

        for _ in 0..state_count {
            let _name_id = try_read!(self.cursor, u16, "visual state name id")?;
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state data")?;
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state data")?;

            let setter_count =
                read_7bit_encoded_u32(&mut self.cursor, "visual state setter count")?;
            for _ in 0..setter_count {
                let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state setter offset")?;
            }

            let adaptive_count =
                read_7bit_encoded_u32(&mut self.cursor, "adaptive trigger count")?;
            for _ in 0..adaptive_count {
                let inner_count =
                    read_7bit_encoded_u32(&mut self.cursor, "adaptive trigger value count")?;
                for _ in 0..inner_count {
                    let _ = read_7bit_encoded_u32(&mut self.cursor, "adaptive trigger value")?;
                }
            }

            let trigger_count =
                read_7bit_encoded_u32(&mut self.cursor, "state trigger count")?;
            for _ in 0..trigger_count {
                let _ = read_7bit_encoded_u32(&mut self.cursor, "state trigger offset")?;
            }

            // Observed 0 or 2.
            let offset_count =
                read_7bit_encoded_u32(&mut self.cursor, "visual state offset count")?;
            for _ in 0..offset_count {
                let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state offset")?;
            }

            let trailer_pos = self.cursor.position();
            let trailer = read_7bit_encoded_u32(&mut self.cursor, "visual state trailer")?;
            if trailer != 0 {
                return Err(XbfError::UnexpectedByte {
                    value: trailer,
                    expected: "a zero visual state trailer",
                    offset: trailer_pos,
                });
            }
        }

        let group_count = read_7bit_encoded_u32(&mut self.cursor, "visual state group count")?;
        for _ in 0..group_count {
            let _name_id = try_read!(self.cursor, u16, "visual state group name id")?;
            // Observed 1 or 2.
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state group data")?;
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state group offset")?;
        }

        let transition_count =
            read_7bit_encoded_u32(&mut self.cursor, "visual transition count")?;
        for _ in 0..transition_count {
            let _to = try_read!(self.cursor, u16, "visual transition to")?;
            let _from = try_read!(self.cursor, u16, "visual transition from")?;
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual transition offset")?;
        }

        // Observed 1 or 2.
        let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state tail")?;

        let tail_count = read_7bit_encoded_u32(&mut self.cursor, "visual state tail count")?;
        for _ in 0..tail_count {
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state tail data")?;
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state tail data")?;
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state tail data")?;
        }

        let tail_count2 = read_7bit_encoded_u32(&mut self.cursor, "visual state tail count")?;
        for _ in 0..tail_count2 {
            let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state tail data")?;
        }

        let _ = read_7bit_encoded_u32(&mut self.cursor, "visual state tail")?;

        let string_count =
            read_7bit_encoded_u32(&mut self.cursor, "visual state string count")?;
        for _ in 0..string_count {
            let _ = try_read!(self.cursor, u16, "visual state string id")?;
        }

        debug!(
            "skipped visual state metadata at {start} ({state_count} states, {group_count} groups)"
        );
        self.record(start, "visualstates");
        Ok(())
    }

    // ---- section recursion ----------------------------------------------

    fn section(&self, index: usize) -> Result<NodeSection> {
        self.metadata
            .node_sections
            .get(index)
            .copied()
            .ok_or(XbfError::UnexpectedByte {
                value: index as u32,
                expected: "a node section index within the directory",
                offset: self.dispatch_pos,
            })
    }

    fn enter_section(&mut self) -> Result<()> {
        let limit = self.settings.section_depth_limit();
        self.section_depth += 1;
        if self.section_depth > limit {
            self.section_depth -= 1;
            return Err(XbfError::DepthExceeded { limit });
        }
        Ok(())
    }

    fn leave_section(&mut self) {
        self.section_depth = self.section_depth.saturating_sub(1);
    }

    /// Executes an entire section against the current stacks, then restores
    /// the cursor.
    fn read_node_section(&mut self, section_index: usize) -> Result<()> {
        let section = self.section(section_index)?;
        self.enter_section()?;

        let saved_pos = self.cursor.position();
        let saved_section = self.current_section;
        let base = self.metadata.node_section_base;

        self.cursor
            .set_position(base + u64::from(section.node_offset));
        self.current_section = section_index;

        let result = self.read_nodes(base + u64::from(section.positional_offset), false, false);

        self.cursor.set_position(saved_pos);
        self.current_section = saved_section;
        self.leave_section();
        result
    }

    /// Reads the single object starting at `offset` within a section and
    /// returns it; stack depths must come back unchanged.
    fn read_object_in_node_section(
        &mut self,
        section_index: usize,
        offset: u32,
    ) -> Result<XamlObjectRef> {
        let section = self.section(section_index)?;
        self.enter_section()?;

        let saved_pos = self.cursor.position();
        let saved_section = self.current_section;
        let object_depth = self.object_stack.len();
        let collection_depth = self.collection_stack.len();
        let base = self.metadata.node_section_base;

        self.cursor
            .set_position(base + u64::from(section.node_offset) + u64::from(offset));
        self.current_section = section_index;

        let result = self.read_nodes(u64::MAX, true, false);

        self.cursor.set_position(saved_pos);
        self.current_section = saved_section;
        self.leave_section();
        result?;

        let object = self.pop_object("node section object")?;
        if self.object_stack.len() != object_depth
            || self.collection_stack.len() != collection_depth
        {
            return Err(XbfError::StackCorruption {
                detail: "node section recursion left extra stack entries",
            });
        }

        Ok(object)
    }

    /// Executes a single node at `offset` within a section against whatever
    /// is currently on the stacks.
    fn read_node_in_node_section(&mut self, section_index: usize, offset: u32) -> Result<()> {
        let section = self.section(section_index)?;
        self.enter_section()?;

        let saved_pos = self.cursor.position();
        let saved_section = self.current_section;
        let object_depth = self.object_stack.len();
        let collection_depth = self.collection_stack.len();
        let base = self.metadata.node_section_base;

        self.cursor
            .set_position(base + u64::from(section.node_offset) + u64::from(offset));
        self.current_section = section_index;

        let result = self.read_nodes(u64::MAX, false, true);

        self.cursor.set_position(saved_pos);
        self.current_section = saved_section;
        self.leave_section();
        result?;

        if self.object_stack.len() != object_depth
            || self.collection_stack.len() != collection_depth
        {
            return Err(XbfError::StackCorruption {
                detail: "single node recursion changed stack depth",
            });
        }

        Ok(())
    }

    // ---- helpers ---------------------------------------------------------

    fn current_object(&self, what: &'static str) -> Result<XamlObjectRef> {
        self.object_stack
            .last()
            .cloned()
            .ok_or(XbfError::StackCorruption { detail: what })
    }

    fn pop_object(&mut self, what: &'static str) -> Result<XamlObjectRef> {
        self.object_stack
            .pop()
            .ok_or(XbfError::StackCorruption { detail: what })
    }

    fn current_collection(&self, what: &'static str) -> Result<XamlCollectionRef> {
        self.collection_stack
            .last()
            .cloned()
            .ok_or(XbfError::StackCorruption { detail: what })
    }

    fn pop_collection(&mut self, what: &'static str) -> Result<XamlCollectionRef> {
        self.collection_stack
            .pop()
            .ok_or(XbfError::StackCorruption { detail: what })
    }

    /// Whether the open collection is the open object's implicit children.
    fn collection_is_current_children(&self) -> Result<bool> {
        let collection = self.current_collection("collection context")?;
        let object = self.current_object("object context")?;
        let is_children = Rc::ptr_eq(&collection, &object.borrow().children);
        Ok(is_children)
    }

    fn current_is_root(&self) -> bool {
        match (self.object_stack.last(), self.root_stack.last()) {
            (Some(object), Some(root)) => Rc::ptr_eq(object, root),
            _ => false,
        }
    }

    fn new_setter(&self, property: &str) -> XamlObjectRef {
        let setter = XamlObject::new("Setter");
        setter
            .borrow_mut()
            .append_property("Property", XamlValue::String(property.to_string()));
        setter
    }

    fn resolve_type(&self, id: u16) -> String {
        name::type_name(self.metadata, self.framework, &self.xmlns_prefixes, id)
    }

    fn read_property_name(&mut self) -> Result<String> {
        let id = try_read!(self.cursor, u16, "property id")?;
        Ok(name::property_name(self.metadata, self.framework, id))
    }

    fn read_value(&mut self) -> Result<XamlValue> {
        value_variant::read_value(&mut self.cursor, self.metadata, self.framework)
    }

    fn xml_namespace_uri(&self, id: u16, pos: u64) -> Result<String> {
        self.metadata
            .xml_namespaces
            .get(usize::from(id))
            .and_then(|namespace| self.metadata.string(namespace.name_id))
            .map(str::to_string)
            .ok_or(XbfError::UnexpectedByte {
                value: u32::from(id),
                expected: "an xml namespace table index",
                offset: pos,
            })
    }

    fn table_string(&self, id: u16, pos: u64) -> Result<String> {
        self.metadata
            .string(i32::from(id))
            .map(str::to_string)
            .ok_or(XbfError::UnexpectedByte {
                value: u32::from(id),
                expected: "a string table index",
                offset: pos,
            })
    }

    fn byte_at(&self, pos: u64) -> u8 {
        self.cursor
            .get_ref()
            .get(pos as usize)
            .copied()
            .unwrap_or(0)
    }

    fn wrap_node_stream_error(&self, error: XbfError) -> XbfError {
        match error {
            wrapped @ XbfError::NodeStream { .. } => wrapped,
            inner => XbfError::NodeStream {
                position: self.dispatch_pos,
                section_base: self.metadata.node_section_base,
                source: Box::new(inner),
            },
        }
    }

    fn inc_indent(&mut self) {
        self.indent += 1;
    }

    fn dec_indent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    /// Appends a trace command covering the bytes from `start` to the
    /// current position; stack snapshots are deep copies.
    fn record(&mut self, start: u64, text: impl Into<String>) {
        if self.trace.is_none() {
            return;
        }

        let end = (self.cursor.position() as usize).min(self.cursor.get_ref().len());
        let from = (start as usize).min(end);
        let bytes = self.cursor.get_ref()[from..end].to_vec();

        let object_stack = self
            .object_stack
            .iter()
            .map(|object| object.borrow().deep_clone())
            .collect();
        let collection_stack = self
            .collection_stack
            .iter()
            .map(|collection| collection.borrow().deep_clone())
            .collect();

        let command = Command {
            position: start,
            bytes,
            node_section: self.current_section,
            text: text.into(),
            object_stack,
            collection_stack,
            indent: self.indent,
        };

        if let Some(trace) = self.trace.as_mut() {
            trace.commands.push(command);
        }
    }
}
