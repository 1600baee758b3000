//! The reconstructed XAML object tree.
//!
//! Objects own their children exclusively, so the graph is acyclic;
//! collections back-reference their owner through a `Weak` handle to keep it
//! that way for downstream serializers.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

pub type XamlObjectRef = Rc<RefCell<XamlObject>>;
pub type XamlCollectionRef = Rc<RefCell<XamlCollection>>;

/// A single element of the reconstructed tree.
#[derive(Debug, PartialEq)]
pub struct XamlObject {
    pub type_name: String,
    pub name: Option<String>,
    pub uid: Option<String>,
    pub key: Option<String>,
    pub connection_id: Option<i32>,
    /// Properties in stream order; duplicates are preserved as emitted.
    pub properties: Vec<(String, XamlValue)>,
    pub children: XamlCollectionRef,
}

/// An ordered object collection belonging to `owner`'s `owner_property`.
#[derive(Debug, Default)]
pub struct XamlCollection {
    pub owner: Weak<RefCell<XamlObject>>,
    pub owner_property: String,
    pub items: Vec<XamlObjectRef>,
}

/// A property value: an inline scalar, a nested object, or a
/// collection-valued property such as `TextBlock.Inlines`.
#[derive(Debug, PartialEq, Clone)]
pub enum XamlValue {
    Bool(bool),
    Int32(i32),
    Float(f32),
    String(String),
    Object(XamlObjectRef),
    Collection(XamlCollectionRef),
}

impl XamlObject {
    pub fn new(type_name: impl Into<String>) -> XamlObjectRef {
        let children = Rc::new(RefCell::new(XamlCollection {
            owner: Weak::new(),
            owner_property: "Children".to_string(),
            items: Vec::new(),
        }));

        let object = Rc::new(RefCell::new(XamlObject {
            type_name: type_name.into(),
            name: None,
            uid: None,
            key: None,
            connection_id: None,
            properties: Vec::new(),
            children: children.clone(),
        }));

        children.borrow_mut().owner = Rc::downgrade(&object);
        object
    }

    /// Placeholder for a root whose type arrives with a later opcode.
    pub(crate) fn unresolved() -> XamlObjectRef {
        XamlObject::new(String::new())
    }

    pub fn append_property(&mut self, name: impl Into<String>, value: XamlValue) {
        self.properties.push((name.into(), value));
    }

    /// First property with the given name, if any.
    pub fn property(&self, name: &str) -> Option<&XamlValue> {
        self.properties
            .iter()
            .find(|(property, _)| property == name)
            .map(|(_, value)| value)
    }

    /// Fully independent copy of this object and everything below it.
    pub fn deep_clone(&self) -> XamlObjectRef {
        let clone = XamlObject::new(self.type_name.clone());

        let children = self.children.borrow().deep_clone();
        children.borrow_mut().owner = Rc::downgrade(&clone);

        {
            let mut inner = clone.borrow_mut();
            inner.name = self.name.clone();
            inner.uid = self.uid.clone();
            inner.key = self.key.clone();
            inner.connection_id = self.connection_id;
            inner.properties = self
                .properties
                .iter()
                .map(|(name, value)| (name.clone(), value.deep_clone()))
                .collect();
            inner.children = children;
        }

        clone
    }
}

impl XamlCollection {
    pub fn deep_clone(&self) -> XamlCollectionRef {
        Rc::new(RefCell::new(XamlCollection {
            owner: Weak::new(),
            owner_property: self.owner_property.clone(),
            items: self
                .items
                .iter()
                .map(|item| item.borrow().deep_clone())
                .collect(),
        }))
    }
}

// The owner backref is identity, not state; comparisons skip it.
impl PartialEq for XamlCollection {
    fn eq(&self, other: &Self) -> bool {
        self.owner_property == other.owner_property && self.items == other.items
    }
}

impl XamlValue {
    pub fn deep_clone(&self) -> XamlValue {
        match self {
            XamlValue::Object(object) => XamlValue::Object(object.borrow().deep_clone()),
            XamlValue::Collection(collection) => {
                XamlValue::Collection(collection.borrow().deep_clone())
            }
            scalar => scalar.clone(),
        }
    }
}

impl fmt::Display for XamlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XamlValue::Bool(true) => f.write_str("True"),
            XamlValue::Bool(false) => f.write_str("False"),
            XamlValue::Int32(value) => write!(f, "{value}"),
            XamlValue::Float(value) => write!(f, "{value}"),
            XamlValue::String(value) => f.write_str(value),
            XamlValue::Object(object) => write!(f, "[{}]", object.borrow().type_name),
            XamlValue::Collection(collection) => {
                write!(f, "[{}]", collection.borrow().owner_property)
            }
        }
    }
}
