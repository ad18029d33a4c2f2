//! Typed header fields and the converters that map them to and from
//! their on-wire representation.

mod commented;
mod converter;
mod date;
mod list;
mod parameterized;

use std::fmt;

use indexmap::IndexMap;

use crate::scan::ParseError;

pub use commented::{CommentedValue, CommentedValueConverter};
pub use converter::{needs_quoting, quote, Converter, IntConverter, StringConverter, UnquotedStringConverter};
pub use date::DateConverter;
pub use list::{contains_ignore_case, remove_ignore_case, ListConverter};
pub use parameterized::{sort_by_weight, ParamValueConverter, ParameterizedValue};

// Canonical-cased names of the fields the codec itself inspects.
pub const CONNECTION: &str = "Connection";
pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const DATE: &str = "Date";
pub const EXPECT: &str = "Expect";
pub const HOST: &str = "Host";
pub const TRAILER: &str = "Trailer";
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const UPGRADE: &str = "Upgrade";

/// A single header field: a name and its raw on-wire value.
///
/// The name keeps the casing it was created with for output, but compares
/// and hashes case-insensitively. Typed access goes through a converter.
#[derive(Debug, Clone)]
pub struct HttpField {
    name: String,
    value: String,
}

impl HttpField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Decodes the raw value through the given converter.
    pub fn typed<C: Converter>(&self, converter: &C) -> Result<C::Value, ParseError> {
        converter.from_field_value(&self.value)
    }
}

impl PartialEq for HttpField {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name) && self.value == other.value
    }
}

impl Eq for HttpField {}

impl fmt::Display for HttpField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Header fields of a message, keyed case-insensitively and iterated in
/// insertion order. Each name maps to at most one field; repeated wire
/// instances of a name are collapsed into a comma separated list value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: IndexMap<String, HttpField>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(&name.to_ascii_lowercase())
    }

    pub fn get(&self, name: &str) -> Option<&HttpField> {
        self.fields.get(&name.to_ascii_lowercase())
    }

    /// Decoded typed value of the named field, or `None` when absent.
    pub fn get_typed<C: Converter>(
        &self,
        name: &str,
        converter: &C,
    ) -> Result<Option<C::Value>, ParseError> {
        self.get(name).map(|field| field.typed(converter)).transpose()
    }

    /// Sets a field from its raw value, replacing any existing field with
    /// the same name while keeping its position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.set_field(HttpField::new(name, value));
    }

    /// Sets a pre-built field.
    pub fn set_field(&mut self, field: HttpField) {
        self.fields.insert(field.name().to_ascii_lowercase(), field);
    }

    /// Sets a field by serializing a typed value through a converter.
    pub fn set_typed<C: Converter>(&mut self, name: impl Into<String>, value: &C::Value, converter: &C) {
        let name = name.into();
        let value = converter.as_field_value(value);
        self.set_field(HttpField::new(name, value));
    }

    /// Adds a wire instance of a field. When the name already exists the
    /// new value is appended comma separated, preserving insertion order.
    pub fn append(&mut self, name: impl Into<String>, value: impl AsRef<str>) {
        let name = name.into();
        match self.fields.get_mut(&name.to_ascii_lowercase()) {
            Some(existing) => {
                existing.value.push_str(", ");
                existing.value.push_str(value.as_ref());
            }
            None => self.set(name, value.as_ref()),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<HttpField> {
        self.fields.shift_remove(&name.to_ascii_lowercase())
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &HttpField> {
        self.fields.values()
    }
}

impl<'a> IntoIterator for &'a FieldMap {
    type Item = &'a HttpField;
    type IntoIter = indexmap::map::Values<'a, String, HttpField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.values()
    }
}
