use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::fields::converter::{Converter, StringConverter};
use crate::scan::{ListItemizer, ParseError, Scanner};

/// A value with attached parameters, such as `value; param1=v1; param2=v2`.
///
/// Parameter names are folded to lower case; parameter values preserve
/// their case. The value is immutable once constructed; use the
/// `with_parameter` chaining constructor to build parameterized variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterizedValue<U> {
    value: U,
    params: IndexMap<String, String>,
}

impl<U> ParameterizedValue<U> {
    /// Creates a new value without parameters.
    pub fn new(value: U) -> Self {
        Self { value, params: IndexMap::new() }
    }

    /// Adds a parameter, replacing any previous one with the same
    /// (case-insensitive) name.
    pub fn with_parameter(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.params.insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn value(&self) -> &U {
        &self.value
    }

    pub fn into_value(self) -> U {
        self.value
    }

    /// Looks up a parameter by case-insensitive name.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.params.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Parameters in insertion order.
    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `q` parameter interpreted as a weight, defaulting to 1.0 when
    /// absent or unparseable. Values are clamped to [0.0, 1.0].
    pub fn weight(&self) -> f32 {
        self.parameter("q")
            .and_then(|q| q.trim().parse::<f32>().ok())
            .map(|q| q.clamp(0.0, 1.0))
            .unwrap_or(1.0)
    }

    fn from_parts(value: U, params: IndexMap<String, String>) -> Self {
        Self { value, params }
    }
}

/// Sorts a slice of parameterized values by descending weight. The sort is
/// stable; values without a `q` parameter order before any value that has
/// one, matching content-negotiation conventions.
pub fn sort_by_weight<U>(items: &mut [ParameterizedValue<U>]) {
    items.sort_by(|a, b| match (a.parameter("q"), b.parameter("q")) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(_), Some(_)) => b
            .weight()
            .partial_cmp(&a.weight())
            .unwrap_or(Ordering::Equal),
    });
}

/// Converter for [`ParameterizedValue`], splitting on `;` outside quoted
/// strings and delegating the head item to the inner converter. Parameter
/// values are quoted on output when they are not plain tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParamValueConverter<C> {
    inner: C,
}

impl<C> ParamValueConverter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Converter> Converter for ParamValueConverter<C> {
    type Value = ParameterizedValue<C::Value>;

    fn as_field_value(&self, value: &ParameterizedValue<C::Value>) -> String {
        let mut result = self.inner.as_field_value(value.value());
        for (name, param) in value.parameters() {
            result.push_str("; ");
            result.push_str(name);
            result.push('=');
            result.push_str(&StringConverter.as_field_value(&param.to_owned()));
        }
        result
    }

    fn from_field_value(&self, text: &str) -> Result<ParameterizedValue<C::Value>, ParseError> {
        let mut items = ListItemizer::new(text, b';');
        let head = items
            .next()
            .filter(|head| !head.is_empty())
            .ok_or_else(|| ParseError::new(0, "value may not be empty"))?;
        let value = self.inner.from_field_value(head)?;

        let mut params = IndexMap::new();
        for item in items {
            if item.is_empty() {
                continue;
            }
            let mut scanner = Scanner::new(item);
            let name = scanner.next_until(b'=').trim_matches([' ', '\t']);
            if name.is_empty() {
                return Err(ParseError::new(0, "parameter name may not be empty"));
            }
            let value = if scanner.at_end() {
                String::new()
            } else {
                scanner.advance(1);
                let raw = &item[scanner.pos()..];
                StringConverter.from_field_value(raw)?
            };
            params.insert(name.to_ascii_lowercase(), value);
        }
        Ok(ParameterizedValue::from_parts(value, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv() -> ParamValueConverter<StringConverter> {
        ParamValueConverter::new(StringConverter)
    }

    #[test]
    fn parse_with_params() {
        let value = conv().from_field_value("text/html; Charset=UTF-8; q=0.9").unwrap();
        assert_eq!(value.value(), "text/html");
        assert_eq!(value.parameter("charset"), Some("UTF-8"));
        assert_eq!(value.parameter("CHARSET"), Some("UTF-8"));
        assert_eq!(value.parameter("q"), Some("0.9"));
    }

    #[test]
    fn round_trip() {
        let value = ParameterizedValue::new("attachment".to_owned())
            .with_parameter("filename", "two words.txt");
        let text = conv().as_field_value(&value);
        assert_eq!(text, "attachment; filename=\"two words.txt\"");
        assert_eq!(conv().from_field_value(&text).unwrap(), value);
    }

    #[test]
    fn quoted_parameter_value_keeps_delimiters() {
        let value = conv().from_field_value("form-data; name=\"a;b\"").unwrap();
        assert_eq!(value.parameter("name"), Some("a;b"));
    }

    #[test]
    fn empty_value_rejected() {
        assert!(conv().from_field_value("; a=b").is_err());
    }

    #[test]
    fn weight_defaults_and_clamps() {
        let plain = ParameterizedValue::new("gzip".to_owned());
        assert_eq!(plain.weight(), 1.0);
        let heavy = ParameterizedValue::new("gzip".to_owned()).with_parameter("q", "7");
        assert_eq!(heavy.weight(), 1.0);
        let half = ParameterizedValue::new("gzip".to_owned()).with_parameter("q", "0.5");
        assert_eq!(half.weight(), 0.5);
    }

    #[test]
    fn weight_sort_is_stable_and_descending() {
        let mut items = vec![
            ParameterizedValue::new("a".to_owned()).with_parameter("q", "0.2"),
            ParameterizedValue::new("b".to_owned()).with_parameter("q", "1.0"),
            ParameterizedValue::new("c".to_owned()),
            ParameterizedValue::new("d".to_owned()).with_parameter("q", "0.2"),
        ];
        sort_by_weight(&mut items);
        let order: Vec<_> = items.iter().map(|v| v.value().as_str()).collect();
        // absent q first, then descending; equal weights keep input order
        assert_eq!(order, vec!["c", "b", "a", "d"]);
    }
}
