use crate::fields::converter::Converter;
use crate::scan::ParseError;

/// A value with an optional comment, serialized as `value (comment)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentedValue<T> {
    value: T,
    comment: Option<String>,
}

impl<T> CommentedValue<T> {
    pub fn new(value: T) -> Self {
        Self { value, comment: None }
    }

    pub fn with_comment(value: T, comment: impl Into<String>) -> Self {
        Self { value, comment: Some(comment.into()) }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

/// Converter for [`CommentedValue`]. The comment's `(`, `)` and `\` are
/// backslash-escaped on output and unescaped on input. Nested comments
/// are folded into the comment text.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommentedValueConverter<C> {
    inner: C,
}

impl<C> CommentedValueConverter<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Converter> Converter for CommentedValueConverter<C> {
    type Value = CommentedValue<C::Value>;

    fn as_field_value(&self, value: &CommentedValue<C::Value>) -> String {
        let mut result = self.inner.as_field_value(value.value());
        if let Some(comment) = value.comment() {
            result.push_str(" (");
            for ch in comment.chars() {
                if matches!(ch, '(' | ')' | '\\') {
                    result.push('\\');
                }
                result.push(ch);
            }
            result.push(')');
        }
        result
    }

    fn from_field_value(&self, text: &str) -> Result<CommentedValue<C::Value>, ParseError> {
        let Some(open) = find_comment_start(text) else {
            return Ok(CommentedValue::new(self.inner.from_field_value(text)?));
        };
        let value = self.inner.from_field_value(text[..open].trim_matches([' ', '\t']))?;

        let mut comment = String::new();
        let mut depth = 1usize;
        let mut chars = text[open + 1..].char_indices();
        let mut closed_at = None;
        while let Some((pos, ch)) = chars.next() {
            match ch {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        comment.push(escaped);
                    } else {
                        return Err(ParseError::new(open + 1 + pos, "dangling escape in comment"));
                    }
                }
                '(' => {
                    depth += 1;
                    comment.push(ch);
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        closed_at = Some(open + 1 + pos);
                        break;
                    }
                    comment.push(ch);
                }
                _ => comment.push(ch),
            }
        }
        let closed_at =
            closed_at.ok_or_else(|| ParseError::new(text.len(), "unterminated comment"))?;
        if !text[closed_at + 1..].trim_matches([' ', '\t']).is_empty() {
            return Err(ParseError::new(closed_at + 1, "trailing data after comment"));
        }
        Ok(CommentedValue::with_comment(value, comment))
    }
}

fn find_comment_start(text: &str) -> Option<usize> {
    let mut in_quotes = false;
    let mut bytes = text.bytes().enumerate();
    while let Some((pos, b)) = bytes.next() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\\' if in_quotes => {
                bytes.next();
            }
            b'(' if !in_quotes => return Some(pos),
            _ => {}
        }
    }
    None
}
