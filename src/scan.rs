use thiserror::Error;

/// Error raised when a field value or wire fragment violates the grammar.
///
/// Carries the byte offset into the scanned text at which scanning stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed input at offset {offset}: {reason}")]
pub struct ParseError {
    pub offset: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self { offset, reason: reason.into() }
    }
}

/// `tchar` from RFC 7230 section 3.2.6.
pub fn is_tchar(b: u8) -> bool {
    matches!(b,
        b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.'
        | b'^' | b'_' | b'`' | b'|' | b'~'
        | b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z')
}

/// Returns true if `text` can be emitted as a bare token, i.e. contains
/// no separators, whitespace or non-token bytes.
pub fn is_token(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(is_tchar)
}

/// A cursor over a string slice for resumable scanning of field values
/// and start lines. The position consumed so far is always observable,
/// so callers can report precise error offsets.
pub struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    pub fn advance(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.text.len());
    }

    /// Skips SP and HTAB. CR and LF are never skipped; they delimit lines
    /// and must be handled by the caller.
    pub fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t') = self.peek() {
            self.pos += 1;
        }
    }

    /// Scans the next token. Fails if the cursor is not positioned on a
    /// token character.
    pub fn next_token(&mut self) -> Result<&'a str, ParseError> {
        let start = self.pos;
        while self.peek().is_some_and(is_tchar) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(ParseError::new(start, "expected token"));
        }
        Ok(&self.text[start..self.pos])
    }

    /// Scans a quoted string, returning its content with `\` escapes
    /// resolved. The cursor must be positioned on the opening `"`.
    pub fn next_quoted_string(&mut self) -> Result<String, ParseError> {
        if self.peek() != Some(b'"') {
            return Err(ParseError::new(self.pos, "expected opening quote"));
        }
        self.pos += 1;
        let mut result = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::new(self.pos, "unterminated quoted string"));
                }
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(result);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    // the escaped character may span several bytes once
                    // bytes above 0x7F have been mapped to chars
                    match self.text[self.pos..].chars().next() {
                        Some(ch) => {
                            result.push(ch);
                            self.pos += ch.len_utf8();
                        }
                        None => {
                            return Err(ParseError::new(self.pos, "dangling escape"));
                        }
                    }
                }
                Some(_) => {
                    let ch = self.text[self.pos..].chars().next().unwrap();
                    result.push(ch);
                    self.pos += ch.len_utf8();
                }
            }
        }
    }

    /// Consumes up to (excluding) the next occurrence of `delim` outside
    /// quoted strings, or to the end of input. The delimiter itself is
    /// left unconsumed.
    pub fn next_until(&mut self, delim: u8) -> &'a str {
        let start = self.pos;
        let mut in_quotes = false;
        while let Some(b) = self.peek() {
            match b {
                b'"' => in_quotes = !in_quotes,
                b'\\' if in_quotes => {
                    self.pos += 1;
                }
                _ if b == delim && !in_quotes => break,
                _ => {}
            }
            self.pos += 1;
        }
        &self.text[start..self.pos]
    }
}

/// Splits a field value on a single delimiter while respecting quoted
/// strings, yielding items trimmed of surrounding whitespace.
///
/// `"How, are,you,  \"out there\""` itemized on `,` yields `How`, `are`,
/// `you` and `"out there"` (quotes preserved; converters strip them).
pub struct ListItemizer<'a> {
    scanner: Scanner<'a>,
    delim: u8,
    done: bool,
}

impl<'a> ListItemizer<'a> {
    pub fn new(text: &'a str, delim: u8) -> Self {
        Self { scanner: Scanner::new(text), delim, done: text.is_empty() }
    }
}

impl<'a> Iterator for ListItemizer<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.done {
            return None;
        }
        let item = self.scanner.next_until(self.delim);
        if self.scanner.at_end() {
            self.done = true;
        } else {
            self.scanner.advance(1);
        }
        Some(item.trim_matches([' ', '\t']))
    }
}
