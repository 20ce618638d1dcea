use crate::error::{EvalError, EvalResult};
use crate::heap::Heap;
use crate::symbol::{sym, SymbolTable};
use crate::value::Value;

/// S-expression reader: turns source text into heap values.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    heap: &'a mut Heap,
    symbols: &'a mut SymbolTable,
}

fn read_error<T>(msg: &str) -> EvalResult<T> {
    Err(EvalError::Read(msg.to_string()))
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, heap: &'a mut Heap, symbols: &'a mut SymbolTable) -> Self {
        Reader {
            input: input.as_bytes(),
            pos: 0,
            heap,
            symbols,
        }
    }

    /// Read one expression. Returns None at EOF.
    pub fn read(&mut self) -> EvalResult<Option<Value>> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return Ok(None);
        }
        let val = self.read_expr()?;
        Ok(Some(val))
    }

    /// Read one expression starting at byte offset `pos`, returning it with
    /// the offset just past it.
    pub fn read_one_at(&mut self, pos: usize) -> EvalResult<Option<(Value, usize)>> {
        self.pos = pos;
        match self.read()? {
            Some(val) => Ok(Some((val, self.pos))),
            None => Ok(None),
        }
    }

    /// Return current position in input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read all expressions from input.
    pub fn read_all(&mut self) -> EvalResult<Vec<Value>> {
        let mut results = Vec::new();
        while let Some(val) = self.read()? {
            results.push(val);
        }
        Ok(results)
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while let Some(ch) = self.peek() {
                if ch.is_ascii_whitespace() {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.peek() == Some(b';') {
                while let Some(ch) = self.peek() {
                    if ch == b'\n' {
                        break;
                    }
                    self.pos += 1;
                }
            } else if self.input[self.pos..].starts_with(b"#|") {
                self.skip_block_comment();
            } else {
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        let mut level = 1;
        while self.pos < self.input.len() && level > 0 {
            if self.input[self.pos..].starts_with(b"|#") {
                level -= 1;
                self.pos += 2;
            } else if self.input[self.pos..].starts_with(b"#|") {
                level += 1;
                self.pos += 2;
            } else {
                self.pos += 1;
            }
        }
    }

    fn read_expr(&mut self) -> EvalResult<Value> {
        self.skip_whitespace_and_comments();

        let ch = match self.peek() {
            Some(ch) => ch,
            None => return read_error("unexpected EOF"),
        };

        match ch {
            b'(' | b'[' => self.read_list(),
            b')' | b']' => read_error("unexpected closing bracket"),
            b'\'' => self.read_prefixed(sym::QUOTE),
            b'`' => self.read_prefixed(sym::QUASIQUOTE),
            b',' => {
                if self.input.get(self.pos + 1) == Some(&b'@') {
                    self.pos += 1;
                    self.read_prefixed(sym::UNQUOTE_SPLICING)
                } else {
                    self.read_prefixed(sym::UNQUOTE)
                }
            }
            b'"' => self.read_string(),
            b'|' => self.read_escaped_symbol(),
            b'#' => self.read_hash(),
            _ => self.read_word(),
        }
    }

    /// Read a list: (a b c) or (a . b) or (a b . c)
    fn read_list(&mut self) -> EvalResult<Value> {
        let close = if self.advance() == Some(b'[') { b']' } else { b')' };

        let mut elements = Vec::new();
        let mut dot_tail = None;

        loop {
            self.skip_whitespace_and_comments();

            match self.peek() {
                None => return read_error("unterminated list"),
                Some(ch) if ch == close => {
                    self.advance();
                    break;
                }
                Some(b')') | Some(b']') => return read_error("mismatched closing bracket"),
                _ => {}
            }

            if self.peek() == Some(b'.') && self.is_dot_separator() {
                if elements.is_empty() {
                    return read_error("dot at start of list");
                }
                self.advance();
                dot_tail = Some(self.read_expr()?);
                self.skip_whitespace_and_comments();
                if self.peek() != Some(close) {
                    return read_error("expected end of list after dot tail");
                }
                self.advance();
                break;
            }

            elements.push(self.read_expr()?);
        }

        self.heap
            .list_with_tail(&elements, dot_tail.unwrap_or(Value::Nil))
    }

    /// A '.' followed by a delimiter separates a dotted tail.
    fn is_dot_separator(&self) -> bool {
        match self.input.get(self.pos + 1) {
            None => true,
            Some(&next) => is_delimiter(next),
        }
    }

    /// 'x -> (quote x), and likewise for the other prefixes.
    fn read_prefixed(&mut self, tag: crate::value::SymbolId) -> EvalResult<Value> {
        self.advance();
        let expr = self.read_expr()?;
        self.heap.list(&[Value::Symbol(tag), expr])
    }

    fn read_string(&mut self) -> EvalResult<Value> {
        self.advance(); // consume '"'
        let mut bytes = Vec::new();

        loop {
            let ch = match self.advance() {
                Some(ch) => ch,
                None => return read_error("unterminated string"),
            };
            match ch {
                b'"' => break,
                b'\\' => {
                    let esc = match self.advance() {
                        Some(esc) => esc,
                        None => return read_error("unterminated escape"),
                    };
                    bytes.push(match esc {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'r' => b'\r',
                        b'0' => 0,
                        other => other,
                    });
                }
                c => bytes.push(c),
            }
        }

        match String::from_utf8(bytes) {
            Ok(s) => self.heap.alloc_string(s),
            Err(_) => read_error("invalid UTF-8 in string"),
        }
    }

    /// Read an escaped symbol: |symbol name|
    fn read_escaped_symbol(&mut self) -> EvalResult<Value> {
        self.advance(); // consume '|'
        let start = self.pos;
        loop {
            match self.advance() {
                Some(b'|') => break,
                Some(_) => {}
                None => return read_error("unterminated |symbol|"),
            }
        }
        let name = match std::str::from_utf8(&self.input[start..self.pos - 1]) {
            Ok(name) => name.to_string(),
            Err(_) => return read_error("invalid UTF-8 in symbol"),
        };
        Ok(Value::Symbol(self.symbols.intern(&name)))
    }

    /// #t, #f, #true, #false and vector literals #(...).
    fn read_hash(&mut self) -> EvalResult<Value> {
        self.advance(); // consume '#'
        if self.peek() == Some(b'(') {
            let list = self.read_list()?;
            let items = match self.heap.list_to_vec(list) {
                Some(items) => items,
                None => return read_error("dotted vector literal"),
            };
            return self.heap.alloc_vector(items);
        }
        let word = self.take_word()?;
        match word.as_str() {
            "t" | "true" => Ok(Value::TRUE),
            "f" | "false" => Ok(Value::FALSE),
            _ => Err(EvalError::Read(format!("unknown syntax #{}", word))),
        }
    }

    fn take_word(&mut self) -> EvalResult<String> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if is_delimiter(ch) {
                break;
            }
            self.pos += 1;
        }
        match std::str::from_utf8(&self.input[start..self.pos]) {
            Ok(word) => Ok(word.to_string()),
            Err(_) => read_error("invalid UTF-8"),
        }
    }

    /// Read a word: a number or a symbol.
    fn read_word(&mut self) -> EvalResult<Value> {
        let word = self.take_word()?;
        if word.is_empty() {
            return read_error("empty word");
        }
        if let Some(num) = parse_number(&word) {
            return Ok(num);
        }
        Ok(Value::Symbol(self.symbols.intern(&word)))
    }
}

fn is_delimiter(ch: u8) -> bool {
    ch.is_ascii_whitespace()
        || matches!(ch, b'(' | b')' | b'[' | b']' | b'\'' | b'`' | b',' | b'"' | b';')
}

/// Integers and reals. Anything else is a symbol.
fn parse_number(word: &str) -> Option<Value> {
    let bytes = word.as_bytes();
    let digits = match bytes[0] {
        b'+' | b'-' => &bytes[1..],
        _ => bytes,
    };
    match digits.first() {
        Some(c) if c.is_ascii_digit() => {}
        Some(b'.') if digits.get(1).map_or(false, |c| c.is_ascii_digit()) => {}
        _ => return None,
    }
    if let Ok(n) = word.parse::<i64>() {
        return Some(Value::Int(n));
    }
    word.parse::<f64>().ok().map(Value::Real)
}

/// Read a single expression from a string.
pub fn read_str(input: &str, heap: &mut Heap, symbols: &mut SymbolTable) -> EvalResult<Value> {
    let mut reader = Reader::new(input, heap, symbols);
    match reader.read()? {
        Some(val) => Ok(val),
        None => read_error("empty input"),
    }
}

/// Read all expressions from a string.
pub fn read_all(input: &str, heap: &mut Heap, symbols: &mut SymbolTable) -> EvalResult<Vec<Value>> {
    let mut reader = Reader::new(input, heap, symbols);
    reader.read_all()
}
