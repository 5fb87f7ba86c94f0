//! Decoder for the list literals stored in the `languages` CSV column.
//!
//! Cells look like `['English', 'Français']`. Only a flat bracketed list of
//! quoted strings is accepted; nothing is ever evaluated.
//!
//! ```text
//! list   := ws '[' ws ( string ( ws ',' ws string )* ( ws ',' )? )? ws ']' ws
//! string := '\'' char* '\'' | '"' char* '"'
//! ```

use anyhow::{bail, Result};

/// Parses a list literal into its string items.
pub fn parse_string_list(input: &str) -> Result<Vec<String>> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };

    parser.skip_ws();
    parser.expect('[')?;

    let mut items = Vec::new();
    loop {
        parser.skip_ws();
        match parser.peek() {
            Some(']') => {
                parser.pos += 1;
                break;
            }
            Some('\'') | Some('"') => {
                items.push(parser.string()?);
                parser.skip_ws();
                match parser.next() {
                    Some(',') => continue,
                    Some(']') => break,
                    Some(c) => bail!(
                        "malformed list literal {:?}: expected ',' or ']' at offset {}, found {:?}",
                        input,
                        parser.pos - 1,
                        c
                    ),
                    None => bail!("malformed list literal {:?}: missing closing ']'", input),
                }
            }
            Some(c) => bail!(
                "malformed list literal {:?}: expected a quoted string at offset {}, found {:?}",
                input,
                parser.pos,
                c
            ),
            None => bail!("malformed list literal {:?}: missing closing ']'", input),
        }
    }

    parser.skip_ws();
    if parser.pos != parser.chars.len() {
        bail!(
            "malformed list literal {:?}: trailing characters after ']'",
            input
        );
    }

    Ok(items)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.next() {
            Some(c) if c == want => Ok(()),
            Some(c) => bail!("malformed list literal: expected {:?}, found {:?}", want, c),
            None => bail!("malformed list literal: expected {:?}, found end of input", want),
        }
    }

    fn string(&mut self) -> Result<String> {
        let Some(quote) = self.next() else {
            bail!("malformed list literal: expected a quoted string");
        };
        let mut out = String::new();
        loop {
            match self.next() {
                None => bail!("malformed list literal: unterminated string"),
                Some(c) if c == quote => return Ok(out),
                Some('\\') => match self.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c @ ('\\' | '\'' | '"')) => out.push(c),
                    // Unknown escapes are kept verbatim.
                    Some(c) => {
                        out.push('\\');
                        out.push(c);
                    }
                    None => bail!("malformed list literal: unterminated string"),
                },
                Some(c) => out.push(c),
            }
        }
    }
}
