use crate::expr::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),

    LeftParen,
    RightParen,
    Comma,
    Dot,
    Question,
    Colon,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,

    Equal, // ==
    StrictEqual, // ===
    NotEqual, // !=
    StrictNotEqual, // !==
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And, // &&
    Or, // ||
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

/// Splits a formula into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        let token = match ch {
            ' ' | '\t' | '\r' | '\n' => continue,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            ',' => Token::Comma,
            '?' => Token::Question,
            ':' => Token::Colon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '.' => {
                if chars.peek().is_some_and(|(_, next)| next.is_ascii_digit()) {
                    let (number, end) = scan_number(input, offset)?;
                    advance_to(&mut chars, end);
                    Token::Number(number)
                } else {
                    Token::Dot
                }
            }
            '=' => {
                if chars.next_if(|(_, next)| *next == '=').is_none() {
                    return Err(ExprError::syntax(offset, "assignment is not allowed"));
                }
                if chars.next_if(|(_, next)| *next == '=').is_some() {
                    Token::StrictEqual
                } else {
                    Token::Equal
                }
            }
            '!' => {
                if chars.next_if(|(_, next)| *next == '=').is_some() {
                    if chars.next_if(|(_, next)| *next == '=').is_some() {
                        Token::StrictNotEqual
                    } else {
                        Token::NotEqual
                    }
                } else {
                    Token::Bang
                }
            }
            '<' => {
                if chars.next_if(|(_, next)| *next == '=').is_some() {
                    Token::LessEqual
                } else {
                    Token::Less
                }
            }
            '>' => {
                if chars.next_if(|(_, next)| *next == '=').is_some() {
                    Token::GreaterEqual
                } else {
                    Token::Greater
                }
            }
            '&' => {
                if chars.next_if(|(_, next)| *next == '&').is_none() {
                    return Err(ExprError::syntax(offset, "bitwise '&' is not supported"));
                }
                Token::And
            }
            '|' => {
                if chars.next_if(|(_, next)| *next == '|').is_none() {
                    return Err(ExprError::syntax(offset, "bitwise '|' is not supported"));
                }
                Token::Or
            }
            '\'' | '"' => {
                let (text, end) = scan_string(input, offset, ch)?;
                advance_to(&mut chars, end);
                Token::Str(text)
            }
            c if c.is_ascii_digit() => {
                let (number, end) = scan_number(input, offset)?;
                advance_to(&mut chars, end);
                Token::Number(number)
            }
            c if is_ident_start(c) => {
                let mut end = offset + c.len_utf8();
                while let Some((idx, next)) = chars.next_if(|(_, next)| is_ident_continue(*next)) {
                    end = idx + next.len_utf8();
                }
                Token::Ident(input[offset..end].to_string())
            }
            other => {
                return Err(ExprError::syntax(
                    offset,
                    format!("unexpected character '{}'", other),
                ));
            }
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn advance_to<I>(chars: &mut std::iter::Peekable<I>, end: usize)
where
    I: Iterator<Item = (usize, char)>,
{
    while chars.next_if(|(idx, _)| *idx < end).is_some() {}
}

/// Scans a decimal literal with optional fraction and exponent. Returns the value and the end offset.
fn scan_number(input: &str, start: usize) -> Result<(f64, usize), ExprError> {
    let bytes = input.as_bytes();
    let mut end = start;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut probe = end + 1;
        if probe < bytes.len() && (bytes[probe] == b'+' || bytes[probe] == b'-') {
            probe += 1;
        }
        if probe < bytes.len() && bytes[probe].is_ascii_digit() {
            end = probe;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
    }
    let literal = &input[start..end];
    literal
        .parse::<f64>()
        .map(|value| (value, end))
        .map_err(|_| ExprError::syntax(start, format!("invalid number '{}'", literal)))
}

/// Scans a quoted literal starting at the opening quote. Returns the text and the end offset.
fn scan_string(input: &str, start: usize, quote: char) -> Result<(String, usize), ExprError> {
    let mut text = String::new();
    let mut chars = input[start + 1..].char_indices();

    while let Some((rel, ch)) = chars.next() {
        match ch {
            c if c == quote => return Ok((text, start + 1 + rel + c.len_utf8())),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => text.push('\n'),
                    't' => text.push('\t'),
                    'r' => text.push('\r'),
                    'b' => text.push('\u{8}'),
                    'f' => text.push('\u{c}'),
                    '0' => text.push('\0'),
                    'u' => {
                        let mut code = String::with_capacity(4);
                        for _ in 0..4 {
                            match chars.next() {
                                Some((_, digit)) if digit.is_ascii_hexdigit() => code.push(digit),
                                _ => {
                                    return Err(ExprError::syntax(
                                        start + 1 + rel,
                                        "invalid unicode escape",
                                    ));
                                }
                            }
                        }
                        let value = u32::from_str_radix(&code, 16).ok().and_then(char::from_u32);
                        text.push(value.unwrap_or(char::REPLACEMENT_CHARACTER));
                    }
                    other => text.push(other),
                }
            }
            other => text.push(other),
        }
    }

    Err(ExprError::syntax(start, "unterminated string literal"))
}
