//! Glob-style patterns for KEYS
//!
//! Supports:
//! - `*` : any sequence, including empty
//! - `?` : exactly one byte
//! - `[abc]`, `[a-z]` : one byte from the set, `[^...]` or `[!...]` negates it
//! - `\x` : literal `x`

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Any,
    One,
    Literal(u8),
    Set { negate: bool, ranges: Vec<(u8, u8)> },
}

impl Token {
    fn matches(&self, b: u8) -> bool {
        match self {
            Token::Any | Token::One => true,
            Token::Literal(c) => *c == b,
            Token::Set { negate, ranges } => {
                let hit = ranges.iter().any(|&(lo, hi)| lo <= b && b <= hi);
                hit != *negate
            }
        }
    }
}

/// Compiled glob pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    tokens: Vec<Token>,
}

impl Pattern {
    pub fn compile(src: &[u8]) -> Self {
        let mut tokens = Vec::with_capacity(src.len());
        let mut i = 0;
        while i < src.len() {
            match src[i] {
                b'*' => {
                    // consecutive stars collapse
                    if tokens.last() != Some(&Token::Any) {
                        tokens.push(Token::Any);
                    }
                }
                b'?' => tokens.push(Token::One),
                b'\\' if i + 1 < src.len() => {
                    i += 1;
                    tokens.push(Token::Literal(src[i]));
                }
                b'[' => match parse_set(&src[i + 1..]) {
                    Some((token, used)) => {
                        tokens.push(token);
                        i += used;
                    }
                    None => tokens.push(Token::Literal(b'[')),
                },
                c => tokens.push(Token::Literal(c)),
            }
            i += 1;
        }
        Pattern { tokens }
    }

    pub fn is_match(&self, key: &[u8]) -> bool {
        let tokens = &self.tokens;
        let (mut p, mut i) = (0, 0);
        // last star seen and the key position it is currently absorbing up to
        let mut backtrack: Option<(usize, usize)> = None;

        while i < key.len() {
            if p < tokens.len() {
                if tokens[p] == Token::Any {
                    backtrack = Some((p, i));
                    p += 1;
                    continue;
                }
                if tokens[p].matches(key[i]) {
                    p += 1;
                    i += 1;
                    continue;
                }
            }
            match backtrack {
                Some((star, absorbed)) => {
                    p = star + 1;
                    i = absorbed + 1;
                    backtrack = Some((star, absorbed + 1));
                }
                None => return false,
            }
        }

        tokens[p..].iter().all(|t| *t == Token::Any)
    }
}

/// Parse a `[...]` body (after the opening bracket)
///
/// Returns the token and the number of bytes consumed including `]`,
/// or `None` when the bracket is never closed.
fn parse_set(src: &[u8]) -> Option<(Token, usize)> {
    let mut i = 0;
    let negate = matches!(src.first(), Some(b'^') | Some(b'!'));
    if negate {
        i += 1;
    }
    let mut ranges = Vec::new();
    while i < src.len() {
        let mut c = src[i];
        if c == b']' {
            return Some((Token::Set { negate, ranges }, i + 1));
        }
        if c == b'\\' && i + 1 < src.len() {
            i += 1;
            c = src[i];
        }
        if i + 2 < src.len() && src[i + 1] == b'-' && src[i + 2] != b']' {
            let hi = src[i + 2];
            ranges.push((c.min(hi), c.max(hi)));
            i += 3;
        } else {
            ranges.push((c, c));
            i += 1;
        }
    }
    None
}
