//! Splitting a raw line into whitespace-separated tokens.

use crate::input::RawLine;

/// Tokens of one command line, in input order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TokenList {
    pub tokens: Vec<String>,
    /// How many tokens past the limit were thrown away.
    pub dropped: usize,
}

impl TokenList {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.tokens
    }
}

/// Split `line` on runs of spaces, keeping at most `max_tokens` tokens.
///
/// Comment lines produce no tokens.
pub fn split_into_tokens(line: &RawLine, max_tokens: usize) -> TokenList {
    if line.is_comment {
        return TokenList::default();
    }

    let mut list = TokenList::default();
    for token in line.text.split(' ').filter(|t| !t.is_empty()) {
        if list.tokens.len() < max_tokens {
            list.tokens.push(token.to_string());
        } else {
            list.dropped += 1;
        }
    }
    list
}
