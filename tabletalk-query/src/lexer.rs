//! A small SQL lexer.
//!
//! Only as much of SQLite's lexical grammar as the validator and the candidate
//! extractor need: comments are dropped, quoted spans are kept whole, and `;`
//! is reported as a terminator. Everything else is a word or a one-byte symbol.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier, keyword or number.
    Word,
    /// `'…'`, `"…"`, `` `…` `` or `[…]`; carries the opening delimiter.
    Quoted(char),
    Terminator,
    Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset of the token in the source text.
    pub offset: usize,
}

impl<'a> Token<'a> {
    pub fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_symbol(&self, symbol: char) -> bool {
        self.kind == TokenKind::Symbol && self.text.starts_with(symbol)
    }

    /// A string literal, as opposed to a quoted identifier.
    pub fn is_string_literal(&self) -> bool {
        self.kind == TokenKind::Quoted('\'')
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word)
            || matches!(self.kind, TokenKind::Quoted(q) if q != '\'')
    }

    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }

    /// Identifier text with delimiters removed and doubled quotes collapsed.
    pub fn unquoted(&self) -> String {
        match self.kind {
            TokenKind::Quoted('[') => self
                .text
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            TokenKind::Quoted(q) => {
                let inner = self.text.strip_prefix(q).unwrap_or(self.text);
                let inner = inner.strip_suffix(q).unwrap_or(inner);
                let doubled: String = [q, q].iter().collect();
                inner.replace(&doubled, &q.to_string())
            }
            _ => self.text.to_string(),
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Tokenize `sql`. Unterminated quotes and block comments run to end of input.
pub fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        let b = bytes[i];
        match b {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < len && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = match sql[i + 2..].find("*/") {
                    Some(pos) => i + 2 + pos + 2,
                    None => len,
                };
            }
            b'\'' | b'"' | b'`' => {
                let start = i;
                i += 1;
                while i < len {
                    if bytes[i] == b {
                        if bytes.get(i + 1) == Some(&b) {
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Quoted(b as char),
                    text: &sql[start..i.min(len)],
                    offset: start,
                });
            }
            b'[' => {
                let start = i;
                while i < len && bytes[i] != b']' {
                    i += 1;
                }
                i = (i + 1).min(len);
                tokens.push(Token {
                    kind: TokenKind::Quoted('['),
                    text: &sql[start..i],
                    offset: start,
                });
            }
            b';' => {
                tokens.push(Token {
                    kind: TokenKind::Terminator,
                    text: &sql[i..i + 1],
                    offset: i,
                });
                i += 1;
            }
            b if b.is_ascii_whitespace() => i += 1,
            b if is_word_byte(b) => {
                let start = i;
                while i < len && is_word_byte(bytes[i]) {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word,
                    text: &sql[start..i],
                    offset: start,
                });
            }
            _ => {
                tokens.push(Token {
                    kind: TokenKind::Symbol,
                    text: &sql[i..i + 1],
                    offset: i,
                });
                i += 1;
            }
        }
    }

    tokens
}

/// Group tokens into statements separated by terminators, dropping empty ones.
pub fn split_statements<'t, 'a>(tokens: &'t [Token<'a>]) -> Vec<&'t [Token<'a>]> {
    tokens
        .split(|t| t.kind == TokenKind::Terminator)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Byte offset just past the first top-level terminator, if any.
pub fn first_terminator_end(sql: &str) -> Option<usize> {
    tokenize(sql)
        .into_iter()
        .find(|t| t.kind == TokenKind::Terminator)
        .map(|t| t.end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, &str)> {
        tokenize(sql).into_iter().map(|t| (t.kind, t.text)).collect()
    }

    #[test]
    fn test_words_symbols_and_terminator() {
        assert_eq!(
            kinds("SELECT a,b FROM t;"),
            vec![
                (TokenKind::Word, "SELECT"),
                (TokenKind::Word, "a"),
                (TokenKind::Symbol, ","),
                (TokenKind::Word, "b"),
                (TokenKind::Word, "FROM"),
                (TokenKind::Word, "t"),
                (TokenKind::Terminator, ";"),
            ]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let tokens = tokenize("SELECT 1 -- drop table x\n/* ; delete */ FROM t");
        let words: Vec<_> = tokens.iter().map(|t| t.text).collect();
        assert_eq!(words, vec!["SELECT", "1", "FROM", "t"]);
    }

    #[test]
    fn test_quoted_spans_are_whole() {
        let tokens = tokenize("SELECT 'it''s; drop' , \"a \"\"b\"\" c\", [x y], `z`");
        let quoted: Vec<_> = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Quoted(_)))
            .map(|t| t.unquoted())
            .collect();
        assert_eq!(quoted, vec!["it's; drop", "a \"b\" c", "x y", "z"]);
        assert!(tokens.iter().all(|t| t.kind != TokenKind::Terminator));
    }

    #[test]
    fn test_unterminated_comment_runs_to_end() {
        let tokens = tokenize("SELECT 1 /* ; DROP TABLE t");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_split_statements() {
        let tokens = tokenize("SELECT 1;; ;SELECT 2;");
        assert_eq!(split_statements(&tokens).len(), 2);

        let tokens = tokenize("SELECT 1; -- trailing");
        assert_eq!(split_statements(&tokens).len(), 1);
    }

    #[test]
    fn test_first_terminator_end() {
        assert_eq!(first_terminator_end("SELECT ';' FROM t; x"), Some(18));
        assert_eq!(first_terminator_end("SELECT 1"), None);
    }

    #[test]
    fn test_non_ascii_identifiers() {
        let tokens = tokenize("SELECT café FROM t");
        assert_eq!(tokens[1].text, "café");
    }
}
