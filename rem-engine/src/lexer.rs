//! Lexer for the REM dialect
//!
//! Small scanner over the query head: mode keywords, quoted strings,
//! numbers, identifiers. The parser bails to raw SQL when the first token is
//! not a mode keyword, so the lexer never has to understand full SQL.

use rem_core::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Keyword(Keyword),
    Str(String),
    Number(f64),
    Ident(String),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Lookup,
    Search,
    Fuzzy,
    Traverse,
    From,
    Category,
    Limit,
    MinSimilarity,
    Depth,
    Type,
    Load,
}

impl Keyword {
    fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "LOOKUP" => Some(Keyword::Lookup),
            "SEARCH" => Some(Keyword::Search),
            "FUZZY" => Some(Keyword::Fuzzy),
            "TRAVERSE" => Some(Keyword::Traverse),
            "FROM" => Some(Keyword::From),
            "CATEGORY" => Some(Keyword::Category),
            "LIMIT" => Some(Keyword::Limit),
            "MIN_SIMILARITY" => Some(Keyword::MinSimilarity),
            "DEPTH" => Some(Keyword::Depth),
            "TYPE" => Some(Keyword::Type),
            "LOAD" => Some(Keyword::Load),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset into the source, for positioned errors.
    pub position: usize,
}

pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, QueryError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn rest(&self) -> &str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().map(char::is_whitespace).unwrap_or(false) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Result<Token, QueryError> {
        self.skip_whitespace();
        let position = self.pos;

        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position,
            });
        };

        if c == '"' || c == '\'' {
            return self.scan_string(c).map(|kind| Token { kind, position });
        }
        if c.is_ascii_digit() || (c == '.' && self.rest().len() > 1) {
            return self.scan_number().map(|kind| Token { kind, position });
        }
        if c.is_alphanumeric() || c == '_' {
            let word = self.scan_word();
            let kind = match Keyword::parse(&word) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Ident(word),
            };
            return Ok(Token { kind, position });
        }

        Err(QueryError::Parse {
            position,
            message: format!("unexpected character '{c}'"),
        })
    }

    fn scan_string(&mut self, quote: char) -> Result<TokenKind, QueryError> {
        let start = self.pos;
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(TokenKind::Str(value)),
                Some('\\') => match self.bump() {
                    Some(escaped) => value.push(escaped),
                    None => {
                        return Err(QueryError::Parse {
                            position: start,
                            message: "unterminated escape in string literal".to_string(),
                        })
                    }
                },
                Some(c) => value.push(c),
                None => {
                    return Err(QueryError::Parse {
                        position: start,
                        message: "unterminated string literal".to_string(),
                    })
                }
            }
        }
    }

    fn scan_number(&mut self) -> Result<TokenKind, QueryError> {
        let start = self.pos;
        while self
            .peek()
            .map(|c| c.is_ascii_digit() || c == '.')
            .unwrap_or(false)
        {
            self.bump();
        }
        self.source[start..self.pos]
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| QueryError::Parse {
                position: start,
                message: format!("invalid number '{}'", &self.source[start..self.pos]),
            })
    }

    fn scan_word(&mut self) -> String {
        let start = self.pos;
        while self
            .peek()
            .map(|c| c.is_alphanumeric() || c == '_' || c == '-')
            .unwrap_or(false)
        {
            self.bump();
        }
        self.source[start..self.pos].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_search_query() {
        let tokens = Lexer::new("SEARCH \"revenue growth\" FROM resources LIMIT 5")
            .tokenize()
            .unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Search));
        assert_eq!(tokens[1].kind, TokenKind::Str("revenue growth".to_string()));
        assert_eq!(tokens[2].kind, TokenKind::Keyword(Keyword::From));
        assert_eq!(tokens[3].kind, TokenKind::Ident("resources".to_string()));
        assert_eq!(tokens[4].kind, TokenKind::Keyword(Keyword::Limit));
        assert_eq!(tokens[5].kind, TokenKind::Number(5.0));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let tokens = Lexer::new("lookup 'my-key'").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword(Keyword::Lookup));
        assert_eq!(tokens[1].kind, TokenKind::Str("my-key".to_string()));
    }

    #[test]
    fn unterminated_strings_report_their_position() {
        let err = Lexer::new("LOOKUP \"oops").tokenize().unwrap_err();
        match err {
            QueryError::Parse { position, .. } => assert_eq!(position, 7),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn escapes_inside_strings() {
        let tokens = Lexer::new(r#"FUZZY "a \"quoted\" name""#).tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Str("a \"quoted\" name".to_string()));
    }
}
