//! Recursive-descent parser for the REM dialect
//!
//! The first token decides the mode; anything that does not start with a
//! mode keyword falls through to raw SQL, which the engine guards
//! separately. Errors carry byte positions.

use crate::ast::RemQuery;
use crate::lexer::{Keyword, Lexer, Token, TokenKind};
use rem_core::QueryError;

/// Parse a query string.
pub fn parse(source: &str) -> Result<RemQuery, QueryError> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err(QueryError::Empty);
    }

    // Look at the head only; raw SQL may contain characters the REM lexer
    // rejects, so an unlexable head also falls through.
    let tokens = match Lexer::new(trimmed).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => {
            return Ok(RemQuery::Sql {
                query: trimmed.to_string(),
            })
        }
    };

    let mode = match &tokens[0].kind {
        TokenKind::Keyword(kw @ (Keyword::Lookup | Keyword::Search | Keyword::Fuzzy | Keyword::Traverse)) => *kw,
        _ => {
            return Ok(RemQuery::Sql {
                query: trimmed.to_string(),
            })
        }
    };

    let mut parser = Parser {
        tokens: &tokens,
        index: 1,
    };
    let query = match mode {
        Keyword::Lookup => parser.parse_lookup()?,
        Keyword::Search => parser.parse_search()?,
        Keyword::Fuzzy => parser.parse_fuzzy()?,
        Keyword::Traverse => parser.parse_traverse()?,
        _ => unreachable!("mode keywords are filtered above"),
    };
    parser.expect_eof()?;
    Ok(query)
}

struct Parser<'a> {
    tokens: &'a [Token],
    index: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.tokens[self.index.min(self.tokens.len() - 1)].clone();
        self.index += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        QueryError::Parse {
            position: self.peek().position,
            message: message.into(),
        }
    }

    fn expect_string(&mut self, what: &str) -> Result<String, QueryError> {
        let token = self.bump();
        match token.kind {
            TokenKind::Str(s) => Ok(s),
            other => Err(QueryError::Parse {
                position: token.position,
                message: format!("expected quoted {what}, found {other:?}"),
            }),
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, QueryError> {
        let token = self.bump();
        match token.kind {
            TokenKind::Ident(s) | TokenKind::Str(s) => Ok(s),
            other => Err(QueryError::Parse {
                position: token.position,
                message: format!("expected {what}, found {other:?}"),
            }),
        }
    }

    fn expect_number(&mut self, what: &str) -> Result<f64, QueryError> {
        let token = self.bump();
        match token.kind {
            TokenKind::Number(n) => Ok(n),
            other => Err(QueryError::Parse {
                position: token.position,
                message: format!("expected {what}, found {other:?}"),
            }),
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.peek().kind == TokenKind::Keyword(kw) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect_eof(&self) -> Result<(), QueryError> {
        match self.peek().kind {
            TokenKind::Eof => Ok(()),
            _ => Err(self.error("unexpected trailing input")),
        }
    }

    fn parse_lookup(&mut self) -> Result<RemQuery, QueryError> {
        let key = self.expect_string("key")?;
        Ok(RemQuery::Lookup { key })
    }

    fn parse_search(&mut self) -> Result<RemQuery, QueryError> {
        let text = self.expect_string("search text")?;
        if !self.eat_keyword(Keyword::From) {
            return Err(self.error("SEARCH requires FROM <table>"));
        }
        let table = self.expect_ident("table name")?;

        let mut category = None;
        let mut limit = None;
        let mut min_similarity = None;
        loop {
            if self.eat_keyword(Keyword::Category) {
                category = Some(self.expect_ident("category")?);
            } else if self.eat_keyword(Keyword::Limit) {
                limit = Some(self.expect_number("limit")? as i32);
            } else if self.eat_keyword(Keyword::MinSimilarity) {
                min_similarity = Some(self.expect_number("similarity threshold")? as f32);
            } else {
                break;
            }
        }

        Ok(RemQuery::Search {
            text,
            table,
            category,
            limit,
            min_similarity,
        })
    }

    fn parse_fuzzy(&mut self) -> Result<RemQuery, QueryError> {
        let text = self.expect_string("match text")?;
        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.expect_number("limit")? as i32)
        } else {
            None
        };
        Ok(RemQuery::Fuzzy { text, limit })
    }

    fn parse_traverse(&mut self) -> Result<RemQuery, QueryError> {
        let key = self.expect_string("start key")?;
        let mut depth = None;
        let mut relation = None;
        let mut load = false;
        loop {
            if self.eat_keyword(Keyword::Depth) {
                depth = Some(self.expect_number("depth")? as u32);
            } else if self.eat_keyword(Keyword::Type) {
                relation = Some(self.expect_ident("relation type")?);
            } else if self.eat_keyword(Keyword::Load) {
                load = true;
            } else {
                break;
            }
        }
        Ok(RemQuery::Traverse {
            key,
            depth,
            relation,
            load,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_lookup() {
        assert_eq!(
            parse("LOOKUP \"my-note\"").unwrap(),
            RemQuery::Lookup {
                key: "my-note".to_string()
            }
        );
    }

    #[test]
    fn parses_search_with_all_options() {
        let query =
            parse("SEARCH \"q3 revenue\" FROM resources CATEGORY finance LIMIT 3 MIN_SIMILARITY 0.5")
                .unwrap();
        assert_eq!(
            query,
            RemQuery::Search {
                text: "q3 revenue".to_string(),
                table: "resources".to_string(),
                category: Some("finance".to_string()),
                limit: Some(3),
                min_similarity: Some(0.5),
            }
        );
    }

    #[test]
    fn parses_traverse_options() {
        let query = parse("TRAVERSE \"alpha\" DEPTH 2 TYPE mentions LOAD").unwrap();
        assert_eq!(
            query,
            RemQuery::Traverse {
                key: "alpha".to_string(),
                depth: Some(2),
                relation: Some("mentions".to_string()),
                load: true,
            }
        );
    }

    #[test]
    fn empty_query_is_an_error_not_an_empty_result() {
        assert_eq!(parse("   ").unwrap_err(), QueryError::Empty);
    }

    #[test]
    fn unknown_prefix_falls_through_to_sql() {
        let query = parse("SELECT count(*) FROM sessions").unwrap();
        assert_eq!(
            query,
            RemQuery::Sql {
                query: "SELECT count(*) FROM sessions".to_string()
            }
        );
    }

    #[test]
    fn search_without_from_is_rejected_with_position() {
        let err = parse("SEARCH \"text\" LIMIT 3").unwrap_err();
        assert!(matches!(err, QueryError::Parse { .. }));
    }

    #[test]
    fn missing_quoted_argument_is_rejected() {
        assert!(matches!(parse("LOOKUP key"), Err(QueryError::Parse { .. })));
    }

    proptest! {
        #[test]
        fn parser_never_panics(s in "[ -~]{0,80}") {
            let _ = parse(&s);
        }

        #[test]
        fn lookup_round_trips_simple_keys(key in "[a-z0-9-]{1,24}") {
            let query = parse(&format!("LOOKUP \"{key}\"")).unwrap();
            prop_assert_eq!(query, RemQuery::Lookup { key });
        }
    }
}
