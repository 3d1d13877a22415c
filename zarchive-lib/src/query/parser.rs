use crate::error::{Error, ErrorKind};
use crate::index::types::{FieldMask, FieldTag};
use crate::iterators::{HasReactionIterator, TimeRangeIterator, WordIterator, ZgramIterator};
use crate::tokenize::WordSplitter;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    LParen,
    RParen,
    Colon,
    Star,
}

struct Lexer<'a> {
    rest: &'a str,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Lexer<'a> {
        Lexer { rest: text }
    }

    fn tokenize(mut self) -> Result<Vec<Token>, Error> {
        let mut tokens = Vec::new();
        loop {
            self.rest = self.rest.trim_start();
            let Some(ch) = self.rest.chars().next() else {
                return Ok(tokens);
            };
            match ch {
                '(' => {
                    tokens.push(Token::LParen);
                    self.rest = &self.rest[1..];
                }
                ')' => {
                    tokens.push(Token::RParen);
                    self.rest = &self.rest[1..];
                }
                ':' => {
                    tokens.push(Token::Colon);
                    self.rest = &self.rest[1..];
                }
                '*' => {
                    tokens.push(Token::Star);
                    self.rest = &self.rest[1..];
                }
                '"' => {
                    let body = &self.rest[1..];
                    let Some(end) = body.find('"') else {
                        return Err(ErrorKind::InvalidQuery(
                            "unterminated quoted string".to_string(),
                        )
                        .into());
                    };
                    tokens.push(Token::Quoted(body[..end].to_string()));
                    self.rest = &body[end + 1..];
                }
                _ => {
                    let end = self
                        .rest
                        .find(|c: char| c.is_whitespace() || "():*\"".contains(c))
                        .unwrap_or(self.rest.len());
                    tokens.push(Token::Word(self.rest[..end].to_string()));
                    self.rest = &self.rest[end..];
                }
            }
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.at)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.at).cloned();
        if token.is_some() {
            self.at += 1;
        }
        token
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), Error> {
        if self.advance().as_ref() == Some(&token) {
            Ok(())
        } else {
            Err(ErrorKind::InvalidQuery(format!("expected {what}")).into())
        }
    }

    fn parse_or(&mut self) -> Result<ZgramIterator, Error> {
        let mut children = vec![self.parse_and()?];
        while let Some(Token::Word(word)) = self.peek() {
            if !word.eq_ignore_ascii_case("or") {
                break;
            }
            self.advance();
            children.push(self.parse_and()?);
        }
        Ok(flatten(children, ZgramIterator::Or))
    }

    fn parse_and(&mut self) -> Result<ZgramIterator, Error> {
        let mut children = vec![self.parse_unary()?];
        loop {
            match self.peek() {
                Some(Token::Word(word)) if word.eq_ignore_ascii_case("or") => break,
                Some(Token::Word(word)) if word.eq_ignore_ascii_case("and") => {
                    self.advance();
                    children.push(self.parse_unary()?);
                }
                Some(Token::RParen) | None => break,
                // Adjacency is an implicit and.
                Some(_) => children.push(self.parse_unary()?),
            }
        }
        Ok(flatten(children, ZgramIterator::And))
    }

    fn parse_unary(&mut self) -> Result<ZgramIterator, Error> {
        if let Some(Token::Word(word)) = self.peek() {
            if word.eq_ignore_ascii_case("not") {
                self.advance();
                let inner = self.parse_unary()?;
                return Ok(ZgramIterator::Not(Box::new(inner)));
            }
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ZgramIterator, Error> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "closing parenthesis")?;
                Ok(inner)
            }
            Some(Token::Quoted(text)) => Ok(words_iterator(&text, FieldMask::ALL)),
            Some(Token::Word(word)) => self.parse_word_form(word),
            Some(token) => {
                Err(ErrorKind::InvalidQuery(format!("unexpected token {token:?}")).into())
            }
            None => Err(ErrorKind::InvalidQuery("unexpected end of query".to_string()).into()),
        }
    }

    /// A bare word, a `field:term` scope, `hasreaction("x")`, or a
    /// timestamp bound.
    fn parse_word_form(&mut self, word: String) -> Result<ZgramIterator, Error> {
        if word.eq_ignore_ascii_case("and") || word.eq_ignore_ascii_case("or") {
            return Err(
                ErrorKind::InvalidQuery(format!("\"{word}\" needs operands on both sides")).into(),
            );
        }
        if word.eq_ignore_ascii_case("hasreaction") && self.peek() == Some(&Token::LParen) {
            self.advance();
            let reaction = match self.advance() {
                Some(Token::Quoted(text)) => text,
                Some(Token::Word(text)) => text,
                _ => {
                    return Err(ErrorKind::InvalidQuery(
                        "hasreaction needs a reaction argument".to_string(),
                    )
                    .into())
                }
            };
            self.expect(Token::RParen, "closing parenthesis")?;
            return Ok(ZgramIterator::HasReaction(HasReactionIterator { reaction }));
        }

        if self.peek() == Some(&Token::Colon) {
            let lower = word.to_ascii_lowercase();
            if let Some(mask) = field_mask(&lower) {
                self.advance();
                return self.parse_scoped_term(mask);
            }
            if lower == "after" || lower == "before" {
                self.advance();
                let ts = match self.advance() {
                    Some(Token::Word(text)) => text.parse::<u64>().map_err(|e| {
                        Error::from(ErrorKind::InvalidQuery(format!("bad timestamp: {e}")))
                    })?,
                    _ => {
                        return Err(ErrorKind::InvalidQuery(format!(
                            "{lower}: needs a timestamp"
                        ))
                        .into())
                    }
                };
                let range = if lower == "after" {
                    TimeRangeIterator {
                        begin: Some(ts),
                        end: None,
                    }
                } else {
                    TimeRangeIterator {
                        begin: None,
                        end: Some(ts),
                    }
                };
                return Ok(ZgramIterator::TimeRange(range));
            }
            return Err(
                ErrorKind::InvalidQuery(format!("unknown field \"{word}\"")).into(),
            );
        }

        Ok(self.finish_term(word, FieldMask::ALL))
    }

    fn parse_scoped_term(&mut self, mask: FieldMask) -> Result<ZgramIterator, Error> {
        match self.advance() {
            Some(Token::Word(word)) => Ok(self.finish_term(word, mask)),
            Some(Token::Quoted(text)) => Ok(words_iterator(&text, mask)),
            _ => Err(ErrorKind::InvalidQuery("field scope needs a term".to_string()).into()),
        }
    }

    /// A word term, possibly followed by `*` for a prefix match.
    fn finish_term(&mut self, word: String, mask: FieldMask) -> ZgramIterator {
        if self.peek() == Some(&Token::Star) {
            self.advance();
            return ZgramIterator::Word(WordIterator::prefix(WordSplitter::fold(&word), mask));
        }
        words_iterator(&word, mask)
    }
}

fn field_mask(name: &str) -> Option<FieldMask> {
    match name {
        "sender" => Some(FieldMask::of(FieldTag::Sender)),
        "signature" => Some(FieldMask::of(FieldTag::Signature)),
        "instance" => Some(FieldMask::of(FieldTag::Instance)),
        "body" => Some(FieldMask::of(FieldTag::Body)),
        _ => None,
    }
}

/// Splits arbitrary text the same way the indexer does and matches the
/// resulting words, grouped with `and` when there are several.
fn words_iterator(text: &str, mask: FieldMask) -> ZgramIterator {
    let words: Vec<ZgramIterator> = WordSplitter::split(text)
        .into_iter()
        .map(|w| ZgramIterator::Word(WordIterator::literal(WordSplitter::fold(w), mask)))
        .collect();
    if words.is_empty() {
        // A term with no word characters can never match anything, but the
        // grammar accepted it; match nothing via an empty or.
        return ZgramIterator::Or(Vec::new());
    }
    flatten(words, ZgramIterator::And)
}

fn flatten(
    mut children: Vec<ZgramIterator>,
    combine: fn(Vec<ZgramIterator>) -> ZgramIterator,
) -> ZgramIterator {
    if children.len() == 1 {
        children.pop().unwrap()
    } else {
        combine(children)
    }
}

/// Parses a query into an iterator tree. Leading/trailing whitespace is
/// ignored; the empty query matches everything.
pub fn parse(text: &str) -> Result<ZgramIterator, Error> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(ZgramIterator::Everything);
    }
    let tokens = Lexer::new(trimmed).tokenize()?;
    let mut parser = Parser { tokens, at: 0 };
    let result = parser.parse_or()?;
    if parser.at != parser.tokens.len() {
        return Err(ErrorKind::InvalidQuery("trailing tokens after query".to_string()).into());
    }
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_empty_matches_everything() {
        assert_eq!(parse("").unwrap(), ZgramIterator::Everything);
        assert_eq!(parse("   ").unwrap(), ZgramIterator::Everything);
    }

    #[test]
    fn test_sender_scope() {
        let it = parse("sender: kosak").unwrap();
        assert_eq!(
            it,
            ZgramIterator::Word(WordIterator::literal(
                "kosak".to_string(),
                FieldMask::of(FieldTag::Sender)
            ))
        );
    }

    #[test]
    fn test_bare_words_are_anded() {
        let it = parse("hurly burly").unwrap();
        match it {
            ZgramIterator::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected and, got {other:?}"),
        }
    }

    #[test]
    fn test_hasreaction() {
        let it = parse("hasreaction(\"👍\")").unwrap();
        assert_eq!(
            it,
            ZgramIterator::HasReaction(HasReactionIterator {
                reaction: "👍".to_string()
            })
        );
    }

    #[test]
    fn test_boolean_structure() {
        let it = parse("(sender:kosak or sender:simon) and not instance:graffiti*").unwrap();
        let ZgramIterator::And(children) = it else {
            panic!("expected and at the top");
        };
        assert!(matches!(children[0], ZgramIterator::Or(_)));
        assert!(matches!(children[1], ZgramIterator::Not(_)));
    }

    #[test]
    fn test_prefix() {
        let it = parse("cinna*").unwrap();
        assert_eq!(
            it,
            ZgramIterator::Word(WordIterator::prefix(
                "cinna".to_string(),
                FieldMask::ALL
            ))
        );
    }

    #[test]
    fn test_case_folding_of_terms() {
        assert_eq!(parse("CINNABON").unwrap(), parse("cinnabon").unwrap());
    }

    #[test]
    fn test_errors() {
        assert!(parse("\"unterminated").is_err());
        assert!(parse("(unclosed").is_err());
        assert!(parse("unknownfield: x").is_err());
        assert!(parse("and").is_err());
    }
}
