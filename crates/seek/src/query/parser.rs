//! Query parser: token stream → expression tree.
//!
//! Two paths. Simple queries (no operators, no parens) get the
//! friendly treatment: one bare token becomes a prefix match, several
//! become an AND of substring terms. Boolean queries parse with the
//! usual precedence (parens, `!`, `&` explicit or implicit, `|`),
//! with implicit AND inserted between adjacent operands.

use crate::error::QueryError;

use super::expression::{Expression, QueryKey};
use super::tokenizer::Token;

pub fn parse(tokens: &[Token]) -> Result<Expression, QueryError> {
    if tokens.is_empty() {
        return Err(QueryError::Empty);
    }

    let is_simple = tokens.iter().all(Token::is_operand);
    if is_simple {
        return parse_simple(tokens);
    }

    let tokens = insert_implicit_and(tokens);
    let mut parser = Parser { tokens, cursor: 0 };
    let expression = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(QueryError::Syntax(format!(
            "unexpected token {:?}",
            extra.describe()
        )));
    }
    Ok(expression)
}

// ---------------------------------------------------------------------------
// Simple path
// ---------------------------------------------------------------------------

fn parse_simple(tokens: &[Token]) -> Result<Expression, QueryError> {
    if tokens.len() == 1 {
        return Ok(match &tokens[0] {
            Token::Quoted(quoted) => Expression::Term(quoted.clone()),
            Token::Term(term) => {
                if term.contains('*') || term.contains('?') {
                    Expression::Term(term.clone())
                } else {
                    Expression::Term(format!("{term}*"))
                }
            }
            Token::KeyValue { key, value, raw } => match QueryKey::parse(key) {
                Some(parsed) if !value.is_empty() => Expression::KeyValue {
                    key: parsed,
                    value: value.clone(),
                },
                // Unrecognized pair: treated like any other bare token,
                // so the prefix rule applies.
                _ => {
                    if raw.contains('*') || raw.contains('?') {
                        Expression::Term(raw.clone())
                    } else {
                        Expression::Term(format!("{raw}*"))
                    }
                }
            },
            _ => unreachable!("simple path only sees operands"),
        });
    }

    // Several tokens: AND of verbatim terms; the planner applies
    // substring semantics to each.
    let parts = tokens.iter().map(operand_to_expression).collect();
    Ok(Expression::And(parts))
}

fn operand_to_expression(token: &Token) -> Expression {
    match token {
        Token::Term(term) => Expression::Term(term.clone()),
        Token::Quoted(quoted) => Expression::Term(quoted.clone()),
        Token::KeyValue { key, value, raw } => key_value_or_term(key, value, raw),
        _ => unreachable!("operand expected"),
    }
}

/// A key-value token becomes a typed predicate when the key is known
/// and the value non-empty; otherwise it stays an ordinary term.
fn key_value_or_term(key: &str, value: &str, raw: &str) -> Expression {
    match QueryKey::parse(key) {
        Some(parsed) if !value.is_empty() => Expression::KeyValue {
            key: parsed,
            value: value.to_string(),
        },
        _ => Expression::Term(raw.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Implicit AND insertion
// ---------------------------------------------------------------------------

fn insert_implicit_and(tokens: &[Token]) -> Vec<Token> {
    let mut output: Vec<Token> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if let Some(previous) = output.last() {
            let implicit = match (previous, token) {
                (left, right) if left.is_operand() && right.is_operand() => true,
                (Token::CloseParen, right) if right.is_operand() => true,
                (left, Token::OpenParen) if left.is_operand() => true,
                (left, Token::Not) if left.is_operand() => true,
                _ => false,
            };
            if implicit {
                output.push(Token::And);
            }
        }
        output.push(token.clone());
    }
    output
}

// ---------------------------------------------------------------------------
// Boolean path
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    cursor: usize,
}

impl Parser {
    fn parse_or(&mut self) -> Result<Expression, QueryError> {
        let mut parts = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.cursor += 1;
            parts.push(self.parse_and()?);
        }
        Ok(flatten(parts, Expression::Or))
    }

    fn parse_and(&mut self) -> Result<Expression, QueryError> {
        let mut parts = vec![self.parse_not()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.cursor += 1;
            parts.push(self.parse_not()?);
        }
        Ok(flatten(parts, Expression::And))
    }

    fn parse_not(&mut self) -> Result<Expression, QueryError> {
        if matches!(self.peek(), Some(Token::Not)) {
            self.cursor += 1;
            let inner = self.parse_not()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expression, QueryError> {
        let Some(token) = self.peek().cloned() else {
            return Err(QueryError::MissingOperand("end of query".to_string()));
        };
        match token {
            Token::OpenParen => {
                self.cursor += 1;
                let inner = self.parse_or()?;
                if !matches!(self.peek(), Some(Token::CloseParen)) {
                    return Err(QueryError::UnbalancedParentheses);
                }
                self.cursor += 1;
                Ok(inner)
            }
            Token::Term(_) | Token::Quoted(_) | Token::KeyValue { .. } => {
                self.cursor += 1;
                Ok(operand_to_expression(&token))
            }
            other => Err(QueryError::MissingOperand(other.describe())),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }
}

fn flatten(mut parts: Vec<Expression>, combine: fn(Vec<Expression>) -> Expression) -> Expression {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        combine(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::tokenizer::tokenize;

    fn parse_str(input: &str) -> Expression {
        parse(&tokenize(input).expect("tokenize")).expect("parse")
    }

    #[test]
    fn single_bare_token_becomes_a_prefix_term() {
        assert_eq!(parse_str("re"), Expression::Term("re*".to_string()));
    }

    #[test]
    fn single_quoted_token_stays_exact() {
        assert_eq!(
            parse_str("\"readme.md\""),
            Expression::Term("\"readme.md\"".to_string())
        );
    }

    #[test]
    fn wildcard_token_is_preserved() {
        assert_eq!(parse_str("rep*.txt"), Expression::Term("rep*.txt".to_string()));
    }

    #[test]
    fn multiple_tokens_become_and_of_verbatim_terms() {
        assert_eq!(
            parse_str("re port"),
            Expression::And(vec![
                Expression::Term("re".to_string()),
                Expression::Term("port".to_string()),
            ])
        );
    }

    #[test]
    fn recognized_key_value_becomes_a_predicate() {
        assert_eq!(
            parse_str("ext:pdf"),
            Expression::KeyValue {
                key: QueryKey::Extension,
                value: "pdf".to_string(),
            }
        );
    }

    #[test]
    fn unknown_key_value_falls_back_to_a_term() {
        assert_eq!(
            parse_str("owner:alice"),
            Expression::Term("owner:alice*".to_string())
        );
    }

    #[test]
    fn or_has_lowest_precedence() {
        let parsed = parse_str("a & b | c");
        assert_eq!(
            parsed,
            Expression::Or(vec![
                Expression::And(vec![
                    Expression::Term("a".to_string()),
                    Expression::Term("b".to_string()),
                ]),
                Expression::Term("c".to_string()),
            ])
        );
    }

    #[test]
    fn parens_override_precedence() {
        let parsed = parse_str("a & (b | c)");
        assert_eq!(
            parsed,
            Expression::And(vec![
                Expression::Term("a".to_string()),
                Expression::Or(vec![
                    Expression::Term("b".to_string()),
                    Expression::Term("c".to_string()),
                ]),
            ])
        );
    }

    #[test]
    fn not_binds_tighter_than_and() {
        let parsed = parse_str("a & !b");
        assert_eq!(
            parsed,
            Expression::And(vec![
                Expression::Term("a".to_string()),
                Expression::Not(Box::new(Expression::Term("b".to_string()))),
            ])
        );
    }

    #[test]
    fn implicit_and_between_term_and_paren() {
        let parsed = parse_str("a (b | c)");
        assert_eq!(
            parsed,
            Expression::And(vec![
                Expression::Term("a".to_string()),
                Expression::Or(vec![
                    Expression::Term("b".to_string()),
                    Expression::Term("c".to_string()),
                ]),
            ])
        );
    }

    #[test]
    fn implicit_and_between_term_and_not() {
        let parsed = parse_str("a !b");
        assert_eq!(
            parsed,
            Expression::And(vec![
                Expression::Term("a".to_string()),
                Expression::Not(Box::new(Expression::Term("b".to_string()))),
            ])
        );
    }

    #[test]
    fn unknown_key_in_boolean_context_stays_verbatim() {
        // In the boolean path the raw text is kept without the prefix star.
        let parsed = parse_str("owner:alice | b");
        assert_eq!(
            parsed,
            Expression::Or(vec![
                Expression::Term("owner:alice".to_string()),
                Expression::Term("b".to_string()),
            ])
        );
    }

    #[test]
    fn quoted_operand_in_boolean_query_stays_exact() {
        let parsed = parse_str("\"exact name\" | other");
        assert_eq!(
            parsed,
            Expression::Or(vec![
                Expression::Term("\"exact name\"".to_string()),
                Expression::Term("other".to_string()),
            ])
        );
    }
}
