//! Pre-parse and post-tokenization query validation.

use crate::error::QueryError;

use super::tokenizer::Token;

/// Longest accepted query, in characters.
pub const MAX_QUERY_LENGTH: usize = 1000;

/// Deepest accepted parenthesis nesting.
pub const MAX_NESTING_DEPTH: usize = 10;

/// String-level checks that run before tokenization: non-empty after
/// trim, bounded length, and no control characters.
pub fn validate_query_string(query: &str) -> Result<(), QueryError> {
    if query.trim().is_empty() {
        return Err(QueryError::Empty);
    }
    if query.chars().count() > MAX_QUERY_LENGTH {
        return Err(QueryError::Syntax(format!(
            "query exceeds {MAX_QUERY_LENGTH} characters"
        )));
    }
    // Alphanumerics, whitespace, punctuation, and symbols are allowed;
    // that leaves non-whitespace control characters to reject.
    if query.chars().any(|ch| ch.is_control() && !ch.is_whitespace()) {
        return Err(QueryError::Syntax(
            "query contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

/// Structural checks on the token sequence: balanced parentheses,
/// operator arity, and bounded nesting depth.
pub fn validate_tokens(tokens: &[Token]) -> Result<(), QueryError> {
    let mut depth = 0usize;
    for token in tokens {
        match token {
            Token::OpenParen => {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    return Err(QueryError::ExpressionTooComplex(format!(
                        "nesting depth exceeds {MAX_NESTING_DEPTH}"
                    )));
                }
            }
            Token::CloseParen => {
                if depth == 0 {
                    return Err(QueryError::UnbalancedParentheses);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(QueryError::UnbalancedParentheses);
    }

    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::And | Token::Or => {
                let left_ok = index
                    .checked_sub(1)
                    .and_then(|i| tokens.get(i))
                    .map(|left| left.is_operand() || matches!(left, Token::CloseParen))
                    .unwrap_or(false);
                if !left_ok {
                    return Err(QueryError::InvalidOperator(token.describe()));
                }
                let right_ok = tokens
                    .get(index + 1)
                    .map(|right| {
                        right.is_operand() || matches!(right, Token::Not | Token::OpenParen)
                    })
                    .unwrap_or(false);
                if !right_ok {
                    return Err(QueryError::MissingOperand(token.describe()));
                }
            }
            Token::Not => {
                let right_ok = tokens
                    .get(index + 1)
                    .map(|right| {
                        right.is_operand() || matches!(right, Token::OpenParen | Token::Not)
                    })
                    .unwrap_or(false);
                if !right_ok {
                    return Err(QueryError::MissingOperand("!".to_string()));
                }
            }
            _ => {}
        }
    }

    Ok(())
}
