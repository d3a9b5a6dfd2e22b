//! `size:` predicate parsing.
//!
//! Accepted shape: an optional `>`/`<` prefix, a decimal number, and an
//! optional unit (`B`, `KB`, `MB`, `GB`, `TB`, powers of 1024). No
//! operator means equality. Anything else is malformed and the planner
//! falls back to a substring search on the raw value.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeOp {
    Gt,
    Lt,
    Eq,
}

/// Parses a size predicate into an operator and a byte count.
/// Returns `None` when the value does not match the accepted shape.
pub fn parse_size_predicate(raw: &str) -> Option<(SizeOp, i64)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (op, rest) = match trimmed.as_bytes()[0] {
        b'>' => (SizeOp::Gt, &trimmed[1..]),
        b'<' => (SizeOp::Lt, &trimmed[1..]),
        _ => (SizeOp::Eq, trimmed),
    };
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let split = rest
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit() && *ch != '.')
        .map(|(index, _)| index)
        .unwrap_or(rest.len());
    let (number_part, unit_part) = rest.split_at(split);
    if number_part.is_empty() || number_part.chars().filter(|c| *c == '.').count() > 1 {
        return None;
    }

    let value: f64 = number_part.parse().ok()?;
    let multiplier = unit_multiplier(unit_part)?;
    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 0.0 || bytes > i64::MAX as f64 {
        return None;
    }
    Some((op, bytes as i64))
}

fn unit_multiplier(unit: &str) -> Option<i64> {
    match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => Some(1),
        "kb" => Some(1024),
        "mb" => Some(1024 * 1024),
        "gb" => Some(1024 * 1024 * 1024),
        "tb" => Some(1024_i64.pow(4)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_means_equality_in_bytes() {
        assert_eq!(parse_size_predicate("10"), Some((SizeOp::Eq, 10)));
    }

    #[test]
    fn units_scale_by_powers_of_1024() {
        assert_eq!(parse_size_predicate("1KB"), Some((SizeOp::Eq, 1024)));
        assert_eq!(
            parse_size_predicate(">100MB"),
            Some((SizeOp::Gt, 100 * 1024 * 1024))
        );
        assert_eq!(
            parse_size_predicate("<2gb"),
            Some((SizeOp::Lt, 2 * 1024 * 1024 * 1024))
        );
        assert_eq!(
            parse_size_predicate("1tb"),
            Some((SizeOp::Eq, 1024_i64.pow(4)))
        );
    }

    #[test]
    fn decimal_values_round_to_bytes() {
        assert_eq!(parse_size_predicate("1.5KB"), Some((SizeOp::Eq, 1536)));
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert_eq!(parse_size_predicate(""), None);
        assert_eq!(parse_size_predicate("abc"), None);
        assert_eq!(parse_size_predicate("10XB"), None);
        assert_eq!(parse_size_predicate(">=10"), None);
        assert_eq!(parse_size_predicate("1.2.3"), None);
        assert_eq!(parse_size_predicate(">"), None);
    }
}
