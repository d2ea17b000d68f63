// Small helpers for TOML parse error message extraction.

/// Look for patterns like "line N column M" in parser error messages and
/// return (line, column) when found.
#[must_use]
pub fn extract_line_col_from_msg(msg: &str) -> Option<(usize, usize)> {
    let line = number_after(msg, "line ")?;
    let rest = &msg[msg.find("line ")?..];
    let col = number_after(rest, "column ")?;
    Some((line, col))
}

fn number_after(msg: &str, marker: &str) -> Option<usize> {
    let start = msg.find(marker)? + marker.len();
    let digits: String = msg[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Format a TOML deserialization error with a `line:col` prefix when the
/// parser message carries a position.
#[must_use]
pub fn describe_toml_error(what: &str, err: &toml::de::Error) -> String {
    let s = err.to_string();
    if let Some((line, col)) = extract_line_col_from_msg(&s) {
        return format!("{what} parse error at {line}:{col}: {s}");
    }
    if let Some(span) = err.span() {
        return format!("{what} parse error at byte {}: {s}", span.start);
    }
    format!("{what} parse error: {s}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_position() {
        assert_eq!(
            extract_line_col_from_msg("TOML parse error at line 3, column 7"),
            Some((3, 7))
        );
        assert_eq!(extract_line_col_from_msg("no position here"), None);
        assert_eq!(extract_line_col_from_msg("line 4 only"), None);
    }
}
