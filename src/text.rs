//! Team-name normalization for alias matching across providers

/// Normalize a team alias for stable matching across sources.
///
/// Lowercases, replaces non-alphanumerics with spaces, and collapses runs of
/// whitespace, so "St. Louis Rams" and "st louis  rams" normalize identically.
pub fn normalize_team_alias(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else {
            pending_space = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_team_alias("St. Louis Rams"), "st louis rams");
        assert_eq!(normalize_team_alias("  Washington  Redskins "), "washington redskins");
        assert_eq!(normalize_team_alias("49ers"), "49ers");
    }

    #[test]
    fn test_normalize_collapses_whitespace() {
        assert_eq!(normalize_team_alias("New\tYork   Jets"), "new york jets");
        assert_eq!(normalize_team_alias("---"), "");
    }
}
