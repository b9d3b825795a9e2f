//! User pattern compilation.

use regex::{Regex, RegexBuilder};

use crate::error::RulesError;

/// Compile one user pattern, case-insensitive by default.
pub fn compile_pattern(pattern: &str) -> Result<Regex, RulesError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| RulesError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Compile a pattern list; any invalid entry fails the whole list.
pub fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, RulesError> {
    patterns.iter().map(|p| compile_pattern(p)).collect()
}

/// Empty list matches anything; a non-empty list requires at least one hit.
pub fn match_any(value: &str, regexes: &[Regex]) -> bool {
    regexes.is_empty() || regexes.iter().any(|re| re.is_match(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_by_default() {
        let re = compile_pattern("^example\\.com$").unwrap();
        assert!(re.is_match("EXAMPLE.COM"));
        assert!(re.is_match("example.com"));
        assert!(!re.is_match("example.org"));
    }

    #[test]
    fn invalid_pattern_fails_list() {
        let patterns = vec!["good".to_string(), "(bad".to_string()];
        let err = compile_patterns(&patterns).unwrap_err();
        assert!(matches!(err, RulesError::Pattern { pattern, .. } if pattern == "(bad"));
    }

    #[test]
    fn empty_list_matches_everything() {
        assert!(match_any("anything", &[]));
        let regexes = compile_patterns(&["^a".to_string(), "^b".to_string()]).unwrap();
        assert!(match_any("beta", &regexes));
        assert!(!match_any("gamma", &regexes));
    }
}
