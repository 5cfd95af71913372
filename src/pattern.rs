//! Namespace pattern matching
//!
//! Glob and brace-alternation matching over namespace segment names.
//! Patterns are matched one namespace segment at a time by callers; a
//! pattern never crosses a `.` boundary here.
//!
//! Supported syntax within a segment:
//! - `*` matches any run of characters
//! - `?` matches exactly one character
//! - `[abc]` / `[!abc]` character classes
//! - `{a,b,...}` brace alternation, which may nest
//! - `\}` (and other backslash-escaped symbols) match literally

use regex::Regex;
use std::collections::HashSet;

/// Check whether a string contains any wildcard or alternation syntax.
pub fn is_pattern(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[') || s.contains('{')
}

/// Expand brace alternation groups into the full list of flat patterns.
///
/// Finds the right-most, inner-most `{...}` group and, if it contains a
/// comma-separated list, expands its contents recursively (any of its
/// items may itself be a list enclosed in braces). A `\}` is treated as
/// a literal and unescaped in the final output.
pub fn expand_braces(pattern: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    expand_into(pattern, &mut out, &mut seen);
    out
}

fn expand_into(pattern: &str, out: &mut Vec<String>, seen: &mut HashSet<String>) {
    match innermost_group(pattern) {
        Some((open, close)) => {
            let body = &pattern[open + 1..close];
            if body.contains(',') {
                for alt in body.split(',') {
                    let sub = format!("{}{}{}", &pattern[..open], alt, &pattern[close + 1..]);
                    expand_into(&sub, out, seen);
                }
            } else {
                // Braces around a single alternative are just dropped.
                let sub = format!("{}{}{}", &pattern[..open], body, &pattern[close + 1..]);
                expand_into(&sub, out, seen);
            }
        }
        None => {
            let flat = pattern.replace("\\}", "}");
            if seen.insert(flat.clone()) {
                out.push(flat);
            }
        }
    }
}

/// Locate the right-most unescaped `{` and the first unescaped `}`
/// after it. The span between them contains no further braces, so the
/// group is flat and safe to split on commas.
fn innermost_group(pattern: &str) -> Option<(usize, usize)> {
    let bytes = pattern.as_bytes();
    let open = (0..bytes.len())
        .rev()
        .find(|&i| bytes[i] == b'{' && !is_escaped(bytes, i))?;
    let close = (open + 1..bytes.len())
        .find(|&i| bytes[i] == b'}' && !is_escaped(bytes, i))?;
    Some((open, close))
}

fn is_escaped(bytes: &[u8], i: usize) -> bool {
    i > 0 && bytes[i - 1] == b'\\'
}

/// Filter `entries` down to the ones matching `pattern`, expanding
/// brace alternation first. Order of first match is preserved and
/// duplicates are removed.
pub fn match_entries<S: AsRef<str>>(entries: &[S], pattern: &str) -> Vec<String> {
    let mut matching = Vec::new();
    for variant in expand_braces(pattern) {
        let regex = match glob_to_regex(&variant) {
            Ok(re) => re,
            Err(_) => continue,
        };
        for entry in entries {
            if regex.is_match(entry.as_ref()) {
                matching.push(entry.as_ref().to_string());
            }
        }
    }
    deduplicate(matching)
}

/// Match a single name against a flat (brace-free) glob pattern.
pub fn glob_match(name: &str, pattern: &str) -> bool {
    glob_to_regex(pattern)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Translate a glob pattern into an anchored, case-sensitive regex.
///
/// `*` and `?` never cross into other namespace segments because the
/// callers only hand us a single segment at a time.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() * 2 + 4);
    expr.push('^');
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '\\' if i + 1 < chars.len() => {
                expr.push_str(&regex::escape(&chars[i + 1].to_string()));
                i += 1;
            }
            '[' => {
                // Find the closing bracket; a `]` in first position is
                // part of the class, as in fnmatch.
                let mut j = i + 1;
                if j < chars.len() && (chars[j] == '!' || chars[j] == '^') {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    // Unterminated class matches a literal bracket.
                    expr.push_str("\\[");
                } else {
                    let mut class: String = chars[i + 1..j].iter().collect();
                    class = class.replace('\\', "\\\\");
                    if let Some(rest) = class.strip_prefix('!') {
                        class = format!("^{}", rest);
                    }
                    expr.push('[');
                    expr.push_str(&class);
                    expr.push(']');
                    i = j;
                }
            }
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    expr.push('$');
    Regex::new(&expr)
}

fn deduplicate(entries: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn test_is_pattern() {
        assert!(is_pattern("a.*.c"));
        assert!(is_pattern("a.b?"));
        assert!(is_pattern("a.[bc]"));
        assert!(is_pattern("a.{b,c}"));
        assert!(!is_pattern("a.b.c"));
    }

    #[test]
    fn test_expand_no_braces() {
        assert_eq!(expand_braces("a.b.c"), vec!["a.b.c".to_string()]);
    }

    #[test]
    fn test_expand_simple() {
        assert_eq!(
            sorted(expand_braces("{foo,bar}baz")),
            vec!["barbaz".to_string(), "foobaz".to_string()]
        );
    }

    #[test]
    fn test_expand_nested() {
        assert_eq!(
            sorted(expand_braces("a{b{d,e},c}")),
            vec!["abd".to_string(), "abe".to_string(), "ac".to_string()]
        );
        assert_eq!(
            sorted(expand_braces("a{b,c{d,e}}")),
            vec!["ab".to_string(), "acd".to_string(), "ace".to_string()]
        );
    }

    #[test]
    fn test_expand_escaped_brace() {
        assert_eq!(expand_braces("a\\}b"), vec!["a}b".to_string()]);
    }

    #[test]
    fn test_expand_single_alternative() {
        assert_eq!(expand_braces("a{b}c"), vec!["abc".to_string()]);
    }

    #[test]
    fn test_expand_deduplicates() {
        assert_eq!(expand_braces("{a,a}"), vec!["a".to_string()]);
    }

    #[test]
    fn test_match_entries_glob() {
        let entries = vec!["cpu0", "cpu1", "cpu10", "mem"];
        assert_eq!(match_entries(&entries, "cpu*"), vec!["cpu0", "cpu1", "cpu10"]);
        assert_eq!(match_entries(&entries, "cpu?"), vec!["cpu0", "cpu1"]);
        assert_eq!(match_entries(&entries, "cpu[01]"), vec!["cpu0", "cpu1"]);
        assert_eq!(match_entries(&entries, "cpu[!0]"), vec!["cpu1"]);
        assert_eq!(match_entries(&entries, "mem"), vec!["mem"]);
    }

    #[test]
    fn test_match_entries_braces() {
        let entries = vec!["foobaz", "barbaz", "bazbaz"];
        assert_eq!(
            match_entries(&entries, "{foo,bar}baz"),
            vec!["foobaz", "barbaz"]
        );
    }

    #[test]
    fn test_match_entries_preserves_order_and_dedups() {
        let entries = vec!["a1", "a2", "b1"];
        // Both variants match "a1"; it must appear once, first.
        assert_eq!(match_entries(&entries, "{a1,a*}"), vec!["a1", "a2"]);
    }

    #[test]
    fn test_match_is_case_sensitive() {
        let entries = vec!["Foo", "foo"];
        assert_eq!(match_entries(&entries, "foo"), vec!["foo"]);
    }

    #[test]
    fn test_glob_match_escaped_star() {
        assert!(glob_match("a*b", "a\\*b"));
        assert!(!glob_match("axb", "a\\*b"));
    }
}
