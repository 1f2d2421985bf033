//! List parsing and formatting.
//!
//! Lists are whitespace-separated words where braces and double quotes group,
//! and backslashes escape. [`merge_list`] produces text that [`split_list`]
//! parses back into the same elements.

use crate::error::Exception;

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\n' | '\r' | '\x0b' | '\x0c')
}

/// Decode one backslash sequence starting after the backslash. Returns the
/// decoded text and how many chars were consumed.
pub(crate) fn backslash(chars: &[char], pos: usize) -> (String, usize) {
    let Some(&c) = chars.get(pos) else {
        return ("\\".to_string(), 0);
    };
    let decoded = match c {
        'n' => "\n".to_string(),
        't' => "\t".to_string(),
        'r' => "\r".to_string(),
        'a' => "\x07".to_string(),
        'b' => "\x08".to_string(),
        'f' => "\x0c".to_string(),
        'v' => "\x0b".to_string(),
        '\n' => {
            // Backslash-newline plus leading whitespace collapses to a space.
            let mut n = 1;
            while chars.get(pos + n).is_some_and(|c| *c == ' ' || *c == '\t') {
                n += 1;
            }
            return (" ".to_string(), n);
        }
        other => other.to_string(),
    };
    (decoded, 1)
}

/// Split a list into its elements.
pub fn split_list(text: &str) -> Result<Vec<String>, Exception> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    loop {
        while i < chars.len() && is_space(chars[i]) {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        match chars[i] {
            '{' => {
                let mut depth = 1;
                let start = i + 1;
                i += 1;
                while i < chars.len() {
                    match chars[i] {
                        '\\' => i += 1,
                        '{' => depth += 1,
                        '}' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        _ => {}
                    }
                    i += 1;
                }
                if depth != 0 {
                    return Err(Exception::error("unmatched open brace in list"));
                }
                out.push(chars[start..i].iter().collect());
                i += 1;
                if i < chars.len() && !is_space(chars[i]) {
                    return Err(Exception::error(
                        "list element in braces followed by non-whitespace",
                    ));
                }
            }
            '"' => {
                let mut elem = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(Exception::error("unmatched open quote in list"));
                        }
                        Some('"') => break,
                        Some('\\') => {
                            let (s, n) = backslash(&chars, i + 1);
                            elem.push_str(&s);
                            i += 1 + n;
                        }
                        Some(c) => {
                            elem.push(*c);
                            i += 1;
                        }
                    }
                }
                out.push(elem);
                i += 1;
                if i < chars.len() && !is_space(chars[i]) {
                    return Err(Exception::error(
                        "list element in quotes followed by non-whitespace",
                    ));
                }
            }
            _ => {
                let mut elem = String::new();
                while i < chars.len() && !is_space(chars[i]) {
                    if chars[i] == '\\' {
                        let (s, n) = backslash(&chars, i + 1);
                        elem.push_str(&s);
                        i += 1 + n;
                    } else {
                        elem.push(chars[i]);
                        i += 1;
                    }
                }
                out.push(elem);
            }
        }
    }

    Ok(out)
}

fn needs_quoting(elem: &str) -> bool {
    elem.is_empty()
        || elem.starts_with('#')
        || elem
            .chars()
            .any(|c| is_space(c) || matches!(c, '{' | '}' | '"' | '\\' | '[' | ']' | '$' | ';'))
}

fn braces_balanced(elem: &str) -> bool {
    let mut depth = 0i32;
    let mut chars = elem.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if chars.next().is_none() {
                    return false;
                }
            }
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Quote a single list element.
pub fn quote_element(elem: &str) -> String {
    if !needs_quoting(elem) {
        return elem.to_string();
    }
    if braces_balanced(elem) {
        return format!("{{{}}}", elem);
    }
    let mut out = String::with_capacity(elem.len() + 8);
    for c in elem.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            ' ' | '{' | '}' | '"' | '\\' | '[' | ']' | '$' | ';' | '#' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out
}

/// Join elements into a well-formed list.
pub fn merge_list<S: AsRef<str>>(elems: &[S]) -> String {
    elems
        .iter()
        .map(|e| quote_element(e.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple() {
        assert_eq!(split_list("a b  c").unwrap(), vec!["a", "b", "c"]);
        assert!(split_list("   ").unwrap().is_empty());
    }

    #[test]
    fn test_split_braces_and_quotes() {
        assert_eq!(
            split_list("{a b} \"c d\" {x {y z}}").unwrap(),
            vec!["a b", "c d", "x {y z}"]
        );
    }

    #[test]
    fn test_split_errors() {
        assert!(split_list("{a b").is_err());
        assert!(split_list("\"abc").is_err());
        assert!(split_list("{a}b").is_err());
    }

    #[test]
    fn test_merge_quotes_special_elements() {
        assert_eq!(merge_list(&["a", "b c", ""]), "a {b c} {}");
        assert_eq!(merge_list(&["#x"]), "{#x}");
        assert_eq!(merge_list(&["a}b"]), "a\\}b");
    }

    #[test]
    fn test_merge_then_split_preserves_awkward_elements() {
        let elems = vec!["plain", "with space", "{", "$var", "[cmd]", "tab\there", "\"q\""];
        let merged = merge_list(&elems);
        assert_eq!(split_list(&merged).unwrap(), elems);
    }
}
