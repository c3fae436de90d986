//! `${NAME}` placeholder expansion for commands and container settings.

use super::Environment;

/// Returns the placeholder names referenced by `template`, in order of appearance.
///
/// Only well-formed placeholders (`${` + identifier + `}`) are reported; a lone
/// `$` or an unterminated `${` is left as literal text.
#[must_use]
pub fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    scan(template, |segment| {
        if let Segment::Placeholder(name) = segment {
            names.push(name.to_string());
        }
    });
    names
}

/// Expands every placeholder in `template` from `env`.
///
/// # Errors
///
/// Returns the name of the first placeholder that has no value.
pub fn expand(template: &str, env: &Environment) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut missing = None;
    scan(template, |segment| match segment {
        Segment::Literal(text) => out.push_str(text),
        Segment::Placeholder(name) => match env.get(name) {
            Some(value) => out.push_str(value),
            None => {
                if missing.is_none() {
                    missing = Some(name.to_string());
                }
            }
        },
    });
    match missing {
        Some(name) => Err(name),
        None => Ok(out),
    }
}

enum Segment<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn scan<'a>(template: &'a str, mut visit: impl FnMut(Segment<'a>)) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        if is_identifier(name) {
            if start > 0 {
                visit(Segment::Literal(&rest[..start]));
            }
            visit(Segment::Placeholder(name));
        } else {
            visit(Segment::Literal(&rest[..start + 2 + end + 1]));
        }
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        visit(Segment::Literal(rest));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> Environment {
        Environment::from_pairs([("PORT", "8074"), ("HOST", "localhost")])
    }

    #[test]
    fn test_expand_placeholders() {
        let out = expand("http://${HOST}:${PORT}/status", &env()).unwrap();
        assert_eq!(out, "http://localhost:8074/status");
    }

    #[test]
    fn test_expand_missing_reports_name() {
        let err = expand("${HOST}:${MISSING}", &env()).unwrap_err();
        assert_eq!(err, "MISSING");
    }

    #[test]
    fn test_literal_dollar_is_preserved() {
        let out = expand("cost $5 and ${not-valid} and ${unterminated", &env()).unwrap();
        assert_eq!(out, "cost $5 and ${not-valid} and ${unterminated");
    }

    #[test]
    fn test_placeholders_in_order() {
        assert_eq!(
            placeholders("${A}-${B_2}-${A}"),
            vec!["A".to_string(), "B_2".to_string(), "A".to_string()]
        );
        assert!(placeholders("no placeholders").is_empty());
    }
}
