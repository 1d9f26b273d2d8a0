//! Argument templates for external codecs.
//!
//! Arguments are plain strings with `{name}` placeholders drawn from a fixed
//! allow-list. `{{` and `}}` produce literal braces. Each rendered argument
//! is handed to the program as-is; no shell is involved.

use std::collections::BTreeMap;

use crate::error::{BundleError, Result};

/// Placeholders a template may use.
pub const PLACEHOLDERS: &[&str] = &["src", "dest", "format", "variant", "quality", "uuid", "ext"];

/// Values for one codec invocation.
#[derive(Debug, Clone, Default)]
pub struct TemplateFields {
    values: BTreeMap<&'static str, String>,
}

impl TemplateFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a placeholder value. Names outside [`PLACEHOLDERS`] are ignored.
    pub fn set(mut self, name: &str, value: impl Into<String>) -> Self {
        if let Some(&key) = PLACEHOLDERS.iter().find(|&&p| p == name) {
            self.values.insert(key, value.into());
        }
        self
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }
}

enum Piece<'a> {
    Text(&'a str),
    Brace(char),
    Field(&'a str),
}

fn parse(arg: &str) -> Result<Vec<Piece<'_>>> {
    let mut pieces = Vec::new();
    let mut rest = arg;

    while !rest.is_empty() {
        let next = rest.find(|c: char| c == '{' || c == '}');
        let Some(at) = next else {
            pieces.push(Piece::Text(rest));
            break;
        };
        if at > 0 {
            pieces.push(Piece::Text(&rest[..at]));
        }
        let tail = &rest[at..];

        if tail.starts_with("{{") {
            pieces.push(Piece::Brace('{'));
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            pieces.push(Piece::Brace('}'));
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            return Err(template_error(arg, "unmatched '}'"));
        } else {
            let close = tail
                .find('}')
                .ok_or_else(|| template_error(arg, "unterminated placeholder"))?;
            let name = &tail[1..close];
            if !PLACEHOLDERS.contains(&name) {
                return Err(template_error(arg, &format!("unknown placeholder {{{}}}", name)));
            }
            pieces.push(Piece::Field(name));
            rest = &tail[close + 1..];
        }
    }

    Ok(pieces)
}

fn template_error(arg: &str, reason: &str) -> BundleError {
    BundleError::Config {
        message: format!("Invalid codec argument '{}': {}", arg, reason),
        help: Some(format!("Allowed placeholders: {}", PLACEHOLDERS.join(", "))),
    }
}

/// Check that every argument only uses known placeholders.
pub fn validate(args: &[String]) -> Result<()> {
    for arg in args {
        parse(arg)?;
    }
    Ok(())
}

/// Substitute placeholders. A placeholder without a value renders empty.
pub fn render(args: &[String], fields: &TemplateFields) -> Result<Vec<String>> {
    args.iter()
        .map(|arg| {
            let mut out = String::with_capacity(arg.len());
            for piece in parse(arg)? {
                match piece {
                    Piece::Text(text) => out.push_str(text),
                    Piece::Brace(c) => out.push(c),
                    Piece::Field(name) => out.push_str(fields.get(name).unwrap_or_default()),
                }
            }
            Ok(out)
        })
        .collect()
}
