//! FlowLang profile parser
//!
//! A profile is block-structured text:
//!
//! ```text
//! # rolling window for Moscow
//! plan rolling_msk {
//!   window {
//!     freights_days_back: 3
//!     limit: 50
//!   }
//!   economics {
//!     rpm_min: 95,5
//!   }
//! }
//! ```
//!
//! `name [label] {` opens a block and `}` closes it. Entries are `key: value`
//! (or `key = value`). The outer `plan <name> { }` wrapper is optional; any
//! other nesting is flattened into dotted section names.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FlowParseError {
    #[error("line {line}: unexpected '}}' with no open block")]
    UnexpectedClose { line: usize },

    #[error("unclosed block '{name}' opened on line {line}")]
    Unclosed { name: String, line: usize },

    #[error("line {line}: expected 'key: value' or 'name {{', got {text:?}")]
    Syntax { line: usize, text: String },
}

/// Parsed profile: raw (uncoerced) values per section
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowDocument {
    /// Name from the `plan <name> {` wrapper, if present
    pub plan_name: Option<String>,
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl FlowDocument {
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }
}

/// Remove a trailing `#` comment, ignoring `#` inside quotes
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '"') | (None, '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, '#') => return &line[..i],
            _ => {}
        }
    }
    line
}

fn is_block_name(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
}

struct OpenBlock {
    name: String,
    line: usize,
    /// The optional outer `plan <name>` wrapper contributes no section name
    is_plan_wrapper: bool,
}

pub fn parse_flow(text: &str) -> Result<FlowDocument, FlowParseError> {
    let mut doc = FlowDocument::default();
    let mut stack: Vec<OpenBlock> = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        if line == "}" || line == "};" {
            if stack.pop().is_none() {
                return Err(FlowParseError::UnexpectedClose { line: line_no });
            }
            continue;
        }

        if let Some(header) = line.strip_suffix('{') {
            let mut parts = header.split_whitespace();
            let name = parts.next().unwrap_or_default();
            let label = parts.next();
            if !is_block_name(name) || parts.next().is_some() {
                return Err(FlowParseError::Syntax {
                    line: line_no,
                    text: line.to_string(),
                });
            }

            let is_plan_wrapper = stack.is_empty() && name == "plan";
            if is_plan_wrapper {
                doc.plan_name = label.map(|l| l.trim_matches('"').to_string());
            }
            stack.push(OpenBlock {
                name: name.to_string(),
                line: line_no,
                is_plan_wrapper,
            });
            continue;
        }

        let Some((key, value)) = split_entry(line) else {
            return Err(FlowParseError::Syntax {
                line: line_no,
                text: line.to_string(),
            });
        };

        let section: Vec<&str> = stack
            .iter()
            .filter(|b| !b.is_plan_wrapper)
            .map(|b| b.name.as_str())
            .collect();
        let section = if section.is_empty() {
            String::new()
        } else {
            section.join(".")
        };

        doc.sections
            .entry(section)
            .or_default()
            .insert(key.to_string(), value.to_string());
    }

    if let Some(open) = stack.pop() {
        return Err(FlowParseError::Unclosed {
            name: open.name,
            line: open.line,
        });
    }

    Ok(doc)
}

/// Split `key: value` / `key = value`, dropping a trailing `;` or `,`
fn split_entry(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':');
    let equals = line.find('=');
    let pos = match (colon, equals) {
        (Some(c), Some(e)) => c.min(e),
        (Some(c), None) => c,
        (None, Some(e)) => e,
        (None, None) => return None,
    };

    let key = line[..pos].trim();
    let value = line[pos + 1..].trim();
    let value = value
        .strip_suffix(';')
        .or_else(|| value.strip_suffix(','))
        .unwrap_or(value)
        .trim();

    if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return None;
    }
    Some((key, value))
}
