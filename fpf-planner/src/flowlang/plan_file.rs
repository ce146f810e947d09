//! Flat plan files and scalar coercion
//!
//! A `<plan>.plan` file holds `key = value` lines with Python-literal-style
//! values: `True`/`false`, integers, decimals with `.` or `,`, quoted or bare
//! strings, `None`, and `[a, b]` lists. The same scalar coercion applies to
//! FlowLang profile values and environment variables.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PlanValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PlanValue>),
}

/// Coerce a raw token into a typed value
pub fn coerce_scalar(raw: &str) -> PlanValue {
    let s = raw.trim();

    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        return PlanValue::List(split_list(inner).into_iter().map(coerce_scalar).collect());
    }

    if let Some(unquoted) = unquote(s) {
        return PlanValue::Str(unquoted.to_string());
    }

    match s.to_lowercase().as_str() {
        "true" => return PlanValue::Bool(true),
        "false" => return PlanValue::Bool(false),
        "none" | "null" => return PlanValue::None,
        _ => {}
    }

    if looks_integer(s) {
        if let Ok(i) = s.parse::<i64>() {
            return PlanValue::Int(i);
        }
    }

    if looks_decimal(s) {
        if let Ok(f) = s.replace(',', ".").parse::<f64>() {
            return PlanValue::Float(f);
        }
    }

    PlanValue::Str(s.to_string())
}

fn unquote(s: &str) -> Option<&str> {
    if s.len() >= 2 {
        for q in ['"', '\''] {
            if s.starts_with(q) && s.ends_with(q) {
                return Some(&s[1..s.len() - 1]);
            }
        }
    }
    None
}

fn looks_integer(s: &str) -> bool {
    let digits = s.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// `12.5`, `-0,75`, `.5`: one separator, digits elsewhere
fn looks_decimal(s: &str) -> bool {
    let body = s.strip_prefix(|c: char| c == '-' || c == '+').unwrap_or(s);
    let separators = body.chars().filter(|c| *c == '.' || *c == ',').count();
    let digits = body.chars().filter(|c| c.is_ascii_digit()).count();
    separators == 1 && digits > 0 && digits + separators == body.chars().count()
}

/// Split list items on commas outside quotes
fn split_list(inner: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (None, '"') | (None, '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ',') => {
                items.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let tail = inner[start..].trim();
    if !tail.is_empty() || !items.is_empty() {
        items.push(tail);
    }
    items.into_iter().filter(|s| !s.is_empty()).collect()
}

/// Parse a flat plan file. Malformed lines are skipped with a warning.
pub fn parse_plan_file(text: &str) -> BTreeMap<String, PlanValue> {
    let mut values = BTreeMap::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            warn!(line = idx + 1, text = line, "Skipping malformed plan line");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            warn!(line = idx + 1, text = line, "Skipping plan line without key");
            continue;
        }
        values.insert(key.to_string(), coerce_scalar(strip_trailing_comment(value)));
    }
    values
}

fn strip_trailing_comment(value: &str) -> &str {
    let trimmed = value.trim();
    if unquote(trimmed).is_some() || trimmed.starts_with('[') {
        return trimmed;
    }
    match trimmed.find(" #") {
        Some(pos) => trimmed[..pos].trim(),
        None => trimmed,
    }
}

/// Conversion from a coerced value into a typed settings field
pub trait FromPlanValue: Sized {
    fn from_plan_value(value: &PlanValue) -> Option<Self>;
}

impl FromPlanValue for bool {
    fn from_plan_value(value: &PlanValue) -> Option<Self> {
        match value {
            PlanValue::Bool(b) => Some(*b),
            PlanValue::Int(0) => Some(false),
            PlanValue::Int(1) => Some(true),
            PlanValue::Str(s) => match s.to_lowercase().as_str() {
                "yes" | "on" => Some(true),
                "no" | "off" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl FromPlanValue for i64 {
    fn from_plan_value(value: &PlanValue) -> Option<Self> {
        match value {
            PlanValue::Int(i) => Some(*i),
            PlanValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }
}

impl FromPlanValue for f64 {
    fn from_plan_value(value: &PlanValue) -> Option<Self> {
        match value {
            PlanValue::Int(i) => Some(*i as f64),
            PlanValue::Float(f) if f.is_finite() => Some(*f),
            _ => None,
        }
    }
}

impl FromPlanValue for String {
    fn from_plan_value(value: &PlanValue) -> Option<Self> {
        match value {
            PlanValue::Str(s) => Some(s.clone()),
            PlanValue::Int(i) => Some(i.to_string()),
            PlanValue::Float(f) => Some(f.to_string()),
            PlanValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(coerce_scalar("TRUE"), PlanValue::Bool(true));
        assert_eq!(coerce_scalar("False"), PlanValue::Bool(false));
        assert_eq!(coerce_scalar("42"), PlanValue::Int(42));
        assert_eq!(coerce_scalar("-7"), PlanValue::Int(-7));
        assert_eq!(coerce_scalar("12.5"), PlanValue::Float(12.5));
        assert_eq!(coerce_scalar("95,5"), PlanValue::Float(95.5));
        assert_eq!(coerce_scalar("'msk'"), PlanValue::Str("msk".into()));
        assert_eq!(coerce_scalar("rolling_msk"), PlanValue::Str("rolling_msk".into()));
        assert_eq!(coerce_scalar("None"), PlanValue::None);
        assert_eq!(coerce_scalar("1.2.3"), PlanValue::Str("1.2.3".into()));
    }

    #[test]
    fn test_list_coercion() {
        assert_eq!(
            coerce_scalar("[1, 'a,b', true]"),
            PlanValue::List(vec![
                PlanValue::Int(1),
                PlanValue::Str("a,b".into()),
                PlanValue::Bool(true)
            ])
        );
        assert_eq!(coerce_scalar("[]"), PlanValue::List(vec![]));
    }

    #[test]
    fn test_parse_plan_file() {
        let values = parse_plan_file(
            "# flat plan\nlimit = 25\nrpm_min = 80,0  # rub/km\nbad line\ndry_run = True\n",
        );
        assert_eq!(values.get("limit"), Some(&PlanValue::Int(25)));
        assert_eq!(values.get("rpm_min"), Some(&PlanValue::Float(80.0)));
        assert_eq!(values.get("dry_run"), Some(&PlanValue::Bool(true)));
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn test_typed_conversion() {
        assert_eq!(f64::from_plan_value(&PlanValue::Int(3)), Some(3.0));
        assert_eq!(i64::from_plan_value(&PlanValue::Float(2.5)), None);
        assert_eq!(bool::from_plan_value(&PlanValue::Int(1)), Some(true));
        assert_eq!(bool::from_plan_value(&PlanValue::Str("maybe".into())), None);
    }
}
