//! Place-name normalization
//!
//! `normalize` is a projection: applying it to its own output returns the
//! same string. Kind classification and junk detection operate on
//! normalized text only.

use serde::{Deserialize, Serialize};

/// City/settlement/district abbreviations that carry no identity
const FILLER_TOKENS: &[&str] = &[
    "г", "гор", "город", "пгт", "рп", "пос", "п", "с", "д", "дер", "ст", "мкр", "район", "рн",
];

/// Region abbreviations and their full marker words
const EXPANSIONS: &[(&str, &str)] = &[
    ("обл", "область"),
    ("респ", "республика"),
    ("ао", "автономный округ"),
];

const REGION_MARKERS: &[&str] = &["область", "край", "республика", "округ", "автономный"];

const JUNK_VALUES: &[&str] = &[
    "unknown",
    "неизвестно",
    "не указан",
    "не указано",
    "нет данных",
    "ru unk",
    "unk",
    "xx",
    "null",
    "none",
    "н д",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasKind {
    Region,
    Locality,
}

impl AliasKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasKind::Region => "region",
            AliasKind::Locality => "locality",
        }
    }
}

/// Lowercase, fold `ё`, turn punctuation into spaces, expand region
/// abbreviations, drop filler tokens, collapse whitespace
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace('ё', "е").replace("р-н", " ");

    let spaced: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = Vec::new();
    for token in spaced.split_whitespace() {
        if FILLER_TOKENS.contains(&token) {
            continue;
        }
        match EXPANSIONS.iter().find(|(abbr, _)| *abbr == token) {
            Some((_, full)) => tokens.extend(full.split(' ')),
            None => tokens.push(token),
        }
    }

    tokens.join(" ")
}

/// Region if the text carries a region marker or looks like an ISO code (`ru mow`)
pub fn classify_kind(norm: &str) -> AliasKind {
    let tokens: Vec<&str> = norm.split_whitespace().collect();
    let iso_like = tokens.len() == 2 && tokens[0] == "ru" && tokens[1].chars().count() <= 3;
    if iso_like || tokens.iter().any(|t| REGION_MARKERS.contains(t)) {
        AliasKind::Region
    } else {
        AliasKind::Locality
    }
}

/// Placeholder values that must never reach the geocoder
pub fn is_junk(norm: &str) -> bool {
    let norm = norm.trim();
    norm.is_empty()
        || norm.chars().count() == 1
        || JUNK_VALUES.contains(&norm)
        || norm.chars().all(|c| c.is_ascii_digit() || c.is_whitespace())
}
