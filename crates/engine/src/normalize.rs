//! Text normalization for the description↔client-name rule.
//!
//! Bank statement labels arrive uppercased and ASCII-mangled
//! ("VIR SARL DUPONT"), client names as typed ("Société Dupont"), so both
//! sides are lowercased and diacritics-folded before token comparison.

use std::collections::BTreeSet;

/// Fold one character to its unaccented lowercase base.
///
/// Covers the Latin-1/Latin Extended-A range seen in French, Spanish,
/// German and Portuguese business names; anything else passes through
/// lowercased.
fn fold_char(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'œ' => 'o', // "cœur" → "cour" is fine for overlap purposes
        'æ' => 'a',
        'š' => 's',
        'ž' => 'z',
        other => other,
    }
}

/// Lowercase and strip diacritics.
pub fn fold(input: &str) -> String {
    input
        .chars()
        .flat_map(|c| c.to_lowercase())
        .map(fold_char)
        .collect()
}

/// Split into folded alphanumeric tokens of at least `min_len` characters.
pub fn tokens(input: &str, min_len: usize) -> BTreeSet<String> {
    fold(input)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= min_len)
        .map(str::to_string)
        .collect()
}

/// True if the two texts share at least one token of `min_len`+ characters.
pub fn share_token(a: &str, b: &str, min_len: usize) -> bool {
    let ta = tokens(a, min_len);
    if ta.is_empty() {
        return false;
    }
    tokens(b, min_len).intersection(&ta).next().is_some()
}
