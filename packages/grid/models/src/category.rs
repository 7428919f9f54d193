//! Commerce category normalization.
//!
//! Category keys arrive from the point-of-interest source and from user
//! requests in mixed case, with accents and punctuation ("Épicerie",
//! "cave à vin"). Both sides are folded to the same slug before matching.

use std::sync::LazyLock;

use regex::Regex;

/// Runs of anything that isn't a lowercase ASCII letter or digit.
static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Slug returned for inputs with no usable characters.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Normalizes a category label into a slug.
///
/// Lowercases, folds Latin accents to their base letter, replaces every
/// run of non-alphanumeric characters with `_`, and trims leading and
/// trailing underscores. Returns [`UNKNOWN_CATEGORY`] when nothing is
/// left.
#[must_use]
pub fn normalize_category(input: &str) -> String {
    let folded: String = input.trim().to_lowercase().chars().map(fold_accent).collect();
    let slug = SEPARATOR_RE.replace_all(&folded, "_");
    let slug = slug.trim_matches('_');

    if slug.is_empty() {
        UNKNOWN_CATEGORY.to_string()
    } else {
        slug.to_string()
    }
}

const fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'œ' => 'o',
        'æ' => 'a',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_accents_and_separators() {
        assert_eq!(normalize_category("Épicerie"), "epicerie");
        assert_eq!(normalize_category("cave à vin"), "cave_a_vin");
        assert_eq!(normalize_category("  Fruits & Légumes!! "), "fruits_legumes");
        assert_eq!(normalize_category("wine_shop"), "wine_shop");
    }

    #[test]
    fn empty_input_is_unknown() {
        assert_eq!(normalize_category(""), UNKNOWN_CATEGORY);
        assert_eq!(normalize_category(" -- "), UNKNOWN_CATEGORY);
    }

    #[test]
    fn is_idempotent() {
        for input in ["Supermarché", "magasin bio", "BAKERY", "fast-food"] {
            let once = normalize_category(input);
            assert_eq!(normalize_category(&once), once, "not idempotent for {input}");
        }
    }
}
