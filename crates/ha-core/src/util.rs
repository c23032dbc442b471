//! String helpers for ids

/// Transliterate `text` to ASCII, lowercase it and join its words with `_`
///
/// Empty input stays empty. Input without any letter or digit becomes
/// `"unknown"`.
pub fn slugify(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let slug = slug::slugify(text).replace('-', "_");
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// Return `preferred`, or `preferred_2`, `preferred_3`, ... whichever is
/// first not rejected by `taken`.
pub fn ensure_unique_string(preferred: &str, taken: impl Fn(&str) -> bool) -> String {
    let mut candidate = preferred.to_string();
    let mut attempt = 1;
    while taken(&candidate) {
        attempt += 1;
        candidate = format!("{preferred}_{attempt}");
    }
    candidate
}
