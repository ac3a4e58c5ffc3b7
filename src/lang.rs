//! Pluggable language detection.
//!
//! The normalizer only needs a pure `&str -> Option<code>` function; the
//! built-in detector is a cheap script-plus-stopword heuristic covering the
//! languages the archive cares about. Callers can swap in anything with the
//! same signature.

/// Signature every detector must satisfy.
pub type Detector = fn(&str) -> Option<String>;

const EN_HINTS: &[&str] = &["the", "and", "of", "to", "is", "you", "that", "for"];
const DE_HINTS: &[&str] = &["der", "die", "das", "und", "ist", "nicht", "ein", "mit"];
const FR_HINTS: &[&str] = &["le", "la", "les", "est", "pas", "une", "vous", "dans"];
const ES_HINTS: &[&str] = &["el", "los", "las", "es", "una", "por", "para", "con"];

/// Detect the dominant language of `text`.
///
/// Returns an ISO 639-1 code, or `None` when the text gives no usable signal
/// (too short, symbols only, unfamiliar script). Never panics.
pub fn detect(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut cyrillic = 0usize;
    let mut latin = 0usize;
    let mut ukrainian = 0usize;
    for c in trimmed.chars() {
        match c {
            'а'..='я' | 'А'..='Я' | 'ё' | 'Ё' => cyrillic += 1,
            'ї' | 'Ї' | 'є' | 'Є' | 'і' | 'І' | 'ґ' | 'Ґ' => {
                cyrillic += 1;
                ukrainian += 1;
            }
            'a'..='z' | 'A'..='Z' => latin += 1,
            _ => {}
        }
    }

    let letters = cyrillic + latin;
    if letters < 3 {
        return None;
    }

    if cyrillic > latin {
        return Some(if ukrainian > 0 { "uk" } else { "ru" }.to_string());
    }

    // Latin script: pick by stopword hits, English on ties with any hits.
    let lower = trimmed.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    let score = |hints: &[&str]| words.iter().filter(|w| hints.contains(*w)).count();

    let scores = [
        ("en", score(EN_HINTS)),
        ("de", score(DE_HINTS)),
        ("fr", score(FR_HINTS)),
        ("es", score(ES_HINTS)),
    ];
    let best = scores.iter().max_by_key(|(_, n)| *n)?;
    if best.1 == 0 {
        return None;
    }
    Some(best.0.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_none() {
        assert_eq!(detect(""), None);
        assert_eq!(detect("   \n"), None);
    }

    #[test]
    fn symbols_yield_none() {
        assert_eq!(detect("1234 !!! :-)"), None);
    }

    #[test]
    fn detects_russian() {
        assert_eq!(
            detect("Сегодня в канале опубликованы новые документы"),
            Some("ru".to_string())
        );
    }

    #[test]
    fn detects_ukrainian_specific_letters() {
        assert_eq!(
            detect("Україна отримала нові повідомлення від підписників"),
            Some("uk".to_string())
        );
    }

    #[test]
    fn detects_english() {
        assert_eq!(
            detect("the channel posted a new update for you to read"),
            Some("en".to_string())
        );
    }

    #[test]
    fn unknown_latin_text_yields_none() {
        assert_eq!(detect("xyzzy plugh frobnicate"), None);
    }
}
