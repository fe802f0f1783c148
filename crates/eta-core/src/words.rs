//! English word helpers
//!
//! Plural forms are needed to fill the `XP` slot of the PMI discriminators
//! ("Cities such as London").

/// Nouns whose plural is not formed by a suffix rule
const IRREGULAR_NOUNS: &[(&str, &str)] = &[
    ("child", "children"),
    ("foot", "feet"),
    ("goose", "geese"),
    ("man", "men"),
    ("mouse", "mice"),
    ("person", "people"),
    ("tooth", "teeth"),
    ("woman", "women"),
    ("fish", "fish"),
    ("sheep", "sheep"),
    ("series", "series"),
    ("species", "species"),
    ("aircraft", "aircraft"),
];

/// Transform a singular noun (or noun phrase) into its plural form.
///
/// Only the last word of a phrase is inflected, so "Board Game" becomes
/// "Board Games".
pub fn to_plural(singular: &str) -> String {
    let singular = singular.trim_end();
    if singular.is_empty() {
        return String::new();
    }

    let (head, last) = match singular.rfind(' ') {
        Some(pos) => singular.split_at(pos + 1),
        None => ("", singular),
    };

    format!("{head}{}", pluralize_word(last))
}

fn pluralize_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if let Some((_, plural)) = IRREGULAR_NOUNS.iter().find(|(s, _)| *s == lower) {
        return match_case(word, plural);
    }

    let chars: Vec<char> = word.chars().collect();
    if chars.len() < 3 {
        return word.to_string();
    }

    let last = chars[chars.len() - 1].to_ascii_lowercase();
    let second_last = chars[chars.len() - 2].to_ascii_lowercase();
    let stem: String = chars[..chars.len() - 1].iter().collect();

    match (second_last, last) {
        ('a' | 'e' | 'i' | 'o' | 'u', 'y') => format!("{word}s"),
        (_, 'y') => format!("{stem}ies"),
        ('i', 's') => {
            let stem: String = chars[..chars.len() - 2].iter().collect();
            format!("{stem}es")
        }
        (_, 's' | 'z' | 'x') | ('c', 'h') | ('s', 'h') => format!("{word}es"),
        _ => format!("{word}s"),
    }
}

fn match_case(original: &str, replacement: &str) -> String {
    let starts_upper = original.chars().next().is_some_and(char::is_uppercase);
    if !starts_upper {
        return replacement.to_string();
    }

    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Make a string safe for use in a file name
pub fn safe_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_rules() {
        assert_eq!(to_plural("elephant"), "elephants");
        assert_eq!(to_plural("city"), "cities");
        assert_eq!(to_plural("enemy"), "enemies");
        assert_eq!(to_plural("tray"), "trays");
        assert_eq!(to_plural("studio"), "studios");
        assert_eq!(to_plural("box"), "boxes");
        assert_eq!(to_plural("church"), "churches");
        assert_eq!(to_plural("synopsis"), "synopses");
    }

    #[test]
    fn test_phrases_and_case() {
        assert_eq!(to_plural("City"), "Cities");
        assert_eq!(to_plural("Board Game"), "Board Games");
        assert_eq!(to_plural("TV Show"), "TV Shows");
        assert_eq!(to_plural("Fish"), "Fish");
        assert_eq!(to_plural("Woman"), "Women");
    }

    #[test]
    fn test_short_words_unchanged() {
        assert_eq!(to_plural("ox"), "ox");
        assert_eq!(to_plural(""), "");
    }

    #[test]
    fn test_safe_name() {
        assert_eq!(safe_name("Mobile Phone"), "mobile_phone");
        assert_eq!(safe_name("TV/Show"), "tv_show");
    }
}
