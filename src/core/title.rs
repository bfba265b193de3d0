//! Best-effort extraction of year, country and denomination from marketplace
//! listing titles such as `"1965 Germany 20pf commemorative stamp"`.
//!
//! This is a heuristic, not a grammar. Odd titles can yield an empty or
//! wrong country, but parsing never fails on any input.

use regex::{Match, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:18|19|20)\d{2}").unwrap());

static DENOMINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b\d+(?:[.,]\d+)?\s?(?:c|¢|p|d|fr|pf|\$|€|£|kr|sen|yen|mk|cts?|cent|cents)\b")
        .unwrap()
});

static UNIT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:c|¢|p|d|fr|pf|kr|sen|yen|mk|cts?|cent|cents)$").unwrap()
});

const WINDOW: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTitle {
    pub year: String,
    pub country: String,
    pub denomination: String,
}

pub fn parse_title(title: &str) -> ParsedTitle {
    if title.trim().is_empty() {
        return ParsedTitle::default();
    }

    let year_match = YEAR.find(title);
    let denomination_match = DENOMINATION.find(title);

    let mut country = year_match
        .or(denomination_match)
        .map(|anchor| country_near(title, anchor))
        .unwrap_or_default();

    if country.is_empty() {
        country = letter_words(title).into_iter().next().unwrap_or_default().to_string();
    }

    ParsedTitle {
        year: year_match.map(|m| m.as_str().to_string()).unwrap_or_default(),
        country: title_case(&country),
        denomination: denomination_match
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default(),
    }
}

/// First four-digit year starting with 18, 19 or 20 anywhere in `text`.
pub fn find_year(text: &str) -> Option<&str> {
    YEAR.find(text).map(|m| m.as_str())
}

/// Country guess from the words before `anchor`, or after it when nothing
/// precedes it.
fn country_near(title: &str, anchor: Match<'_>) -> String {
    let before = letter_words(&title[..anchor.start()]);
    if !before.is_empty() {
        let filtered: Vec<&str> = before
            .iter()
            .copied()
            .filter(|w| !UNIT_TOKEN.is_match(&w.to_lowercase()))
            .collect();
        let words = if filtered.is_empty() { before } else { filtered };
        let start = words.len().saturating_sub(WINDOW);
        return words[start..].join(" ");
    }

    let after = &title[anchor.end()..];
    let mut picked = Vec::new();
    for token in after.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
        if token.chars().any(|c| c.is_numeric()) {
            break;
        }
        let lower = token.to_lowercase();
        if lower == "stamp" || lower == "stamps" {
            break;
        }
        picked.push(token);
        if picked.len() >= WINDOW {
            break;
        }
    }
    picked.join(" ")
}

fn letter_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Upper-case the first letter of every run of letters, lower-case the rest.
fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_title() {
        assert_eq!(parse_title(""), ParsedTitle::default());
        assert_eq!(parse_title("   "), ParsedTitle::default());
    }

    #[test]
    fn test_year_first_uses_following_words() {
        let parsed = parse_title("1965 Germany 20pf commemorative stamp");
        assert_eq!(parsed.year, "1965");
        assert!(parsed.country.contains("Germany"));
        assert_eq!(parsed.denomination.to_lowercase(), "20pf");
    }

    #[test]
    fn test_denomination_without_year() {
        let parsed = parse_title("USA Andrew Jackson 7c Used");
        assert_eq!(parsed.year, "");
        assert!(parsed.denomination.to_lowercase().contains("7c"));
        assert_eq!(parsed.country, "Usa Andrew Jackson");
    }

    #[test]
    fn test_country_before_year() {
        let parsed = parse_title("Germany 1934 Hindenburg 12pf");
        assert_eq!(parsed.year, "1934");
        assert_eq!(parsed.country, "Germany");
        assert_eq!(parsed.denomination, "12pf");
    }

    #[test]
    fn test_window_keeps_last_three_words() {
        let parsed = parse_title("Old rare Deutsches Reich 1923 inflation");
        assert_eq!(parsed.country, "Rare Deutsches Reich");
    }

    #[test]
    fn test_unit_tokens_are_dropped_from_window() {
        let parsed = parse_title("France 5 fr 1950 stamp");
        assert_eq!(parsed.year, "1950");
        assert_eq!(parsed.denomination, "5 fr");
        assert_eq!(parsed.country, "France");
    }

    #[test]
    fn test_spaced_and_decimal_denominations() {
        assert_eq!(parse_title("Japan 10 sen 1960").denomination, "10 sen");
        assert_eq!(parse_title("Sweden 1,50 kr used").denomination, "1,50 kr");
        assert_eq!(parse_title("Netherlands 25 cents mint").denomination, "25 cents");
        assert_eq!(parse_title("Canada 8 CTS").denomination, "8 CTS");
    }

    #[test]
    fn test_after_window_stops_at_stamp() {
        let parsed = parse_title("1902 Great Britain stamp Edward VII");
        assert_eq!(parsed.country, "Great Britain");
    }

    #[test]
    fn test_after_window_for_leading_denomination() {
        let parsed = parse_title("3c Canada Small Queen");
        assert_eq!(parsed.denomination, "3c");
        assert_eq!(parsed.country, "Canada Small Queen");
    }

    #[test]
    fn test_no_digits_falls_back_to_first_word() {
        let parsed = parse_title("mint hinged old stamp");
        assert_eq!(parsed.year, "");
        assert_eq!(parsed.denomination, "");
        assert_eq!(parsed.country, "Mint");
    }

    #[test]
    fn test_unicode_letters() {
        let parsed = parse_title("ÖSTERREICH 1950 Trachten");
        assert_eq!(parsed.country, "Österreich");
    }

    #[test]
    fn test_never_panics_on_noise() {
        for title in [
            "!!!",
            "'; DROP TABLE stamps; --",
            "$$$ 2.50$ €€",
            "1800",
            "12345678",
            "¢¢¢ 5¢",
            "\t\n",
            "🙂 1999 🙂",
        ] {
            let parsed = parse_title(title);
            assert!(parsed.country.len() <= title.len() * 4);
        }
        assert_eq!(parse_title("!!!"), ParsedTitle::default());
    }

    #[test]
    fn test_find_year() {
        assert_eq!(find_year("issued in 1932 by Germany"), Some("1932"));
        assert_eq!(find_year("no year here 1700"), None);
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("great BRITAIN"), "Great Britain");
        assert_eq!(title_case(""), "");
    }
}
