/// Finds a country name in free text.
///
/// The catalog only ships a small word list, but callers hold a
/// `dyn CountryExtractor` so a real gazetteer can replace it.
pub trait CountryExtractor: Send + Sync {
    /// Returns the country found in `text`, or an empty string.
    fn extract_country(&self, text: &str) -> String;
}

pub const DEFAULT_COUNTRIES: &[&str] = &["USA", "Germany", "France", "UK", "Canada", "Japan", "Italy"];

/// Case-insensitive substring match against a fixed list; the first list
/// entry found in the text wins.
pub struct WordListCountries {
    countries: Vec<String>,
}

impl WordListCountries {
    pub fn new<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            countries: countries.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for WordListCountries {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRIES.iter().copied())
    }
}

impl CountryExtractor for WordListCountries {
    fn extract_country(&self, text: &str) -> String {
        let haystack = text.to_lowercase();
        self.countries
            .iter()
            .find(|country| haystack.contains(&country.to_lowercase()))
            .cloned()
            .unwrap_or_default()
    }
}
