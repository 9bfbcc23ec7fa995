//! Keyword relevance filter for feed candidates.

use crate::feed::CandidateEntry;

const BUILTIN_KEYWORDS: &str = include_str!("../data/keywords.json");

/// Case-insensitive substring matcher over `title + description`.
///
/// The keyword list is data: load it from configuration with
/// [`KeywordFilter::from_json`] or fall back to [`KeywordFilter::builtin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordFilter {
    keywords: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    /// Parse a JSON array of strings.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let keywords: Vec<String> = serde_json::from_str(json)?;
        Ok(Self::new(keywords))
    }

    /// Occupational-safety and fire-safety vocabulary bundled with the crate.
    pub fn builtin() -> Self {
        Self::from_json(BUILTIN_KEYWORDS).expect("bundled keyword list is valid JSON")
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// First keyword found in the candidate, if any.
    pub fn matched_keyword(&self, entry: &CandidateEntry) -> Option<&str> {
        let haystack = entry.searchable_text().to_lowercase();
        self.keywords
            .iter()
            .find(|k| haystack.contains(k.as_str()))
            .map(String::as_str)
    }

    pub fn is_relevant(&self, entry: &CandidateEntry) -> bool {
        self.matched_keyword(entry).is_some()
    }
}
