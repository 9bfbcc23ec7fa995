//! Syndication feed parsing.
//!
//! Feeds are RSS 2.0 documents. Extraction is structural (tag matching on
//! `<item>` blocks) rather than a full XML parse: upstream legislation feeds
//! are frequently not well-formed, and we only need four fields.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A feed-derived record considered for enqueueing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub title: String,
    /// Canonical form of the entry link (see [`canonical_url`]).
    pub url: String,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
}

impl CandidateEntry {
    /// Text searched by relevance filters.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

static ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<item\b[^>]*>(.*?)</item>").expect("valid item regex"));
static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("valid title regex"));
static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<link\b[^>]*>(.*?)</link>").expect("valid link regex"));
static PUB_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<pubDate\b[^>]*>(.*?)</pubDate>").expect("valid pubDate regex")
});
static DESCRIPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<description\b[^>]*>(.*?)</description>").expect("valid description regex")
});
static CDATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("valid cdata regex"));
static MARKUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").expect("valid markup regex"));
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

/// Parse a feed document into candidate entries, in document order.
///
/// Entries missing a title or a link are dropped.
pub fn parse_feed(xml: &str) -> Vec<CandidateEntry> {
    ITEM_RE
        .captures_iter(xml)
        .filter_map(|caps| caps.get(1))
        .filter_map(|block| parse_item(block.as_str()))
        .collect()
}

fn parse_item(block: &str) -> Option<CandidateEntry> {
    let title = tag_text(&TITLE_RE, block).filter(|t| !t.is_empty())?;
    let link = tag_text(&LINK_RE, block).filter(|l| !l.is_empty())?;

    let published_at = tag_text(&PUB_DATE_RE, block)
        .and_then(|raw| DateTime::parse_from_rfc2822(&raw).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let description = tag_text(&DESCRIPTION_RE, block)
        .map(|d| strip_markup(&d))
        .unwrap_or_default();

    Some(CandidateEntry {
        title,
        url: canonical_url(&link),
        published_at,
        description,
    })
}

fn tag_text(re: &Regex, block: &str) -> Option<String> {
    let raw = re.captures(block)?.get(1)?.as_str();
    let unwrapped = CDATA_RE.replace_all(raw, "$1");
    Some(decode_entities(unwrapped.trim()))
}

fn strip_markup(text: &str) -> String {
    let plain = MARKUP_RE.replace_all(text, " ");
    WHITESPACE_RE.replace_all(plain.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    // `&amp;` last, so "&amp;lt;" decodes to "&lt;" and not "<".
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Canonical form of a record URL, used for deduplication.
///
/// Trims whitespace and trailing slashes; everything else is significant.
pub fn canonical_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Legislation</title>
    <link>https://legislatie.example/</link>
    <item>
      <title><![CDATA[Ordin privind stingerea incendiilor]]></title>
      <link>https://legislatie.example/act/101/</link>
      <pubDate>Mon, 05 Oct 2026 09:30:00 +0300</pubDate>
      <description>&lt;p&gt;Norme generale de prevenire &amp; stingere&lt;/p&gt;</description>
    </item>
    <item>
      <title>Act without a link</title>
      <description>dropped</description>
    </item>
    <item>
      <title></title>
      <link>https://legislatie.example/act/102</link>
    </item>
    <item>
      <title>Hotărâre fiscală</title>
      <link> https://legislatie.example/act/103 </link>
      <pubDate>not a date</pubDate>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_and_drops_incomplete_ones() {
        let entries = parse_feed(FEED);
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.title, "Ordin privind stingerea incendiilor");
        assert_eq!(first.url, "https://legislatie.example/act/101");
        assert_eq!(first.description, "Norme generale de prevenire & stingere");
        assert_eq!(
            first.published_at.unwrap().to_rfc3339(),
            "2026-10-05T06:30:00+00:00"
        );

        let second = &entries[1];
        assert_eq!(second.url, "https://legislatie.example/act/103");
        assert!(second.published_at.is_none());
        assert!(second.description.is_empty());
    }

    #[test]
    fn channel_level_title_is_not_an_entry() {
        let entries = parse_feed("<rss><channel><title>x</title><link>y</link></channel></rss>");
        assert!(entries.is_empty());
    }

    #[test]
    fn entity_decoding_does_not_double_decode() {
        assert_eq!(decode_entities("a &amp;lt; b"), "a &lt; b");
    }

    #[test]
    fn canonical_url_strips_trailing_slashes() {
        assert_eq!(canonical_url("  https://x.example/a//  "), "https://x.example/a");
        assert_eq!(canonical_url("https://x.example/a"), "https://x.example/a");
    }
}
