//! Utility functions for feed processing.

/// Only http(s) URLs are fetched.
pub fn is_valid_url(url: &str) -> bool {
    match url::Url::parse(url) {
        Ok(parsed) => parsed.scheme() == "http" || parsed.scheme() == "https",
        Err(_) => false,
    }
}

/// Trims a string, mapping whitespace-only values to `None`.
pub fn non_empty(value: impl AsRef<str>) -> Option<String> {
    let trimmed = value.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Repairs the most common ways publishers break their XML so a second parse
/// attempt can succeed.
pub fn cleanup_xml(xml: &str) -> String {
    let mut cleaned = xml.trim_start_matches('\u{FEFF}').trim();

    // Drop anything in front of the document itself
    for marker in ["<?xml", "<rss", "<feed", "<rdf:RDF"] {
        if let Some(start) = cleaned.find(marker) {
            cleaned = &cleaned[start..];
            break;
        }
    }

    // HTML entities are undefined in XML
    let replaced = cleaned
        .replace("&nbsp;", "&#160;")
        .replace("&ndash;", "&#8211;")
        .replace("&mdash;", "&#8212;")
        .replace("&lsquo;", "&#8216;")
        .replace("&rsquo;", "&#8217;")
        .replace("&ldquo;", "&#8220;")
        .replace("&rdquo;", "&#8221;")
        .replace("&hellip;", "&#8230;")
        .replace("&amp;amp;", "&amp;");

    replaced
        .chars()
        .filter(|&c| {
            matches!(c,
                '\u{0009}' | '\u{000A}' | '\u{000D}' |
                '\u{0020}'..='\u{D7FF}' |
                '\u{E000}'..='\u{FFFD}' |
                '\u{10000}'..='\u{10FFFF}'
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_url() {
        assert!(is_valid_url("https://example.com/feed.xml"));
        assert!(is_valid_url("http://example.com/rss"));
        assert!(!is_valid_url("file:///etc/passwd"));
        assert!(!is_valid_url("not a url"));
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty("  hello "), Some("hello".to_string()));
        assert_eq!(non_empty(" \n\t"), None);
    }

    #[test]
    fn test_cleanup_xml_strips_prefix_and_entities() {
        let dirty = "\u{FEFF}  garbage<rss version=\"2.0\"><title>A&nbsp;B\u{0001}</title></rss>";
        let cleaned = cleanup_xml(dirty);
        assert!(cleaned.starts_with("<rss"));
        assert!(cleaned.contains("A&#160;B</title>"));
    }
}
