// Link extraction is pure string work - no HTTP, no regex engine. A cell
// either contains one of the URL shapes we recognize or it doesn't.

use std::fmt;

/// Identifier of a hosted document, parsed out of a spreadsheet cell.
///
/// The id is the stable token Google embeds after the `/d/` path segment;
/// it is what the Docs API is addressed with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path markers that precede the identifier in the URL shapes we accept.
/// Docs links are the common case; Drive file links show up when people
/// paste the sharing dialog's URL instead.
const ID_MARKERS: [&str; 2] = [
    "docs.google.com/document/d/",
    "drive.google.com/file/d/",
];

/// Extract a document identifier from a source cell.
///
/// Returns `None` for empty or whitespace-only cells and for cells that
/// don't contain a recognized URL shape - both are skips, never errors.
/// The identifier is the run of `[A-Za-z0-9_-]` characters after the
/// marker, so `/edit` suffixes, fragments, and query strings are never
/// part of it.
pub fn extract_document_id(cell_text: &str) -> Option<DocumentId> {
    let trimmed = cell_text.trim();
    if trimmed.is_empty() {
        return None;
    }

    for marker in ID_MARKERS {
        if let Some(start) = trimmed.find(marker) {
            let tail = &trimmed[start + marker.len()..];
            let id: String = tail.chars().take_while(|&c| is_id_char(c)).collect();
            if !id.is_empty() {
                return Some(DocumentId(id));
            }
        }
    }

    None
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_of(cell: &str) -> Option<String> {
        extract_document_id(cell).map(|id| id.as_str().to_string())
    }

    #[test]
    fn test_edit_and_bare_urls_yield_same_id() {
        assert_eq!(
            id_of("https://docs.google.com/document/d/ABC123/edit"),
            Some("ABC123".to_string())
        );
        assert_eq!(
            id_of("https://docs.google.com/document/d/ABC123"),
            Some("ABC123".to_string())
        );
        assert_eq!(
            id_of("https://docs.google.com/document/d/ABC123/view"),
            Some("ABC123".to_string())
        );
    }

    #[test]
    fn test_query_and_fragment_excluded_from_id() {
        assert_eq!(
            id_of("https://docs.google.com/document/d/ABC123?usp=sharing"),
            Some("ABC123".to_string())
        );
        assert_eq!(
            id_of("https://docs.google.com/document/d/ABC123/edit#heading=h.xyz"),
            Some("ABC123".to_string())
        );
    }

    #[test]
    fn test_drive_file_links() {
        assert_eq!(
            id_of("https://drive.google.com/file/d/1a-B_c2/view?usp=drivesdk"),
            Some("1a-B_c2".to_string())
        );
    }

    #[test]
    fn test_id_charset_includes_underscore_and_hyphen() {
        assert_eq!(
            id_of("docs.google.com/document/d/a_b-C9/edit"),
            Some("a_b-C9".to_string())
        );
    }

    #[test]
    fn test_empty_and_whitespace_cells() {
        assert_eq!(extract_document_id(""), None);
        assert_eq!(extract_document_id("   \t "), None);
    }

    #[test]
    fn test_unrecognized_text() {
        assert_eq!(extract_document_id("not a url"), None);
        assert_eq!(extract_document_id("https://example.com/d/ABC123"), None);
        assert_eq!(
            extract_document_id("https://docs.google.com/spreadsheets/d/ABC123/edit"),
            None
        );
    }

    #[test]
    fn test_marker_without_id() {
        assert_eq!(extract_document_id("https://docs.google.com/document/d/"), None);
        assert_eq!(extract_document_id("https://docs.google.com/document/d//edit"), None);
    }

    #[test]
    fn test_surrounding_whitespace() {
        assert_eq!(
            id_of("  https://docs.google.com/document/d/XYZ/edit \n"),
            Some("XYZ".to_string())
        );
    }
}
