//! Content-type resolution.
//!
//! The resolved kind is matched against the known media-type set after
//! stripping any `;`-delimited parameters (charset and friends); the raw
//! header string is always preserved verbatim alongside the kind.

use mime::Mime;

/// Resolved media-type kind of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentKind {
    /// No `Content-Type` header present.
    #[default]
    None,
    /// `application/json`
    Json,
    /// `application/x-www-form-urlencoded`
    FormUrlEncoded,
    /// `multipart/form-data`
    MultipartFormData,
    /// `text/plain`
    TextPlain,
    /// `text/html`
    TextHtml,
    /// `application/xml` or `text/xml`
    Xml,
    /// `application/octet-stream`
    OctetStream,
    /// Present but not in the known set; the raw string is preserved.
    Custom,
}

impl ContentKind {
    /// Match a raw content-type string against the known media-type set.
    ///
    /// Parameters after `;` are ignored for matching. A present but
    /// unrecognized (or unparsable) value classifies as [`Custom`](Self::Custom).
    #[must_use]
    pub fn resolve(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::None;
        }
        let Ok(parsed) = trimmed.parse::<Mime>() else {
            return Self::Custom;
        };
        match parsed.essence_str() {
            "application/json" => Self::Json,
            "application/x-www-form-urlencoded" => Self::FormUrlEncoded,
            "multipart/form-data" => Self::MultipartFormData,
            "text/plain" => Self::TextPlain,
            "text/html" => Self::TextHtml,
            "application/xml" | "text/xml" => Self::Xml,
            "application/octet-stream" => Self::OctetStream,
            _ => Self::Custom,
        }
    }

    /// Canonical media-type string for a known kind, if it has one.
    #[must_use]
    pub fn canonical(&self) -> Option<&'static str> {
        match self {
            Self::None | Self::Custom => None,
            Self::Json => Some("application/json"),
            Self::FormUrlEncoded => Some("application/x-www-form-urlencoded"),
            Self::MultipartFormData => Some("multipart/form-data"),
            Self::TextPlain => Some("text/plain"),
            Self::TextHtml => Some("text/html"),
            Self::Xml => Some("application/xml"),
            Self::OctetStream => Some("application/octet-stream"),
        }
    }
}

/// Strip a leading `content-type:` header prefix (case-insensitive, with
/// optional following whitespace) and a trailing CRLF from a raw
/// content-type value.
///
/// Callers sometimes hand over a whole header line; the stored string
/// should be the bare media-type value either way.
#[must_use]
pub fn strip_header_decoration(raw: &str) -> &str {
    const PREFIX: &str = "content-type:";
    let mut value = raw;
    if let Some(head) = value.get(..PREFIX.len()) {
        if head.eq_ignore_ascii_case(PREFIX) {
            value = value[PREFIX.len()..].trim_start_matches(' ');
        }
    }
    value.strip_suffix("\r\n").unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_resolve_known_media_types() {
        assert_eq!(ContentKind::resolve("application/json"), ContentKind::Json);
        assert_eq!(
            ContentKind::resolve("application/x-www-form-urlencoded"),
            ContentKind::FormUrlEncoded
        );
        assert_eq!(ContentKind::resolve("text/html"), ContentKind::TextHtml);
        assert_eq!(ContentKind::resolve("text/xml"), ContentKind::Xml);
    }

    #[test]
    fn test_should_ignore_parameters_when_matching() {
        assert_eq!(
            ContentKind::resolve("application/json; charset=utf-8"),
            ContentKind::Json
        );
        assert_eq!(
            ContentKind::resolve("multipart/form-data; boundary=xyz"),
            ContentKind::MultipartFormData
        );
    }

    #[test]
    fn test_should_classify_unknown_type_as_custom() {
        assert_eq!(
            ContentKind::resolve("application/vnd.example+cbor"),
            ContentKind::Custom
        );
    }

    #[test]
    fn test_should_classify_unparsable_type_as_custom() {
        assert_eq!(ContentKind::resolve("not a mime type"), ContentKind::Custom);
    }

    #[test]
    fn test_should_resolve_empty_to_none() {
        assert_eq!(ContentKind::resolve(""), ContentKind::None);
        assert_eq!(ContentKind::resolve("   "), ContentKind::None);
    }

    #[test]
    fn test_should_strip_header_prefix_case_insensitively() {
        assert_eq!(
            strip_header_decoration("content-type: text/plain"),
            "text/plain"
        );
        assert_eq!(
            strip_header_decoration("Content-Type: text/plain"),
            "text/plain"
        );
        assert_eq!(
            strip_header_decoration("CONTENT-TYPE:text/plain\r\n"),
            "text/plain"
        );
    }

    #[test]
    fn test_should_leave_bare_value_unchanged() {
        assert_eq!(
            strip_header_decoration("application/json; charset=utf-8"),
            "application/json; charset=utf-8"
        );
    }
}
