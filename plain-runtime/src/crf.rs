//! Collision resolution paths
//!
//! When flattening maps several source fields onto one Plain field, the Plain
//! message carries a companion string recording which source path the value
//! came from. The string is a `/`-separated chain of field names. A segment may
//! carry markers after a `?`, written as `key=value` pairs joined by `;`:
//!
//! ```text
//! payload?oneof=kind/street
//! ```
//!
//! Characters with a structural meaning (`/`, `?`, `;`, `=`, `%`) are
//! percent-escaped inside names, marker keys and marker values, so a path can
//! always be split on the literal separators.

use std::borrow::Cow;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Separator between path segments
pub const SEPARATOR: char = '/';

const MARKER_START: char = '?';
const MARKER_PAIR: char = ';';
const MARKER_ASSIGN: char = '=';

fn needs_escape(c: char) -> bool {
    matches!(c, '/' | '?' | ';' | '=' | '%')
}

/// Percent-escape the structural characters of a path component
pub fn escape(component: &str) -> Cow<'_, str> {
    if !component.chars().any(needs_escape) {
        return Cow::Borrowed(component);
    }

    let mut out = String::with_capacity(component.len() + 8);
    for c in component.chars() {
        if needs_escape(c) {
            out.push_str(&format!("%{:02X}", c as u32));
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// Decode `%XX` escapes. Malformed escapes are kept verbatim.
pub fn unescape(component: &str) -> Cow<'_, str> {
    if !component.contains('%') {
        return Cow::Borrowed(component);
    }

    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

/// One field name in a collision resolution path, with optional markers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathSegment {
    name: String,
    markers: Vec<(String, String)>,
}

impl PathSegment {
    /// Create a segment naming a field
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            markers: Vec::new(),
        }
    }

    /// Attach a marker to the segment
    pub fn with_marker(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.markers.push((key.into(), value.into()));
        self
    }

    /// The field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a marker value by key
    pub fn marker(&self, key: &str) -> Option<&str> {
        self.markers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// All markers in declaration order
    pub fn markers(&self) -> &[(String, String)] {
        &self.markers
    }

    fn parse(raw: &str) -> Self {
        let (name, markers) = match raw.split_once(MARKER_START) {
            Some((name, markers)) => (name, Some(markers)),
            None => (raw, None),
        };

        let markers = markers
            .into_iter()
            .flat_map(|m| m.split(MARKER_PAIR))
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once(MARKER_ASSIGN).unwrap_or((pair, ""));
                (unescape(k).into_owned(), unescape(v).into_owned())
            })
            .collect();

        Self {
            name: unescape(name).into_owned(),
            markers,
        }
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&escape(&self.name))?;
        for (i, (key, value)) in self.markers.iter().enumerate() {
            let sep = if i == 0 { MARKER_START } else { MARKER_PAIR };
            write!(f, "{}{}{}{}", sep, escape(key), MARKER_ASSIGN, escape(value))?;
        }
        Ok(())
    }
}

/// A full collision resolution path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrfPath {
    segments: Vec<PathSegment>,
}

impl CrfPath {
    /// Build a path from segments
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Build a marker-free path from field names
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: names.into_iter().map(PathSegment::new).collect(),
        }
    }

    /// The segments of the path
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Field names only, ready for the path navigator
    pub fn field_names(&self) -> Vec<String> {
        self.segments.iter().map(|s| s.name.clone()).collect()
    }

    /// Whether the path has no segments
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for CrfPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            write!(f, "{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for CrfPath {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split(SEPARATOR)
            .filter(|raw| !raw.is_empty())
            .map(PathSegment::parse)
            .filter(|segment| !segment.name.is_empty())
            .collect();
        Ok(Self { segments })
    }
}

/// Split a collision resolution string into the field names to navigate.
///
/// Empty segments are skipped and markers are dropped.
pub fn parse_crf_path(s: &str) -> Vec<String> {
    s.split(SEPARATOR)
        .filter_map(|raw| {
            let name = raw.split_once(MARKER_START).map_or(raw, |(name, _)| name);
            (!name.is_empty()).then(|| unescape(name).into_owned())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_path() {
        assert_eq!(parse_crf_path("home/street"), vec!["home", "street"]);
    }

    #[test]
    fn test_parse_skips_empty_segments() {
        assert_eq!(parse_crf_path("/home//street/"), vec!["home", "street"]);
        assert!(parse_crf_path("").is_empty());
    }

    #[test]
    fn test_parse_drops_markers() {
        assert_eq!(
            parse_crf_path("card?oneof=payment;k=v/number"),
            vec!["card", "number"]
        );
    }

    #[test]
    fn test_display_escapes_structural_characters() {
        let path = CrfPath::new(vec![
            PathSegment::new("a/b"),
            PathSegment::new("c").with_marker("k", "x=y;z"),
        ]);
        let encoded = path.to_string();
        assert_eq!(encoded, "a%2Fb/c?k=x%3Dy%3Bz");
        assert_eq!(parse_crf_path(&encoded), vec!["a/b", "c"]);
    }

    #[test]
    fn test_from_str_keeps_markers() {
        let path: CrfPath = "card?oneof=payment;variant=card/number".parse().unwrap();
        assert_eq!(path.segments().len(), 2);
        assert_eq!(path.segments()[0].marker("oneof"), Some("payment"));
        assert_eq!(path.segments()[0].marker("variant"), Some("card"));
        assert_eq!(path.segments()[1].marker("oneof"), None);
        assert_eq!(path.to_string(), "card?oneof=payment;variant=card/number");
    }

    #[test]
    fn test_unescape_keeps_malformed_escapes() {
        assert_eq!(unescape("100%"), "100%");
        assert_eq!(unescape("%zz"), "%zz");
        assert_eq!(unescape("%25"), "%");
    }

    #[test]
    fn test_from_names_round_trip() {
        let path = CrfPath::from_names(["profile", "home", "city"]);
        assert_eq!(path.to_string(), "profile/home/city");
        assert_eq!(
            parse_crf_path(&path.to_string()),
            path.field_names()
        );
    }
}
