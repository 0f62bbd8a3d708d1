//! Document Model - normalized rich content for a shared note.
//!
//! A note's content is one of:
//! - a legacy scalar: a bare string written before structured content existed
//! - a structured document: an ordered sequence of [`Run`]s (text or embedded media)
//!
//! On the wire a structured document is a delta-style object:
//!
//! ```text
//! {"ops": [{"insert": "hello "}, {"insert": {"image": "https://.../cat.png"}}]}
//! ```
//!
//! Editing positions ("cursors") count one unit per character and one unit per
//! media run, the way a rich editor counts an embed.

use crate::error::{FormatError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;

/// Text shown in place of content that could not be normalized.
pub const UNREADABLE_PLACEHOLDER: &str = "[unreadable note content]";

/// Stable reference (retrieval URL) to an uploaded media object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(pub String);

impl MediaRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of an embedded media run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
}

/// A typed content unit within a structured document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Run {
    /// A run of plain text.
    Text { text: String },
    /// An embedded media object.
    Media { kind: MediaKind, reference: MediaRef },
}

impl Run {
    pub fn text(text: impl Into<String>) -> Self {
        Run::Text { text: text.into() }
    }

    pub fn image(reference: MediaRef) -> Self {
        Run::Media {
            kind: MediaKind::Image,
            reference,
        }
    }

    /// The text of a text run, `None` for media.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Run::Text { text } => Some(text),
            Run::Media { .. } => None,
        }
    }

    /// The reference of a media run, `None` for text.
    pub fn as_media(&self) -> Option<&MediaRef> {
        match self {
            Run::Media { reference, .. } => Some(reference),
            Run::Text { .. } => None,
        }
    }

    /// Number of cursor positions this run occupies.
    pub fn cursor_len(&self) -> usize {
        match self {
            Run::Text { text } => text.chars().count(),
            Run::Media { .. } => 1,
        }
    }

    fn to_op(&self) -> Value {
        match self {
            Run::Text { text } => json!({ "insert": text }),
            Run::Media {
                kind: MediaKind::Image,
                reference,
            } => json!({ "insert": { "image": reference.as_str() } }),
        }
    }

    fn from_op(index: usize, op: &Value) -> Result<Run> {
        let invalid = |reason: &str| FormatError::InvalidRun {
            index,
            reason: reason.to_string(),
        };

        let insert = op
            .as_object()
            .ok_or_else(|| invalid("operation is not an object"))?
            .get("insert")
            .ok_or_else(|| invalid("operation has no insert"))?;

        match insert {
            Value::String(text) => Ok(Run::text(text.clone())),
            Value::Object(embed) => match embed.get("image") {
                Some(Value::String(url)) => Ok(Run::image(MediaRef::new(url.clone()))),
                Some(_) => Err(invalid("image reference is not a string")),
                None => Err(invalid("unsupported embed")),
            },
            _ => Err(invalid("insert is neither text nor an embed")),
        }
    }
}

/// Normalized rich content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Document {
    /// A bare string from before the structured model existed.
    Legacy(String),
    /// An ordered sequence of runs.
    Structured(Vec<Run>),
}

impl Default for Document {
    fn default() -> Self {
        Document::Structured(Vec::new())
    }
}

impl Document {
    /// Build a structured document, merging adjacent text runs and dropping empty ones.
    pub fn from_runs(runs: impl IntoIterator<Item = Run>) -> Self {
        Document::Structured(compact(runs.into_iter().collect()))
    }

    /// A single-run text document.
    pub fn text(text: impl Into<String>) -> Self {
        Document::from_runs([Run::text(text)])
    }

    /// The visible placeholder used for content that failed to normalize.
    pub fn unreadable() -> Self {
        Document::Structured(vec![Run::text(UNREADABLE_PLACEHOLDER)])
    }

    /// Classify a raw payload, failing on shapes the model does not know.
    pub fn try_normalize(raw: &Value) -> Result<Self> {
        match raw {
            Value::Null => Ok(Document::Legacy(String::new())),
            Value::String(s) => Ok(Document::Legacy(s.clone())),
            Value::Object(map) => match map.get("ops") {
                Some(Value::Array(ops)) => {
                    let runs = ops
                        .iter()
                        .enumerate()
                        .map(|(index, op)| Run::from_op(index, op))
                        .collect::<Result<Vec<_>>>()?;
                    Ok(Document::Structured(compact(runs)))
                }
                Some(other) => Err(FormatError::UnknownFormat {
                    found: format!("ops of type {}", type_name(other)),
                }),
                None => Err(FormatError::UnknownFormat {
                    found: "object without ops".to_string(),
                }),
            },
            other => Err(FormatError::UnknownFormat {
                found: type_name(other).to_string(),
            }),
        }
    }

    /// Classify a raw payload. Unknown shapes become [`Document::unreadable`]
    /// so a corrupted record never takes the viewer down.
    pub fn normalize(raw: &Value) -> Self {
        Document::try_normalize(raw).unwrap_or_else(|_| Document::unreadable())
    }

    /// The wire representation.
    pub fn to_raw(&self) -> Value {
        match self {
            Document::Legacy(s) => Value::String(s.clone()),
            Document::Structured(runs) => {
                let mut map = Map::new();
                map.insert(
                    "ops".to_string(),
                    Value::Array(runs.iter().map(Run::to_op).collect()),
                );
                Value::Object(map)
            }
        }
    }

    /// Concatenation of all text, media contributing nothing. At most one
    /// trailing line separator is removed.
    pub fn to_plain_text(&self) -> String {
        let mut text = match self {
            Document::Legacy(s) => s.clone(),
            Document::Structured(runs) => runs.iter().filter_map(Run::as_text).collect(),
        };
        if text.ends_with('\n') {
            text.pop();
            if text.ends_with('\r') {
                text.pop();
            }
        }
        text
    }

    /// True when there is nothing worth submitting.
    pub fn is_empty(&self) -> bool {
        !self.has_media() && self.to_plain_text().trim().is_empty()
    }

    pub fn has_media(&self) -> bool {
        match self {
            Document::Legacy(_) => false,
            Document::Structured(runs) => runs.iter().any(|run| run.as_media().is_some()),
        }
    }

    /// All media references, in document order.
    pub fn media_refs(&self) -> Vec<&MediaRef> {
        match self {
            Document::Legacy(_) => Vec::new(),
            Document::Structured(runs) => runs.iter().filter_map(Run::as_media).collect(),
        }
    }

    /// Runs of this document. A non-empty legacy scalar is a single text run.
    pub fn runs(&self) -> Vec<Run> {
        match self {
            Document::Legacy(s) if s.is_empty() => Vec::new(),
            Document::Legacy(s) => vec![Run::text(s.clone())],
            Document::Structured(runs) => runs.clone(),
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Document::Legacy(_))
    }

    /// Number of cursor positions in the document.
    pub fn len(&self) -> usize {
        match self {
            Document::Legacy(s) => s.chars().count(),
            Document::Structured(runs) => runs.iter().map(Run::cursor_len).sum(),
        }
    }

    /// Insert text at a cursor position (clamped to the end).
    pub fn insert_text(&mut self, at: usize, text: &str) {
        if text.is_empty() {
            return;
        }
        match self {
            Document::Legacy(s) => {
                let byte = char_to_byte(s, at);
                s.insert_str(byte, text);
            }
            Document::Structured(runs) => {
                let index = split_at(runs, at);
                runs.insert(index, Run::text(text));
                *runs = compact(std::mem::take(runs));
            }
        }
    }

    /// Remove `len` cursor positions starting at `at`.
    pub fn delete(&mut self, at: usize, len: usize) {
        if len == 0 {
            return;
        }
        match self {
            Document::Legacy(s) => {
                let start = char_to_byte(s, at);
                let end = char_to_byte(s, at.saturating_add(len));
                s.replace_range(start..end, "");
            }
            Document::Structured(runs) => {
                let start = split_at(runs, at);
                let end = split_at(runs, at.saturating_add(len));
                runs.drain(start..end);
                *runs = compact(std::mem::take(runs));
            }
        }
    }

    /// Insert a media run at a cursor position (clamped to the end).
    ///
    /// A legacy scalar is converted to a structured document first.
    /// Returns the position the run landed at.
    pub fn splice_media(&mut self, at: usize, reference: MediaRef) -> usize {
        let mut runs = self.take_runs();
        let at = at.min(runs.iter().map(Run::cursor_len).sum());
        let index = split_at(&mut runs, at);
        runs.insert(index, Run::image(reference));
        *self = Document::Structured(compact(runs));
        at
    }

    /// Move the content out as runs, leaving an empty document behind.
    fn take_runs(&mut self) -> Vec<Run> {
        match std::mem::take(self) {
            Document::Legacy(s) => compact(vec![Run::text(s)]),
            Document::Structured(runs) => runs,
        }
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_plain_text())
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_raw().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Document::try_normalize(&raw).map_err(serde::de::Error::custom)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Byte offset of the `at`-th character, clamped to the end.
fn char_to_byte(s: &str, at: usize) -> usize {
    s.char_indices().nth(at).map(|(i, _)| i).unwrap_or(s.len())
}

/// Split runs so that a run boundary exists at cursor `at`; returns the run
/// index sitting at that boundary.
fn split_at(runs: &mut Vec<Run>, at: usize) -> usize {
    let mut pos = 0;
    for index in 0..runs.len() {
        if pos >= at {
            return index;
        }
        let len = runs[index].cursor_len();
        if at < pos + len {
            if let Run::Text { text } = &mut runs[index] {
                let tail = text.split_off(char_to_byte(text, at - pos));
                runs.insert(index + 1, Run::text(tail));
                return index + 1;
            }
        }
        pos += len;
    }
    runs.len()
}

/// Merge adjacent text runs and drop empty ones.
fn compact(runs: Vec<Run>) -> Vec<Run> {
    let mut out: Vec<Run> = Vec::with_capacity(runs.len());
    for run in runs {
        match run {
            Run::Text { text } if text.is_empty() => {}
            Run::Text { text } => match out.last_mut() {
                Some(Run::Text { text: prev }) => prev.push_str(&text),
                _ => out.push(Run::Text { text }),
            },
            media => out.push(media),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(url: &str) -> MediaRef {
        MediaRef::new(url)
    }

    #[test]
    fn test_plain_text_skips_media() {
        let doc = Document::Structured(vec![
            Run::text("a"),
            Run::image(img("https://cdn/x.png")),
            Run::text("b"),
        ]);
        assert_eq!(doc.to_plain_text(), "ab");
        assert_eq!(Document::Legacy("hello".into()).to_plain_text(), "hello");
    }

    #[test]
    fn test_plain_text_trims_one_trailing_newline() {
        assert_eq!(Document::text("line\n\n").to_plain_text(), "line\n");
        assert_eq!(Document::Legacy("line\r\n".into()).to_plain_text(), "line");
        assert_eq!(Document::text("line").to_plain_text(), "line");
    }

    #[test]
    fn test_empty_detection() {
        assert!(Document::Structured(vec![]).is_empty());
        assert!(Document::Legacy(String::new()).is_empty());
        assert!(Document::Structured(vec![Run::text("")]).is_empty());
        assert!(Document::text("  \n").is_empty());
        assert!(!Document::text("x").is_empty());
        assert!(!Document::from_runs([Run::image(img("u"))]).is_empty());
    }

    #[test]
    fn test_normalize_shapes() {
        assert_eq!(
            Document::normalize(&json!("plain")),
            Document::Legacy("plain".into())
        );
        assert_eq!(
            Document::normalize(&Value::Null),
            Document::Legacy(String::new())
        );

        let raw = json!({"ops": [
            {"insert": "hi "},
            {"insert": {"image": "https://cdn/a.png"}},
            {"insert": "there", "attributes": {"bold": true}},
        ]});
        let doc = Document::normalize(&raw);
        assert_eq!(
            doc,
            Document::Structured(vec![
                Run::text("hi "),
                Run::image(img("https://cdn/a.png")),
                Run::text("there"),
            ])
        );
        assert_eq!(Document::normalize(&doc.to_raw()), doc);
    }

    #[test]
    fn test_unknown_shapes_fail_closed() {
        for raw in [
            json!(42),
            json!([1, 2]),
            json!({"blocks": []}),
            json!({"ops": [{"insert": {"video": "x"}}]}),
            json!({"ops": [{"retain": 3}]}),
        ] {
            assert!(Document::try_normalize(&raw).is_err(), "{raw}");
            assert_eq!(Document::normalize(&raw), Document::unreadable());
        }

        let err = Document::try_normalize(&json!({"ops": ["x"]})).unwrap_err();
        assert!(matches!(err, FormatError::InvalidRun { index: 0, .. }));
    }

    #[test]
    fn test_splice_media_splits_text() {
        let mut doc = Document::text("hello world");
        let at = doc.splice_media(5, img("u1"));
        assert_eq!(at, 5);
        assert_eq!(
            doc,
            Document::Structured(vec![
                Run::text("hello"),
                Run::image(img("u1")),
                Run::text(" world"),
            ])
        );
        assert_eq!(doc.len(), 12);
        assert_eq!(doc.to_plain_text(), "hello world");
    }

    #[test]
    fn test_splice_media_into_legacy_and_past_end() {
        let mut doc = Document::Legacy("ab".into());
        let at = doc.splice_media(99, img("u"));
        assert_eq!(at, 2);
        assert!(!doc.is_legacy());
        assert_eq!(doc.media_refs(), vec![&img("u")]);
        assert_eq!(doc.runs().last(), Some(&Run::image(img("u"))));
    }

    #[test]
    fn test_insert_and_delete_around_media() {
        let mut doc = Document::from_runs([Run::text("ab"), Run::image(img("u")), Run::text("cd")]);
        doc.insert_text(3, "X");
        assert_eq!(doc.to_plain_text(), "abXcd");
        assert_eq!(doc.runs()[1], Run::image(img("u")));

        // Remove "b", the image and "X".
        doc.delete(1, 3);
        assert_eq!(doc, Document::text("acd"));
    }

    #[test]
    fn test_multibyte_positions() {
        let mut doc = Document::Legacy("héllo".into());
        doc.insert_text(2, "!");
        assert_eq!(doc.to_plain_text(), "hé!llo");
        doc.delete(0, 2);
        assert_eq!(doc.to_plain_text(), "!llo");
    }

    #[test]
    fn test_serde_goes_through_normalizer() {
        let doc = Document::from_runs([Run::text("t"), Run::image(img("u"))]);
        let encoded = serde_json::to_string(&doc).unwrap();
        let decoded: Document = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, doc);

        assert!(serde_json::from_str::<Document>("17").is_err());
    }
}
