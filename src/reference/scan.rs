//! Locating reference descriptors inside a payload.

use bson::{Bson, Document as BsonDocument};

use crate::document::ReferenceDescriptor;
use crate::query::ExpandMode;

/// One step from a payload root to a nested value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A descriptor found at `segments`; `path` is the dotted key path without array indices.
#[derive(Debug, Clone)]
pub struct Location {
    pub segments: Vec<Segment>,
    pub path: String,
    pub descriptor: ReferenceDescriptor,
    pub raw: Bson,
}

/// Every reference descriptor in `payload`, in document order.
///
/// Descriptors are leaves: the scan never descends into one.
#[must_use]
pub fn scan(payload: &BsonDocument) -> Vec<Location> {
    let mut out = Vec::new();
    let mut segments = Vec::new();
    scan_document(payload, &mut segments, "", &mut out);
    out
}

fn scan_document(doc: &BsonDocument, segments: &mut Vec<Segment>, path: &str, out: &mut Vec<Location>) {
    for (key, value) in doc {
        let child = join(path, key);
        segments.push(Segment::Key(key.clone()));
        scan_value(value, segments, &child, out);
        segments.pop();
    }
}

fn scan_value(value: &Bson, segments: &mut Vec<Segment>, path: &str, out: &mut Vec<Location>) {
    if let Some(descriptor) = ReferenceDescriptor::parse(value) {
        out.push(Location {
            segments: segments.clone(),
            path: path.to_string(),
            descriptor,
            raw: value.clone(),
        });
        return;
    }
    match value {
        Bson::Document(d) => scan_document(d, segments, path, out),
        Bson::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                segments.push(Segment::Index(i));
                scan_value(item, segments, path, out);
                segments.pop();
            }
        }
        _ => {}
    }
}

/// Dotted join that tolerates an empty prefix.
#[must_use]
pub fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() { key.to_string() } else { format!("{prefix}.{key}") }
}

/// Whether a reference at full path `path` is expanded under `mode`.
///
/// With explicit paths, `path` qualifies when an include path names it or
/// continues through it (`authors` qualifies for `authors.books`).
#[must_use]
pub fn eligible(mode: &ExpandMode, path: &str) -> bool {
    match mode {
        ExpandMode::None => false,
        ExpandMode::All => true,
        ExpandMode::Paths(paths) => paths.iter().any(|p| {
            p == path || (p.len() > path.len() && p.starts_with(path) && p.as_bytes()[path.len()] == b'.')
        }),
    }
}

/// Replace the value at `segments`; missing intermediate steps leave the payload unchanged.
pub fn set_at(doc: &mut BsonDocument, segments: &[Segment], value: Bson) {
    let Some((Segment::Key(head), rest)) = segments.split_first() else { return };
    if rest.is_empty() {
        doc.insert(head.clone(), value);
        return;
    }
    if let Some(slot) = doc.get_mut(head.as_str()) {
        set_in(slot, rest, value);
    }
}

fn set_in(slot: &mut Bson, segments: &[Segment], value: Bson) {
    match (slot, segments) {
        (slot, []) => *slot = value,
        (Bson::Document(d), _) => set_at(d, segments, value),
        (Bson::Array(items), [Segment::Index(i), rest @ ..]) => {
            if let Some(item) = items.get_mut(*i) {
                set_in(item, rest, value);
            }
        }
        _ => {}
    }
}
