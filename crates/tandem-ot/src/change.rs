//! Changeset algebra: retain/delete/insert spans over a document of known
//! length, with apply, compose, and transform.
//!
//! All lengths and offsets are measured in Unicode scalar values (`char`s),
//! never bytes, so peers agree on positions regardless of how their editors
//! store text.
//!
//! # Normal form
//!
//! A changeset is kept normalized at all times: no zero-length spans,
//! adjacent spans of the same kind merged, and at any single position an
//! insert precedes an adjacent delete. Because the normal form is canonical,
//! structural equality is semantic equality.
//!
//! # Tie-breaking
//!
//! When two concurrent changesets insert at the same offset, the side
//! transformed with [`Priority::Left`] keeps its text first; the side
//! transformed with [`Priority::Right`] is shifted past the other's insert.
//! Overlapping deletes are truncated so the region is deleted exactly once.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::OtError;

/// Which side wins position ties during [`ChangeSet::transform`].
///
/// `Left` means the changeset being transformed has priority (its inserts at
/// a contested offset land first); `Right` gives priority to the changeset it
/// is transformed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Left,
    Right,
}

/// One span of a normalized changeset.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Span {
    /// Keep the next `n` chars of the source.
    Retain(usize),
    /// Remove the next `n` chars of the source.
    Delete(usize),
    /// Add text at the current position (consumes no source).
    Insert(String),
}

/// Wire token for one changeset span.
///
/// The encoding of a changeset is the ordered list of its spans as tagged
/// tokens; [`ChangeSet`] serializes through this representation, so
/// `decode(encode(cs)) == cs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpToken {
    Retain(usize),
    Delete(usize),
    Insert(String),
}

/// An immutable, composable description of a text edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    spans: Vec<Span>,
    /// Length of the document this changeset applies to.
    source_len: usize,
    /// Length of the document it produces.
    target_len: usize,
}

impl ChangeSet {
    /// The changeset that leaves a document of length `len` unchanged.
    pub fn identity(len: usize) -> ChangeSet {
        let mut b = Builder::new();
        b.retain(len);
        b.finish()
    }

    /// Single-edit constructor: on a document of length `len`, replace the
    /// range `from..to` with `insert`. This is what an editor produces for a
    /// keystroke, deletion, or paste.
    pub fn replace(len: usize, from: usize, to: usize, insert: &str) -> Result<ChangeSet, OtError> {
        if from > to || to > len {
            return Err(OtError::RangeOutOfBounds { from, to, len });
        }
        let mut b = Builder::new();
        b.retain(from);
        b.insert(insert);
        b.delete(to - from);
        b.retain(len - to);
        Ok(b.finish())
    }

    /// Length of the document this changeset expects.
    pub fn source_len(&self) -> usize {
        self.source_len
    }

    /// Length of the document this changeset produces.
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// Whether this changeset makes no change.
    pub fn is_identity(&self) -> bool {
        self.spans.iter().all(|s| matches!(s, Span::Retain(_)))
    }

    /// Apply this changeset to `content`, producing the edited text.
    ///
    /// Fails with [`OtError::LengthMismatch`] when `content` is not the
    /// length the changeset was made for; the input is never partially
    /// consumed on error.
    pub fn apply(&self, content: &str) -> Result<String, OtError> {
        let actual = char_len(content);
        if actual != self.source_len {
            return Err(OtError::LengthMismatch {
                expected: self.source_len,
                actual,
            });
        }

        let mut out = String::with_capacity(content.len());
        let mut rest = content;
        for span in &self.spans {
            match span {
                Span::Retain(n) => {
                    let (head, tail) = split_at_chars(rest, *n);
                    out.push_str(head);
                    rest = tail;
                }
                Span::Delete(n) => {
                    let (_, tail) = split_at_chars(rest, *n);
                    rest = tail;
                }
                Span::Insert(text) => out.push_str(text),
            }
        }
        Ok(out)
    }

    /// Compose two changesets into one equivalent to applying `self` then
    /// `other`. Associative.
    pub fn compose(&self, other: &ChangeSet) -> Result<ChangeSet, OtError> {
        if self.target_len != other.source_len {
            return Err(OtError::ComposeMismatch {
                left: self.target_len,
                right: other.source_len,
            });
        }

        let mut a = Cursor::new(self);
        let mut b = Cursor::new(other);
        let mut out = Builder::new();

        loop {
            match (a.peek(), b.peek()) {
                // Chars deleted by `self` were never seen by `other`.
                (Some(Piece::Delete(n)), _) => {
                    out.delete(n);
                    a.advance(n);
                }
                // Chars inserted by `other` exist regardless of `self`.
                (_, Some(Piece::Insert(text))) => {
                    out.insert(text);
                    b.advance(char_len(text));
                }
                (None, None) => break,
                (None, Some(_)) | (Some(_), None) => {
                    return Err(OtError::Internal(
                        "compose cursors desynchronized".to_string(),
                    ));
                }
                (Some(Piece::Retain(n)), Some(Piece::Retain(m))) => {
                    let k = n.min(m);
                    out.retain(k);
                    a.advance(k);
                    b.advance(k);
                }
                (Some(Piece::Retain(n)), Some(Piece::Delete(m))) => {
                    let k = n.min(m);
                    out.delete(k);
                    a.advance(k);
                    b.advance(k);
                }
                (Some(Piece::Insert(text)), Some(Piece::Retain(m))) => {
                    let k = char_len(text).min(m);
                    let (head, _) = split_at_chars(text, k);
                    out.insert(head);
                    a.advance(k);
                    b.advance(k);
                }
                // Text inserted by `self` and deleted by `other` cancels out.
                (Some(Piece::Insert(text)), Some(Piece::Delete(m))) => {
                    let k = char_len(text).min(m);
                    a.advance(k);
                    b.advance(k);
                }
            }
        }

        Ok(out.finish())
    }

    /// Rebase `self` against a concurrently-created `other`.
    ///
    /// The result applies to the document produced by `other`. For any two
    /// changesets `a`, `b` over the same document `d`:
    ///
    /// ```text
    /// apply(apply(d, b), transform(a, b, Right)) ==
    /// apply(apply(d, a), transform(b, a, Left))
    /// ```
    ///
    /// which is the convergence property the sync protocol relies on.
    pub fn transform(&self, other: &ChangeSet, priority: Priority) -> Result<ChangeSet, OtError> {
        match priority {
            Priority::Left => Ok(ChangeSet::transform_pair(self, other)?.0),
            Priority::Right => Ok(ChangeSet::transform_pair(other, self)?.1),
        }
    }

    /// Transform two concurrent changesets against each other in one walk.
    ///
    /// `a` is the priority side: where both insert at the same offset, `a`'s
    /// text lands first. Returns `(a', b')` where `a'` applies after `b` and
    /// `b'` applies after `a`, both producing the same merged document.
    pub fn transform_pair(
        a: &ChangeSet,
        b: &ChangeSet,
    ) -> Result<(ChangeSet, ChangeSet), OtError> {
        if a.source_len != b.source_len {
            return Err(OtError::TransformMismatch {
                left: a.source_len,
                right: b.source_len,
            });
        }

        let mut ca = Cursor::new(a);
        let mut cb = Cursor::new(b);
        let mut oa = Builder::new();
        let mut ob = Builder::new();

        loop {
            match (ca.peek(), cb.peek()) {
                // `a` inserts first at a contested position; `b`'s rebased
                // form retains over the new text.
                (Some(Piece::Insert(text)), _) => {
                    let n = char_len(text);
                    oa.insert(text);
                    ob.retain(n);
                    ca.advance(n);
                }
                (_, Some(Piece::Insert(text))) => {
                    let n = char_len(text);
                    oa.retain(n);
                    ob.insert(text);
                    cb.advance(n);
                }
                (None, None) => break,
                (None, Some(_)) | (Some(_), None) => {
                    return Err(OtError::Internal(
                        "transform cursors desynchronized".to_string(),
                    ));
                }
                (Some(Piece::Retain(n)), Some(Piece::Retain(m))) => {
                    let k = n.min(m);
                    oa.retain(k);
                    ob.retain(k);
                    ca.advance(k);
                    cb.advance(k);
                }
                // Both deleted the same region: it is already gone on either
                // side, so neither rebased changeset mentions it.
                (Some(Piece::Delete(n)), Some(Piece::Delete(m))) => {
                    let k = n.min(m);
                    ca.advance(k);
                    cb.advance(k);
                }
                (Some(Piece::Delete(n)), Some(Piece::Retain(m))) => {
                    let k = n.min(m);
                    oa.delete(k);
                    ca.advance(k);
                    cb.advance(k);
                }
                (Some(Piece::Retain(n)), Some(Piece::Delete(m))) => {
                    let k = n.min(m);
                    ob.delete(k);
                    ca.advance(k);
                    cb.advance(k);
                }
            }
        }

        Ok((oa.finish(), ob.finish()))
    }

    /// The ordered token list this changeset encodes to.
    pub fn to_tokens(&self) -> Vec<OpToken> {
        self.spans
            .iter()
            .map(|span| match span {
                Span::Retain(n) => OpToken::Retain(*n),
                Span::Delete(n) => OpToken::Delete(*n),
                Span::Insert(text) => OpToken::Insert(text.clone()),
            })
            .collect()
    }

    /// Rebuild a changeset from a token list, normalizing as it goes.
    pub fn from_tokens(tokens: impl IntoIterator<Item = OpToken>) -> ChangeSet {
        let mut b = Builder::new();
        for token in tokens {
            match token {
                OpToken::Retain(n) => b.retain(n),
                OpToken::Delete(n) => b.delete(n),
                OpToken::Insert(text) => b.insert(&text),
            }
        }
        b.finish()
    }
}

impl Serialize for ChangeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.to_tokens())
    }
}

impl<'de> Deserialize<'de> for ChangeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tokens = Vec::<OpToken>::deserialize(deserializer)?;
        Ok(ChangeSet::from_tokens(tokens))
    }
}

/// Incremental changeset constructor. Normalizes as spans are pushed, so
/// `finish` always yields a changeset in normal form.
#[derive(Debug, Default)]
pub struct Builder {
    spans: Vec<Span>,
    source_len: usize,
    target_len: usize,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Keep the next `n` chars.
    pub fn retain(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.source_len += n;
        self.target_len += n;
        if let Some(Span::Retain(m)) = self.spans.last_mut() {
            *m += n;
        } else {
            self.spans.push(Span::Retain(n));
        }
    }

    /// Remove the next `n` chars.
    pub fn delete(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.source_len += n;
        if let Some(Span::Delete(m)) = self.spans.last_mut() {
            *m += n;
        } else {
            self.spans.push(Span::Delete(n));
        }
    }

    /// Add `text` at the current position. Inserts adjacent to a delete are
    /// placed before it, keeping the normal form canonical.
    pub fn insert(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.target_len += char_len(text);

        // The insert belongs before any trailing delete, appended to an
        // existing insert if one sits there.
        let mut idx = self.spans.len();
        while idx > 0 && matches!(self.spans[idx - 1], Span::Delete(_)) {
            idx -= 1;
        }
        if idx > 0 {
            if let Span::Insert(existing) = &mut self.spans[idx - 1] {
                existing.push_str(text);
                return;
            }
        }
        self.spans.insert(idx, Span::Insert(text.to_string()));
    }

    pub fn finish(self) -> ChangeSet {
        ChangeSet {
            spans: self.spans,
            source_len: self.source_len,
            target_len: self.target_len,
        }
    }
}

/// Remaining portion of the span a [`Cursor`] is parked on.
#[derive(Debug, Clone, Copy)]
enum Piece<'a> {
    Retain(usize),
    Delete(usize),
    Insert(&'a str),
}

/// Walks a changeset's spans, consuming them in char-sized steps so two
/// changesets can be zipped against each other.
struct Cursor<'a> {
    spans: &'a [Span],
    idx: usize,
    /// Chars consumed within the current span.
    chars: usize,
    /// Bytes consumed within the current span (insert spans only).
    bytes: usize,
}

impl<'a> Cursor<'a> {
    fn new(cs: &'a ChangeSet) -> Cursor<'a> {
        Cursor {
            spans: &cs.spans,
            idx: 0,
            chars: 0,
            bytes: 0,
        }
    }

    fn peek(&self) -> Option<Piece<'a>> {
        self.spans.get(self.idx).map(|span| match span {
            Span::Retain(n) => Piece::Retain(n - self.chars),
            Span::Delete(n) => Piece::Delete(n - self.chars),
            Span::Insert(text) => Piece::Insert(&text[self.bytes..]),
        })
    }

    /// Consume `n` chars of the current span, moving to the next span once
    /// it is exhausted. `n` must not exceed the remaining piece.
    fn advance(&mut self, n: usize) {
        match &self.spans[self.idx] {
            Span::Retain(len) | Span::Delete(len) => {
                self.chars += n;
                debug_assert!(self.chars <= *len);
                if self.chars == *len {
                    self.step();
                }
            }
            Span::Insert(text) => {
                let rest = &text[self.bytes..];
                let (head, _) = split_at_chars(rest, n);
                self.chars += n;
                self.bytes += head.len();
                if self.bytes == text.len() {
                    self.step();
                }
            }
        }
    }

    fn step(&mut self) {
        self.idx += 1;
        self.chars = 0;
        self.bytes = 0;
    }
}

/// Char count of `s`.
fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split `s` at the boundary `n` chars in; `n` past the end splits at the end.
fn split_at_chars(s: &str, n: usize) -> (&str, &str) {
    match s.char_indices().nth(n) {
        Some((byte, _)) => s.split_at(byte),
        None => (s, ""),
    }
}
