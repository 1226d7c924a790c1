//! Peritext-style rich-text formatting.
//!
//! Format spans anchor to Fugue character ids, not to indices, so concurrent
//! edits move formatting with the text. Each anchor carries a side bit that
//! decides whether concurrent insertions at a span boundary land inside or
//! outside the span. Per character and per attribute, the span with the
//! greatest `(clock, writer)` pair wins; unformat spans participate with a
//! remove marker and the same precedence.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::text::{CharId, FugueText};
use synckit_core::ReplicaId;

/// Which side of a character an anchor binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorSide {
    /// The anchor sits before the character: the span starts at it.
    Start,
    /// The anchor sits after the character: the span covers through it.
    End,
}

/// A span endpoint: a character id plus the side it binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anchor {
    pub at: CharId,
    pub side: AnchorSide,
}

impl Anchor {
    pub fn before(at: CharId) -> Self {
        Self {
            at,
            side: AnchorSide::Start,
        }
    }

    pub fn after(at: CharId) -> Self {
        Self {
            at,
            side: AnchorSide::End,
        }
    }

    /// The gap index this anchor resolves to in the node order: side
    /// `Start` is the gap before the character, side `End` the gap after.
    fn gap(&self, text: &FugueText) -> Option<usize> {
        let pos = text.position(&self.at)?;
        Some(match self.side {
            AnchorSide::Start => pos,
            AnchorSide::End => pos + 1,
        })
    }
}

/// A format span's value for one attribute: set it, or remove it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttrValue {
    Set(Value),
    Remove,
}

/// One format span. Spans are append-only; precedence between overlapping
/// spans is decided per attribute by `(clock, writer)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatSpan {
    /// Operation identity: `(writer's logical clock, writer)`; also the
    /// idempotence key.
    pub op_id: (u64, ReplicaId),
    pub start: Anchor,
    pub end: Anchor,
    pub attrs: BTreeMap<String, AttrValue>,
    pub clock: u64,
    pub writer: ReplicaId,
}

impl FormatSpan {
    /// Whether the span covers the node-order position `pos`.
    fn covers(&self, text: &FugueText, pos: usize) -> bool {
        match (self.start.gap(text), self.end.gap(text)) {
            (Some(start), Some(end)) => start <= pos && pos < end,
            _ => false,
        }
    }
}

/// The format layer of one text document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RichTextLayer {
    spans: Vec<FormatSpan>,
}

impl RichTextLayer {
    pub fn new() -> Self {
        Self { spans: Vec::new() }
    }

    /// Anchor a formatting range over visible indices of `text`: the span
    /// starts at the character at `start` and covers through the character
    /// at `end`, clamped to the last character. Returns the span to
    /// broadcast, or `None` when the text is empty or the range is void.
    pub fn format(
        &mut self,
        text: &FugueText,
        start: usize,
        end: usize,
        attrs: BTreeMap<String, Value>,
        writer: ReplicaId,
        clock: u64,
    ) -> Option<FormatSpan> {
        let attrs = attrs
            .into_iter()
            .map(|(name, value)| (name, AttrValue::Set(value)))
            .collect();
        self.anchor_span(text, start, end, attrs, writer, clock)
    }

    /// Remove attributes over a range: a span whose attribute values carry
    /// the remove marker, competing under the same precedence as formats.
    pub fn unformat(
        &mut self,
        text: &FugueText,
        start: usize,
        end: usize,
        attrs: &[String],
        writer: ReplicaId,
        clock: u64,
    ) -> Option<FormatSpan> {
        let attrs = attrs
            .iter()
            .map(|name| (name.clone(), AttrValue::Remove))
            .collect();
        self.anchor_span(text, start, end, attrs, writer, clock)
    }

    fn anchor_span(
        &mut self,
        text: &FugueText,
        start: usize,
        end: usize,
        attrs: BTreeMap<String, AttrValue>,
        writer: ReplicaId,
        clock: u64,
    ) -> Option<FormatSpan> {
        let len = text.visible_len();
        if len == 0 || start >= len || end <= start {
            return None;
        }
        let start_id = text.char_id_at_index(start)?.clone();
        // The end anchor binds to the character at `end`, clamped to the
        // last character, and covers through it.
        let end_id = text.char_id_at_index(end.min(len - 1))?.clone();
        let span = FormatSpan {
            op_id: (clock, writer.clone()),
            start: Anchor::before(start_id),
            end: Anchor::after(end_id),
            attrs,
            clock,
            writer,
        };
        self.apply_span(span.clone());
        Some(span)
    }

    /// Install a span (local or remote). Duplicate applies are no-ops by
    /// `op_id`.
    pub fn apply_span(&mut self, span: FormatSpan) -> bool {
        if self.spans.iter().any(|s| s.op_id == span.op_id) {
            return false;
        }
        self.spans.push(span);
        true
    }

    /// Merge with another layer: union of spans by `op_id`.
    pub fn merge(&mut self, other: &Self) {
        for span in &other.spans {
            self.apply_span(span.clone());
        }
    }

    /// Resolved attributes at one visible index.
    pub fn formats_at(&self, text: &FugueText, index: usize) -> BTreeMap<String, Value> {
        match text.char_id_at_index(index).and_then(|id| text.position(id)) {
            Some(pos) => self.resolve_at(text, pos),
            None => BTreeMap::new(),
        }
    }

    /// Flattened view: consecutive runs of visible text with identical
    /// resolved attribute sets. Adjacent ranges never share an attr set.
    pub fn ranges(&self, text: &FugueText) -> Vec<(String, BTreeMap<String, Value>)> {
        let mut out: Vec<(String, BTreeMap<String, Value>)> = Vec::new();
        for (pos, node) in text.nodes().iter().enumerate() {
            if node.deleted {
                continue;
            }
            let attrs = self.resolve_at(text, pos);
            match out.last_mut() {
                Some((run, run_attrs)) if *run_attrs == attrs => run.push(node.ch),
                _ => out.push((node.ch.to_string(), attrs)),
            }
        }
        out
    }

    /// All spans, in application order.
    pub fn spans(&self) -> &[FormatSpan] {
        &self.spans
    }

    /// Per-attribute winner among spans covering the node position: the
    /// greatest `(clock, writer)` pair decides; a winning remove marker
    /// leaves the attribute absent.
    fn resolve_at(&self, text: &FugueText, pos: usize) -> BTreeMap<String, Value> {
        let mut winners: HashMap<&str, (&FormatSpan, &AttrValue)> = HashMap::new();
        for span in &self.spans {
            if !span.covers(text, pos) {
                continue;
            }
            for (name, value) in &span.attrs {
                match winners.get(name.as_str()) {
                    Some((current, _))
                        if (current.clock, &current.writer) >= (span.clock, &span.writer) => {}
                    _ => {
                        winners.insert(name.as_str(), (span, value));
                    }
                }
            }
        }
        winners
            .into_iter()
            .filter_map(|(name, (_, value))| match value {
                AttrValue::Set(v) => Some((name.to_string(), v.clone())),
                AttrValue::Remove => None,
            })
            .collect()
    }
}
