//! Per-document delta coalescing.
//!
//! Broadcasts for one document inside a short window merge into a single
//! delta. Merging must preserve the LWW outcome: two updates to the same
//! field keep the one with the higher `(clock, writer)` pair; operation
//! bodies concatenate in application order.

use std::collections::BTreeMap;

use synckit_protocol::{DeltaBody, DeltaMessage, FieldMeta};

/// Accumulates one document's resolved deltas during a flush window.
#[derive(Debug, Default)]
pub struct DeltaCoalescer {
    fields: BTreeMap<String, (serde_json::Value, Option<FieldMeta>)>,
    ops: Vec<synckit_crdt::OperationEnvelope>,
    template: Option<DeltaMessage>,
}

impl DeltaCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one resolved delta into the window.
    pub fn push(&mut self, delta: DeltaMessage) {
        match &delta.delta {
            DeltaBody::Fields(fields) => {
                for (field, value) in fields {
                    let meta = delta.meta.as_ref().and_then(|m| m.get(field)).cloned();
                    match self.fields.get(field) {
                        Some((_, Some(existing_meta))) => {
                            let keep_existing = match &meta {
                                Some(incoming_meta) => {
                                    (existing_meta.clock, &existing_meta.writer)
                                        >= (incoming_meta.clock, &incoming_meta.writer)
                                }
                                // Unstamped updates never beat stamped ones.
                                None => true,
                            };
                            if !keep_existing {
                                self.fields.insert(field.clone(), (value.clone(), meta));
                            }
                        }
                        _ => {
                            self.fields.insert(field.clone(), (value.clone(), meta));
                        }
                    }
                }
            }
            DeltaBody::Ops(envelopes) => {
                self.ops.extend(envelopes.iter().cloned());
            }
        }
        // The latest delta supplies the envelope-level fields (clock,
        // writer); its vector clock dominates earlier ones in the window.
        self.template = Some(delta);
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_none()
    }

    /// Close the window: one merged delta, or `None` when nothing arrived.
    pub fn flush(&mut self) -> Option<DeltaMessage> {
        let mut template = self.template.take()?;
        let fields = std::mem::take(&mut self.fields);
        let ops = std::mem::take(&mut self.ops);

        if !ops.is_empty() && fields.is_empty() {
            template.delta = DeltaBody::Ops(ops);
            template.meta = None;
            return Some(template);
        }

        let mut merged_fields = BTreeMap::new();
        let mut merged_meta = BTreeMap::new();
        for (field, (value, meta)) in fields {
            merged_fields.insert(field.clone(), value);
            if let Some(meta) = meta {
                merged_meta.insert(field, meta);
            }
        }
        template.delta = DeltaBody::Fields(merged_fields);
        template.meta = if merged_meta.is_empty() {
            None
        } else {
            Some(merged_meta)
        };
        // A window that mixed field and op bodies flushes the ops as a
        // separate follow-up; keep them queued.
        self.ops = ops;
        Some(template)
    }

    /// Flush any operation body left behind by a mixed window.
    pub fn flush_ops(&mut self, id: String) -> Option<DeltaMessage> {
        if self.ops.is_empty() {
            return None;
        }
        let ops = std::mem::take(&mut self.ops);
        let last = ops.last()?.clone();
        Some(DeltaMessage {
            id,
            doc_id: last.document_id.clone(),
            delta: DeltaBody::Ops(ops),
            vector_clock: last.clock.clone(),
            writer: last.writer.clone(),
            logical_clock: Some(last.logical_clock),
            meta: None,
        })
    }
}
