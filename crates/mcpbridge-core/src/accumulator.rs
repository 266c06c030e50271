//! Reassembly of streamed tool calls.
//!
//! Providers deliver a tool call in pieces: a name in one fragment, argument
//! slices in later ones. [`ToolCallAccumulator`] folds those pieces into
//! complete [`ToolCall`]s, keeping calls in the order they were first seen.

use mcpbridge_provider::stream::parse_object_arguments;
use mcpbridge_provider::{ArgumentsFragment, ToolCall, ToolCallFragment};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{trace, warn};

#[derive(Debug, Default)]
enum PendingArguments {
    #[default]
    Empty,
    /// Structured partial objects, shallow-merged.
    Object(Map<String, Value>),
    /// Raw JSON text, with the last successful parse of the buffer.
    Text {
        raw: String,
        parsed: Option<Map<String, Value>>,
    },
}

#[derive(Debug)]
struct PendingCall {
    id: String,
    name: String,
    arguments: PendingArguments,
}

/// Accumulates tool call fragments for one provider round.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: Vec<PendingCall>,
    positions: HashMap<String, usize>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one fragment into the call it belongs to.
    pub fn push(&mut self, fragment: ToolCallFragment) {
        let position = match self.positions.get(&fragment.id) {
            Some(&position) => position,
            None => {
                self.calls.push(PendingCall {
                    id: fragment.id.clone(),
                    name: String::new(),
                    arguments: PendingArguments::Empty,
                });
                self.positions.insert(fragment.id.clone(), self.calls.len() - 1);
                self.calls.len() - 1
            }
        };
        let call = &mut self.calls[position];

        if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
            call.name = name;
        }

        let Some(incoming) = fragment.arguments else {
            return;
        };
        call.arguments = match (std::mem::take(&mut call.arguments), incoming) {
            (PendingArguments::Empty, ArgumentsFragment::Object(object)) => {
                PendingArguments::Object(object)
            }
            (PendingArguments::Object(mut base), ArgumentsFragment::Object(object)) => {
                base.extend(object);
                PendingArguments::Object(base)
            }
            (PendingArguments::Empty, ArgumentsFragment::Text(text)) => {
                let parsed = parse_object_arguments(&text);
                PendingArguments::Text { raw: text, parsed }
            }
            (PendingArguments::Text { mut raw, parsed }, ArgumentsFragment::Text(text)) => {
                raw.push_str(&text);
                // Partial JSON fails to parse until the closing brace arrives.
                let parsed = parse_object_arguments(&raw).or(parsed);
                trace!(id = %call.id, complete = parsed.is_some(), "Buffered argument text");
                PendingArguments::Text { raw, parsed }
            }
            (PendingArguments::Text { raw, parsed }, ArgumentsFragment::Object(object)) => {
                warn!(id = %call.id, "Structured arguments after text arguments, merging");
                let mut base = parsed.or_else(|| parse_object_arguments(&raw)).unwrap_or_default();
                base.extend(object);
                PendingArguments::Object(base)
            }
            (PendingArguments::Object(base), ArgumentsFragment::Text(text)) => {
                warn!(id = %call.id, "Text arguments after structured arguments, merging");
                let mut base = base;
                if let Some(object) = parse_object_arguments(&text) {
                    base.extend(object);
                }
                PendingArguments::Object(base)
            }
        };
    }

    /// Feed every tool call carried by a fragment.
    pub fn extend(&mut self, fragments: impl IntoIterator<Item = ToolCallFragment>) {
        for fragment in fragments {
            self.push(fragment);
        }
    }

    /// Number of distinct calls seen so far.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Finalize every call, in first-seen order.
    ///
    /// Argument text that never became a JSON object yields empty arguments.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|call| {
                let arguments = match call.arguments {
                    PendingArguments::Empty => Map::new(),
                    PendingArguments::Object(object) => object,
                    PendingArguments::Text { raw, parsed } => {
                        match parse_object_arguments(&raw).or(parsed) {
                            Some(object) => object,
                            None => {
                                warn!(
                                    id = %call.id,
                                    tool = %call.name,
                                    raw = %raw,
                                    "Tool arguments never formed a JSON object, using empty arguments"
                                );
                                Map::new()
                            }
                        }
                    }
                };
                if call.name.is_empty() {
                    warn!(id = %call.id, "Tool call finished without a name");
                }
                ToolCall::new(call.id, call.name, arguments)
            })
            .collect()
    }
}
