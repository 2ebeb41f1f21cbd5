use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::fragment::{Fragment, FragmentBody};
use crate::core::turn::{Block, GroupedTurn, Turn};
use crate::reducer::filters::{
    clean_streaming_text, looks_like_full_resend, starts_with_stray_punctuation,
    starts_with_whitespace,
};

/// Reasoning text assembled so far, under the id of its latest fragment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReasoningState {
    pub id: String,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallState {
    pub call: Fragment,
    pub result: Option<Fragment>,
}

/// The in-progress grouped turn during live streaming. A single semantic
/// fragment may arrive as many small increments across many frames;
/// `apply_fragment` merges each one in.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnAccumulator {
    pub id: String,
    pub content: String,
    pub reasoning: Option<ReasoningState>,
    pub tool_calls: Vec<ToolCallState>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self {
            id: format!("streaming-{}", uuid::Uuid::new_v4()),
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_none() && self.tool_calls.is_empty()
    }

    /// Convert the accumulated state into a grouped turn, or `None` if
    /// nothing arrived. Blocks come out in the order a single agent step
    /// streams them: reasoning, tool use, answer.
    pub fn finalize(self) -> Option<GroupedTurn> {
        if self.is_empty() {
            return None;
        }

        let mut blocks = Vec::new();
        if let Some(reasoning) = &self.reasoning {
            blocks.push(Block::Reasoning {
                data: Fragment {
                    id: reasoning.id.clone(),
                    date: reasoning.timestamp,
                    body: FragmentBody::Reasoning {
                        reasoning: reasoning.text.clone(),
                    },
                    ..Fragment::unknown(None)
                },
            });
        }
        for tc in &self.tool_calls {
            blocks.push(Block::ToolCall {
                data: tc.call.clone(),
                result: tc.result.clone(),
            });
        }
        if !self.content.is_empty() {
            blocks.push(Block::Assistant {
                data: Fragment {
                    id: self.id.clone(),
                    date: self.started_at,
                    content: self.content.clone(),
                    body: FragmentBody::Assistant,
                    ..Fragment::unknown(None)
                },
            });
        }

        Some(GroupedTurn {
            id: self.id,
            blocks,
            timestamp: self.started_at,
        })
    }

    pub fn into_turn(self) -> Option<Turn> {
        self.finalize().map(Turn::Grouped)
    }
}

/// Pure incremental reduction step: merge one arriving fragment into the
/// accumulator and return the updated state. Invoked synchronously per
/// frame, so application order is exactly arrival order.
pub fn apply_fragment(mut acc: TurnAccumulator, fragment: &Fragment) -> TurnAccumulator {
    match &fragment.body {
        FragmentBody::UsageStatistics { steps_messages } => {
            // recovery path: the primary stream sometimes drops the
            // assistant fragment, but the step batches still carry it
            if acc.content.is_empty() {
                let recovered = steps_messages
                    .iter()
                    .flatten()
                    .find(|m| matches!(m.body, FragmentBody::Assistant));
                if let Some(msg) = recovered {
                    debug!(id = %msg.id, "recovered assistant content from usage statistics");
                    acc.content = msg.content.clone();
                    if !msg.id.is_empty() {
                        acc.id = msg.id.clone();
                    }
                }
            }
        }
        FragmentBody::Reasoning { reasoning } => {
            let increment = if reasoning.is_empty() {
                fragment.content.as_str()
            } else {
                reasoning.as_str()
            };
            if increment.is_empty() {
                return acc;
            }

            let existing_empty = acc
                .reasoning
                .as_ref()
                .map_or(true, |r| r.text.is_empty());
            if existing_empty && starts_with_stray_punctuation(increment) {
                debug!(chunk = %increment, "discarding clipped first reasoning chunk");
                return acc;
            }

            let state = acc.reasoning.get_or_insert_with(ReasoningState::default);
            state.text.push_str(increment);
            state.id = format!("{}-reasoning", fragment.id);
            state.timestamp = fragment.date.or(state.timestamp);
        }
        FragmentBody::Assistant => {
            if fragment.content.is_empty() {
                return acc;
            }
            if acc.content.is_empty() && starts_with_whitespace(&fragment.content) {
                debug!(chunk = %fragment.content, "discarding clipped first content chunk");
                return acc;
            }

            let cleaned = clean_streaming_text(&fragment.content);
            if looks_like_full_resend(&fragment.content, &acc.content) {
                debug!("full-message resend detected, replacing accumulated content");
                acc.content = cleaned;
            } else {
                acc.content.push_str(&cleaned);
            }
            if !fragment.id.is_empty() {
                acc.id = fragment.id.clone();
            }
        }
        FragmentBody::ToolCall { call } => {
            if call.is_some() {
                acc.tool_calls.push(ToolCallState {
                    call: fragment.clone(),
                    result: None,
                });
            } else {
                debug!(id = %fragment.id, "tool call fragment without descriptor, skipping");
            }
        }
        FragmentBody::ToolReturn { ret } => {
            if ret.value.is_null() {
                return acc;
            }
            let matched = ret.tool_call_id.as_deref().and_then(|return_id| {
                acc.tool_calls.iter_mut().find(|tc| {
                    matches!(
                        &tc.call.body,
                        FragmentBody::ToolCall { call: Some(data) }
                            if data.tool_call_id.as_deref() == Some(return_id)
                    )
                })
            });
            match matched {
                Some(tc) => tc.result = Some(fragment.clone()),
                None => {
                    debug!(id = %fragment.id, "tool return without a matching call, dropping");
                }
            }
        }
        FragmentBody::User => {
            // user fragments reconcile the provisional turn at the session
            // level; they never join the accumulator
        }
        FragmentBody::System => {}
        FragmentBody::Unknown { .. } => {
            // raw token chunk from a transport that omits kind tags
            if !fragment.content.is_empty() {
                acc.content.push_str(&clean_streaming_text(&fragment.content));
            }
        }
    }
    acc
}
