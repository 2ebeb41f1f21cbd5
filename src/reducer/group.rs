use tracing::debug;

use crate::core::fragment::{Fragment, FragmentBody};
use crate::core::turn::{Block, GroupedTurn, Turn};

/// Group a chronologically-sorted fragment sequence into display turns.
///
/// Consecutive agent-side fragments (reasoning, tool calls and returns,
/// assistant answers) collapse into one grouped turn; a user fragment or
/// any unrelated kind closes the open group. Used to normalize history
/// pages and non-streaming responses.
pub fn group_fragments(fragments: &[Fragment]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut open: Option<GroupedTurn> = None;

    for fragment in fragments {
        // tool and reasoning fragments are meaningful even with empty
        // top-level content; everything else without content is noise
        let keep_when_empty = matches!(
            fragment.body,
            FragmentBody::Reasoning { .. }
                | FragmentBody::ToolCall { .. }
                | FragmentBody::ToolReturn { .. }
        );
        if fragment.content.is_empty() && !keep_when_empty {
            debug!(kind = ?fragment.kind(), "skipping fragment without content");
            continue;
        }

        match &fragment.body {
            FragmentBody::User => {
                flush(&mut turns, &mut open);
                turns.push(Turn::Single(fragment.clone()));
            }
            FragmentBody::Reasoning { .. } => {
                let group = open.get_or_insert_with(|| GroupedTurn::starting_at(fragment));
                group.blocks.push(Block::Reasoning {
                    data: fragment.clone(),
                });
                group.id = fragment.id.clone();
            }
            FragmentBody::ToolCall { .. } => {
                let group = open.get_or_insert_with(|| GroupedTurn::starting_at(fragment));
                group.blocks.push(Block::ToolCall {
                    data: fragment.clone(),
                    result: None,
                });
            }
            FragmentBody::ToolReturn { .. } => {
                let group = open.get_or_insert_with(|| GroupedTurn::starting_at(fragment));
                match group
                    .blocks
                    .iter_mut()
                    .rev()
                    .find(|b| matches!(b, Block::ToolCall { .. }))
                {
                    Some(Block::ToolCall { result, .. }) => {
                        *result = Some(fragment.clone());
                    }
                    _ => {
                        debug!(id = %fragment.id, "tool return without a matching call, dropping");
                    }
                }
            }
            FragmentBody::Assistant => {
                let group = open.get_or_insert_with(|| GroupedTurn::starting_at(fragment));
                group.blocks.push(Block::Assistant {
                    data: fragment.clone(),
                });
                group.id = fragment.id.clone();
            }
            FragmentBody::System
            | FragmentBody::UsageStatistics { .. }
            | FragmentBody::Unknown { .. } => {
                flush(&mut turns, &mut open);
                turns.push(Turn::Single(fragment.clone()));
            }
        }
    }

    flush(&mut turns, &mut open);
    turns
}

fn flush(turns: &mut Vec<Turn>, open: &mut Option<GroupedTurn>) {
    if let Some(group) = open.take() {
        turns.push(Turn::Grouped(group));
    }
}
