use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::fragment::{Fragment, Role};

/// One typed block inside a grouped agent turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Reasoning {
        data: Fragment,
    },
    ToolCall {
        data: Fragment,
        /// The return answering this call, once it arrives
        result: Option<Fragment>,
    },
    Assistant {
        data: Fragment,
    },
}

/// A full agent response bundled under one identity: reasoning, tool use
/// and the final answer, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedTurn {
    pub id: String,
    pub blocks: Vec<Block>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl GroupedTurn {
    pub fn starting_at(fragment: &Fragment) -> Self {
        Self {
            id: fragment.id.clone(),
            blocks: Vec::new(),
            timestamp: fragment.date,
        }
    }

    pub fn role(&self) -> Role {
        Role::Agent
    }

    pub fn assistant_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Assistant { data } => Some(data.content.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn reasoning_text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Reasoning { data } => match &data.body {
                    crate::core::fragment::FragmentBody::Reasoning { reasoning } => {
                        Some(reasoning.as_str())
                    }
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }
}

/// One display-level unit in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Turn {
    Single(Fragment),
    Grouped(GroupedTurn),
}

impl Turn {
    pub fn id(&self) -> &str {
        match self {
            Self::Single(f) => &f.id,
            Self::Grouped(g) => &g.id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Single(f) => f.role(),
            Self::Grouped(g) => g.role(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Single(f) => f.date,
            Self::Grouped(g) => g.timestamp,
        }
    }
}
