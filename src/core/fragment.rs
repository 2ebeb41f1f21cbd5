use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Display-level role a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
    Tool,
    Unknown,
}

/// The closed set of wire fragment kinds, plus an explicit fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    System,
    User,
    Assistant,
    Reasoning,
    ToolCall,
    ToolReturn,
    UsageStatistics,
    Unknown,
}

impl FragmentKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "system_message" => Self::System,
            "user_message" => Self::User,
            "assistant_message" => Self::Assistant,
            "reasoning_message" => Self::Reasoning,
            "tool_call_message" => Self::ToolCall,
            "tool_return_message" => Self::ToolReturn,
            "usage_statistics" => Self::UsageStatistics,
            _ => Self::Unknown,
        }
    }
}

/// Role classification for a fragment kind.
pub fn role_of(kind: FragmentKind) -> Role {
    match kind {
        FragmentKind::User => Role::User,
        FragmentKind::Assistant | FragmentKind::Reasoning => Role::Agent,
        FragmentKind::System => Role::System,
        FragmentKind::ToolCall | FragmentKind::ToolReturn => Role::Tool,
        FragmentKind::UsageStatistics | FragmentKind::Unknown => Role::Unknown,
    }
}

/// Structured call descriptor carried by a tool-call fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallData {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// Structured result descriptor carried by a tool-return fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReturnData {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub status: Option<String>,
    /// Back-reference to the call this return answers
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// Kind-specific payload of a fragment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentBody {
    System,
    User,
    Assistant,
    Reasoning {
        reasoning: String,
    },
    ToolCall {
        /// Absent when the transport sent a tool-call frame without a descriptor
        call: Option<ToolCallData>,
    },
    ToolReturn {
        ret: ToolReturnData,
    },
    UsageStatistics {
        /// Per-step fragment batches; used to recover a dropped assistant fragment
        steps_messages: Vec<Vec<Fragment>>,
    },
    Unknown {
        message_type: Option<String>,
    },
}

impl FragmentBody {
    pub fn kind(&self) -> FragmentKind {
        match self {
            Self::System => FragmentKind::System,
            Self::User => FragmentKind::User,
            Self::Assistant => FragmentKind::Assistant,
            Self::Reasoning { .. } => FragmentKind::Reasoning,
            Self::ToolCall { .. } => FragmentKind::ToolCall,
            Self::ToolReturn { .. } => FragmentKind::ToolReturn,
            Self::UsageStatistics { .. } => FragmentKind::UsageStatistics,
            Self::Unknown { .. } => FragmentKind::Unknown,
        }
    }
}

/// One decoded message unit from the agent transport, either streamed or
/// fetched as part of a history page. Immutable once constructed; reducers
/// clone-and-extend rather than mutate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    pub id: String,
    pub date: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub sender_id: Option<String>,
    pub step_id: Option<String>,
    pub run_id: Option<String>,
    pub seq_id: Option<i64>,
    pub is_err: bool,
    pub content: String,
    #[serde(flatten)]
    pub body: FragmentBody,
}

impl Fragment {
    /// Total conversion from arbitrary JSON. Anything that is not a
    /// recognized fragment object degrades to the unknown variant with
    /// whatever content it carried; it never fails.
    pub fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self {
                content: value.as_str().unwrap_or_default().to_string(),
                ..Self::unknown(None)
            };
        };

        let content = obj
            .get("content")
            .and_then(Value::as_str)
            .or_else(|| {
                // token-delta transports nest the chunk under `delta`
                obj.get("delta")
                    .and_then(|d| d.get("content"))
                    .and_then(Value::as_str)
            })
            .unwrap_or_default()
            .to_string();

        let tag = obj.get("message_type").and_then(Value::as_str);
        let body = match tag.map(FragmentKind::from_tag) {
            Some(FragmentKind::System) => FragmentBody::System,
            Some(FragmentKind::User) => FragmentBody::User,
            Some(FragmentKind::Assistant) => FragmentBody::Assistant,
            Some(FragmentKind::Reasoning) => FragmentBody::Reasoning {
                reasoning: obj
                    .get("reasoning")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            },
            Some(FragmentKind::ToolCall) => FragmentBody::ToolCall {
                call: obj
                    .get("tool_call")
                    .filter(|v| v.is_object())
                    .and_then(|v| serde_json::from_value(v.clone()).ok()),
            },
            Some(FragmentKind::ToolReturn) => FragmentBody::ToolReturn {
                ret: ToolReturnData {
                    value: obj.get("tool_return").cloned().unwrap_or(Value::Null),
                    status: obj
                        .get("status")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    tool_call_id: obj
                        .get("tool_call_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                },
            },
            Some(FragmentKind::UsageStatistics) => FragmentBody::UsageStatistics {
                steps_messages: obj
                    .get("steps_messages")
                    .and_then(Value::as_array)
                    .map(|steps| {
                        steps
                            .iter()
                            .map(|step| {
                                step.as_array()
                                    .map(|msgs| msgs.iter().map(Fragment::from_value).collect())
                                    .unwrap_or_default()
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            },
            Some(FragmentKind::Unknown) | None => FragmentBody::Unknown {
                message_type: tag.map(str::to_string),
            },
        };

        Self {
            id: obj
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            date: obj
                .get("date")
                .and_then(Value::as_str)
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc)),
            name: string_field(obj, "name"),
            sender_id: string_field(obj, "sender_id"),
            step_id: string_field(obj, "step_id"),
            run_id: string_field(obj, "run_id"),
            seq_id: obj.get("seq_id").and_then(Value::as_i64),
            is_err: obj.get("is_err").and_then(Value::as_bool).unwrap_or(false),
            content,
            body,
        }
    }

    pub(crate) fn unknown(message_type: Option<String>) -> Self {
        Self {
            id: String::new(),
            date: None,
            name: None,
            sender_id: None,
            step_id: None,
            run_id: None,
            seq_id: None,
            is_err: false,
            content: String::new(),
            body: FragmentBody::Unknown { message_type },
        }
    }

    /// A provisional local user fragment, inserted before the server
    /// confirms the message.
    pub fn provisional_user(text: impl Into<String>) -> Self {
        Self {
            id: format!("temp-{}", uuid::Uuid::new_v4()),
            date: Some(Utc::now()),
            content: text.into(),
            body: FragmentBody::User,
            ..Self::unknown(None)
        }
    }

    pub fn kind(&self) -> FragmentKind {
        self.body.kind()
    }

    pub fn role(&self) -> Role {
        role_of(self.kind())
    }

    pub fn is_provisional(&self) -> bool {
        self.id.starts_with("temp-")
    }
}

impl<'de> Deserialize<'de> for Fragment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(Fragment::from_value(&value))
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}
