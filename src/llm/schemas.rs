//! Structured responses the planning and reward models are asked to produce,
//! and the JSON Schemas sent with `response_format: json_schema`.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Planning response: the next browser action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub thought: String,
    /// One of `goto, fill_form, google_search, click, select_option, go_back,
    /// cache_data, get_final_answer`.
    pub action: String,
    pub action_input: String,
    /// Accessibility-tree node id; absent for actions like `goto`.
    #[serde(default)]
    pub element_id: Option<ElementId>,
    pub description: String,
}

/// Models emit element ids both as integers and as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ElementId {
    Index(i64),
    Label(String),
}

impl ElementId {
    pub fn as_index(&self) -> Option<i64> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Label(s) => s.trim().parse().ok(),
        }
    }
}

/// Global/current reward response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    /// `doing`, `finished` or `loop`; global reward only.
    #[serde(default)]
    pub status: Option<String>,
    pub score: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub description: String,
}

pub const REWARD_SCORES: [u8; 5] = [1, 3, 7, 9, 10];

impl Reward {
    /// The score as a number, if it is one of the allowed values.
    pub fn score_value(&self) -> Option<u8> {
        self.score
            .trim()
            .parse::<u8>()
            .ok()
            .filter(|s| REWARD_SCORES.contains(s))
    }
}

/// A named schema for `response_format: {"type": "json_schema", ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: Value,
}

impl ResponseSchema {
    pub fn response_format(&self) -> Value {
        json!({
            "type": "json_schema",
            "json_schema": {
                "name": self.name,
                "strict": true,
                "schema": self.schema,
            }
        })
    }
}

pub fn agent_action_schema() -> ResponseSchema {
    ResponseSchema {
        name: "agent_action",
        schema: json!({
            "type": "object",
            "properties": {
                "thought": {
                    "type": "string",
                    "description": "The reasoning about what action is needed to complete the task"
                },
                "action": {
                    "type": "string",
                    "description": "The action to perform (goto, fill_form, google_search, click, select_option, go_back, cache_data, get_final_answer)"
                },
                "action_input": {
                    "type": "string",
                    "description": "The input for the action (URL for goto, query for google_search, text for fill_form)"
                },
                "element_id": {
                    "type": ["string", "integer", "null"],
                    "description": "Element id from the accessibility tree, null for actions without a target element"
                },
                "description": {
                    "type": "string",
                    "description": "What is being done on which website, and which action was chosen"
                }
            },
            "required": ["thought", "action", "action_input", "element_id", "description"],
            "additionalProperties": false
        }),
    }
}

pub fn reward_schema() -> ResponseSchema {
    ResponseSchema {
        name: "reward",
        schema: json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": ["string", "null"],
                    "description": "Task completion status: doing, finished or loop"
                },
                "score": {
                    "type": "string",
                    "enum": ["1", "3", "7", "9", "10"],
                    "description": "Task completion quality"
                },
                "reason": {
                    "type": ["string", "null"],
                    "description": "Evidence and reasoning for the score"
                },
                "description": {
                    "type": "string",
                    "description": "Current completion status and future plan"
                }
            },
            "required": ["status", "score", "reason", "description"],
            "additionalProperties": false
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_accepts_integer_and_string_element_ids() {
        let a: AgentAction = serde_json::from_str(
            r#"{"thought":"t","action":"click","action_input":"","element_id":12,"description":"d"}"#,
        )
        .unwrap();
        assert_eq!(a.element_id.unwrap().as_index(), Some(12));

        let b: AgentAction = serde_json::from_str(
            r#"{"thought":"t","action":"click","action_input":"","element_id":"7","description":"d"}"#,
        )
        .unwrap();
        assert_eq!(b.element_id, Some(ElementId::Label("7".into())));
        assert_eq!(b.element_id.unwrap().as_index(), Some(7));
    }

    #[test]
    fn action_without_element_id() {
        let a: AgentAction = serde_json::from_str(
            r#"{"thought":"t","action":"goto","action_input":"https://example.com","description":"d"}"#,
        )
        .unwrap();
        assert!(a.element_id.is_none());
    }

    #[test]
    fn reward_score_value_checks_allowed_set() {
        let mut r: Reward =
            serde_json::from_str(r#"{"status":"doing","score":"7","description":"d"}"#).unwrap();
        assert_eq!(r.score_value(), Some(7));
        r.score = "5".into();
        assert_eq!(r.score_value(), None);
    }

    #[test]
    fn strict_schemas_require_every_property() {
        for schema in [agent_action_schema(), reward_schema()] {
            let props = schema.schema["properties"].as_object().unwrap();
            let required = schema.schema["required"].as_array().unwrap();
            assert_eq!(props.len(), required.len(), "{}", schema.name);
        }
    }

    #[test]
    fn response_format_wraps_schema() {
        let format = agent_action_schema().response_format();
        assert_eq!(format["type"], "json_schema");
        assert_eq!(format["json_schema"]["name"], "agent_action");
        assert_eq!(format["json_schema"]["strict"], true);
    }
}
