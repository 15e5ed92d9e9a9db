use crate::llm::Message;

pub const PLANNING_SYSTEM_PROMPT: &str = r#"You are a web agent that completes tasks in a browser one action at a time.

On each turn you receive the task and the current page observation (an accessibility tree). Choose the single next action.

Available actions:
- goto: open a URL. action_input is the URL; element_id is null.
- google_search: search the web. action_input is the query; element_id is null.
- click: click an element. element_id is the accessibility-tree id.
- fill_form: type into an input. element_id is the field, action_input is the text.
- select_option: choose an option. element_id is the select, action_input is the option.
- go_back: return to the previous page.
- cache_data: remember information from the page for later. action_input is the data.
- get_final_answer: finish the task. action_input is the answer.

Respond with a single JSON object and nothing else:
{
  "thought": "your reasoning about what is needed next",
  "action": "one of the actions above",
  "action_input": "input for the action, or an empty string",
  "element_id": null,
  "description": "which website you are on and which action you chose"
}"#;

pub const REWARD_SYSTEM_PROMPT: &str = r#"You are evaluating a web agent's progress on a task.

You receive the task and the trajectory of actions taken so far. Judge whether the task is still in progress, finished, or stuck in a loop, and score the trajectory.

Scores: 1 (no progress), 3 (little progress), 7 (good progress), 9 (nearly done), 10 (task completed).

Respond with a single JSON object and nothing else:
{
  "status": "doing | finished | loop",
  "score": "1 | 3 | 7 | 9 | 10",
  "reason": "evidence from the trajectory supporting the score",
  "description": "the current completion status and what should happen next"
}"#;

pub fn planning_messages(task: &str, observation: &str) -> Vec<Message> {
    vec![
        Message::system(PLANNING_SYSTEM_PROMPT),
        Message::user(format!(
            "Task: {task}\n\nCurrent observation:\n{observation}"
        )),
    ]
}

pub fn reward_messages(task: &str, trajectory: &str) -> Vec<Message> {
    vec![
        Message::system(REWARD_SYSTEM_PROMPT),
        Message::user(format!("Task: {task}\n\nTrajectory so far:\n{trajectory}")),
    ]
}

pub fn semantic_match_messages(prompt: &str) -> Vec<Message> {
    vec![Message::user(prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::json_mode::prepare_messages;

    #[test]
    fn prompts_already_ask_for_json() {
        // prepare_messages must not add a second instruction to our own prompts
        let planning = planning_messages("buy socks", "<tree/>");
        assert_eq!(prepare_messages(&planning).len(), planning.len());
        let reward = reward_messages("buy socks", "1. goto shop");
        assert_eq!(prepare_messages(&reward).len(), reward.len());
    }

    #[test]
    fn user_message_carries_task() {
        let messages = planning_messages("find the weather", "<tree/>");
        let text = messages[1].content.text_segments().join("");
        assert!(text.contains("find the weather"));
        assert!(text.contains("<tree/>"));
    }
}
