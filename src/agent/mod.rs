use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use crate::conversations::{ConversationStore, Role};
use crate::error::Result;
use crate::tasks::{Task, TaskStore};

/// Sentinel task id emitted for complete/delete phrases. It is passed
/// through unresolved; the store lookup misses and the turn reports an
/// error reply.
pub const LATEST_SENTINEL: &str = "latest";

const DEFAULT_REPLY: &str = "I'm your todo assistant. How can I help you manage your tasks?";
const NOT_FOUND_ERROR: &str = "Task not found or access denied";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    AddTask { title: String },
    ListTasks,
    CompleteTask { task_id: String },
    DeleteTask { task_id: String },
    None,
}

/// Rule-based classification of free-text input. Keyword tests are
/// case-insensitive; branch order is the priority order, not position in
/// the text. Title stripping is case-sensitive on the raw input.
pub fn parse_intent(message: &str) -> Intent {
    let lowered = message.to_lowercase();
    let lowered = lowered.trim();

    if ["add", "create", "new"].iter().any(|word| lowered.contains(word))
        && lowered.contains("task")
    {
        let title = message
            .replace("add task", "")
            .replace("create task", "")
            .replace("new task", "")
            .trim()
            .to_string();
        return Intent::AddTask { title };
    }

    if ["list", "show", "what", "my tasks"]
        .iter()
        .any(|word| lowered.contains(word))
    {
        return Intent::ListTasks;
    }

    if ["complete", "done", "finish"]
        .iter()
        .any(|word| lowered.contains(word))
    {
        return Intent::CompleteTask {
            task_id: LATEST_SENTINEL.to_string(),
        };
    }

    if ["delete", "remove"].iter().any(|word| lowered.contains(word)) {
        return Intent::DeleteTask {
            task_id: LATEST_SENTINEL.to_string(),
        };
    }

    Intent::None
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool: String,
    pub arguments: Value,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub response: String,
    pub tool_results: Vec<ToolResult>,
    pub conversation_id: String,
}

/// Stateless chat turn handler: classifies the input, runs at most one
/// task operation, and persists the transcript around it. The user
/// message is written before dispatch and the assistant reply after, in
/// a conversation created fresh for the turn.
pub struct TodoAssistant {
    tasks: Arc<TaskStore>,
    conversations: Arc<ConversationStore>,
}

impl TodoAssistant {
    pub fn new(tasks: Arc<TaskStore>, conversations: Arc<ConversationStore>) -> Self {
        Self {
            tasks,
            conversations,
        }
    }

    pub async fn process_message(&self, user_id: &str, message: &str) -> Result<ChatOutcome> {
        let conversation = self.conversations.create_conversation(user_id).await?;
        self.conversations
            .append_message(&conversation.id, Role::User, message)
            .await?;

        let intent = parse_intent(message);
        let mut tool_results = Vec::new();
        let mut response = DEFAULT_REPLY.to_string();

        if intent != Intent::None {
            let (tool, arguments, result) = self.execute_intent(user_id, intent).await;
            response = synthesize_reply(&tool, &result);
            tool_results.push(ToolResult {
                tool,
                arguments,
                result,
            });
        }

        self.conversations
            .append_message(&conversation.id, Role::Assistant, &response)
            .await?;

        Ok(ChatOutcome {
            response,
            tool_results,
            conversation_id: conversation.id,
        })
    }

    async fn execute_intent(&self, user_id: &str, intent: Intent) -> (String, Value, Value) {
        match intent {
            Intent::AddTask { title } => {
                let arguments = json!({ "title": title });
                let result = match self.tasks.create(user_id, &title, None).await {
                    Ok(task) => task_value(&task),
                    Err(err) => json!({ "error": err.to_string() }),
                };
                ("add_task".to_string(), arguments, result)
            }
            Intent::ListTasks => {
                let result = match self.tasks.list(user_id).await {
                    Ok(tasks) => Value::Array(tasks.iter().map(task_value).collect()),
                    Err(err) => json!({ "error": err.to_string() }),
                };
                ("list_tasks".to_string(), json!({}), result)
            }
            Intent::CompleteTask { task_id } => {
                let arguments = json!({ "task_id": task_id });
                let result = match self.tasks.set_completed(user_id, &task_id, true).await {
                    Ok(Some(task)) => task_value(&task),
                    Ok(None) => json!({ "error": NOT_FOUND_ERROR }),
                    Err(err) => json!({ "error": err.to_string() }),
                };
                ("complete_task".to_string(), arguments, result)
            }
            Intent::DeleteTask { task_id } => {
                let arguments = json!({ "task_id": task_id });
                let result = match self.tasks.delete(user_id, &task_id).await {
                    Ok(true) => Value::Bool(true),
                    Ok(false) => json!({ "error": NOT_FOUND_ERROR }),
                    Err(err) => json!({ "error": err.to_string() }),
                };
                ("delete_task".to_string(), arguments, result)
            }
            Intent::None => ("none".to_string(), json!({}), Value::Null),
        }
    }
}

fn task_value(task: &Task) -> Value {
    json!({
        "id": task.id,
        "title": task.title,
        "description": task.description,
        "completed": task.completed,
        "created_at": task.created_at,
        "updated_at": task.updated_at,
    })
}

fn result_title(result: &Value) -> &str {
    result.get("title").and_then(Value::as_str).unwrap_or_default()
}

fn synthesize_reply(tool: &str, result: &Value) -> String {
    let error = result.get("error").and_then(Value::as_str);
    match tool {
        "add_task" if error.is_none() => {
            format!("I've added '{}' to your todo list.", result_title(result))
        }
        "list_tasks" => match result.as_array() {
            Some(tasks) if !tasks.is_empty() => {
                let lines = tasks
                    .iter()
                    .map(|task| format!("- {}", result_title(task)))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("Here are your tasks:\n{lines}")
            }
            _ => "You don't have any tasks yet.".to_string(),
        },
        "complete_task" if error.is_none() => {
            format!("Great! I've marked '{}' as complete.", result_title(result))
        }
        "delete_task" if result.as_bool() == Some(true) => "I've deleted that task.".to_string(),
        _ => match error {
            Some(err) => format!("Sorry, I encountered an error: {err}"),
            None => DEFAULT_REPLY.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_task_extracts_title() {
        assert_eq!(
            parse_intent("add task buy milk"),
            Intent::AddTask {
                title: "buy milk".to_string()
            }
        );
        assert_eq!(
            parse_intent("new task call mom"),
            Intent::AddTask {
                title: "call mom".to_string()
            }
        );
    }

    #[test]
    fn add_phrase_stripping_is_case_sensitive() {
        // Matching lowers the input but stripping does not, so a
        // capitalized phrase survives into the title.
        assert_eq!(
            parse_intent("Add task Buy milk"),
            Intent::AddTask {
                title: "Add task Buy milk".to_string()
            }
        );
    }

    #[test]
    fn add_without_task_keyword_falls_through() {
        assert_eq!(parse_intent("add milk"), Intent::None);
    }

    #[test]
    fn list_phrases() {
        assert_eq!(parse_intent("what are my tasks"), Intent::ListTasks);
        assert_eq!(parse_intent("show me everything"), Intent::ListTasks);
    }

    #[test]
    fn complete_and_delete_use_latest_sentinel() {
        assert_eq!(
            parse_intent("mark it done"),
            Intent::CompleteTask {
                task_id: LATEST_SENTINEL.to_string()
            }
        );
        assert_eq!(
            parse_intent("remove that"),
            Intent::DeleteTask {
                task_id: LATEST_SENTINEL.to_string()
            }
        );
    }

    #[test]
    fn add_wins_over_later_branches() {
        assert_eq!(
            parse_intent("add task list groceries"),
            Intent::AddTask {
                title: "list groceries".to_string()
            }
        );
    }

    #[test]
    fn unmatched_input_is_none() {
        assert_eq!(parse_intent("hello"), Intent::None);
    }

    #[test]
    fn empty_title_still_routes_to_add() {
        assert_eq!(
            parse_intent("add task"),
            Intent::AddTask {
                title: String::new()
            }
        );
    }

    #[test]
    fn reply_templates() {
        let added = json!({"title": "buy milk", "completed": false});
        assert_eq!(
            synthesize_reply("add_task", &added),
            "I've added 'buy milk' to your todo list."
        );

        let listed = json!([{"title": "a"}, {"title": "b"}]);
        assert_eq!(
            synthesize_reply("list_tasks", &listed),
            "Here are your tasks:\n- a\n- b"
        );
        assert_eq!(
            synthesize_reply("list_tasks", &json!([])),
            "You don't have any tasks yet."
        );

        assert_eq!(
            synthesize_reply("delete_task", &Value::Bool(true)),
            "I've deleted that task."
        );

        let failed = json!({"error": "Task not found or access denied"});
        assert_eq!(
            synthesize_reply("complete_task", &failed),
            "Sorry, I encountered an error: Task not found or access denied"
        );
    }
}
