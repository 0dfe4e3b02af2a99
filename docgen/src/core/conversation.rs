//! Append-only conversation log replayed on every model invocation.

use serde::Serialize;

use crate::core::types::{Message, Role};

/// Ordered message log. The only mutation is [`Conversation::push`], so a
/// transcript captured at any point is a prefix of every later one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Start a conversation from the system prompt and the first user prompt.
    pub fn seeded(system_prompt: &str, user_prompt: &str) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Ids of assistant tool calls that have no tool-result message yet, in
    /// emission order.
    pub fn dangling_tool_calls(&self) -> Vec<String> {
        let mut pending: Vec<String> = Vec::new();
        for message in &self.messages {
            match message.role {
                Role::Assistant => {
                    pending.extend(message.tool_calls.iter().map(|call| call.id.clone()));
                }
                Role::Tool => {
                    if let Some(id) = &message.tool_call_id
                        && let Some(idx) = pending.iter().position(|p| p == id)
                    {
                        pending.remove(idx);
                    }
                }
                Role::System | Role::User => {}
            }
        }
        pending
    }

    /// Number of tool-result messages recorded so far.
    pub fn tool_result_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ToolCall, ToolResult};
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "list_projects".to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn seeded_conversation_starts_with_system_then_user() {
        let convo = Conversation::seeded("sys", "user");
        let roles: Vec<Role> = convo.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
    }

    #[test]
    fn dangling_calls_are_reported_until_answered() {
        let mut convo = Conversation::seeded("sys", "user");
        convo.push(Message::assistant_tool_calls(
            "",
            vec![call("a"), call("b")],
        ));
        assert_eq!(convo.dangling_tool_calls(), vec!["a", "b"]);

        convo.push(Message::tool_result(&ToolResult::success("a", "{}")));
        assert_eq!(convo.dangling_tool_calls(), vec!["b"]);

        convo.push(Message::tool_result(&ToolResult::error("b", "boom")));
        assert!(convo.dangling_tool_calls().is_empty());
        assert_eq!(convo.tool_result_count(), 2);
    }
}
