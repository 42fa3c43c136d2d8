use serde::{Deserialize, Serialize};

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// A single chat message in wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The message role.
    pub role: Role,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a message.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// The slice of a chat transcript the adapter consumes and mutates: the
/// committed messages plus one in-progress turn. The full transcript data
/// model belongs to the caller; this is only the interface generation needs
/// (append text as it streams, rewind past a stop match, scope checks).
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    active_role: Option<Role>,
    active_content: String,
}

impl Transcript {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a committed message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Opens an in-progress turn for the given role.
    pub fn begin(&mut self, role: Role) {
        self.active_role = Some(role);
        self.active_content.clear();
    }

    /// Commits the in-progress turn as a message, if one is open.
    pub fn commit_turn(&mut self) {
        if let Some(role) = self.active_role.take() {
            let content = std::mem::take(&mut self.active_content);
            self.messages.push(ChatMessage::new(role, content));
        }
    }

    /// The role of the in-progress turn.
    pub fn active_role(&self) -> Option<Role> {
        self.active_role
    }

    /// Text accumulated in the in-progress turn.
    pub fn active_content(&self) -> &str {
        &self.active_content
    }

    /// Committed messages.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Appends generated text to the in-progress turn.
    pub fn apply_text(&mut self, text: &str) {
        self.active_content.push_str(text);
    }

    /// Removes the trailing `count` characters from the in-progress turn,
    /// used to drop stop text that must not survive in state content.
    pub fn rewind_text(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        let kept = self.active_content.chars().count().saturating_sub(count);
        let byte_end = self
            .active_content
            .char_indices()
            .nth(kept)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        self.active_content.truncate(byte_end);
    }

    /// Messages for an outgoing request: the committed messages followed by
    /// the in-progress turn when it already holds content.
    pub fn request_messages(&self) -> Vec<ChatMessage> {
        let mut messages = self.messages.clone();
        if let Some(role) = self.active_role {
            if !self.active_content.is_empty() {
                messages.push(ChatMessage::new(role, self.active_content.clone()));
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::to_string(&ChatMessage::system("Be concise.")).unwrap();
        assert_eq!(json, r#"{"role":"system","content":"Be concise."}"#);
    }

    #[test]
    fn test_apply_and_rewind_text() {
        let mut transcript = Transcript::new();
        transcript.begin(Role::Assistant);
        transcript.apply_text("hello STOP world");
        transcript.rewind_text("STOP world".chars().count());
        assert_eq!(transcript.active_content(), "hello ");
    }

    #[test]
    fn test_rewind_handles_multibyte() {
        let mut transcript = Transcript::new();
        transcript.begin(Role::Assistant);
        transcript.apply_text("héllo…STOP");
        transcript.rewind_text(4);
        assert_eq!(transcript.active_content(), "héllo…");
    }

    #[test]
    fn test_rewind_past_start_clears_turn() {
        let mut transcript = Transcript::new();
        transcript.begin(Role::Assistant);
        transcript.apply_text("hi");
        transcript.rewind_text(10);
        assert_eq!(transcript.active_content(), "");
    }

    #[test]
    fn test_request_messages_include_active_turn_content() {
        let mut transcript = Transcript::new();
        transcript.push(ChatMessage::user("Question?"));
        transcript.begin(Role::Assistant);

        assert_eq!(transcript.request_messages().len(), 1);

        transcript.apply_text("Partial");
        let messages = transcript.request_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Partial");
    }

    #[test]
    fn test_commit_turn() {
        let mut transcript = Transcript::new();
        transcript.begin(Role::Assistant);
        transcript.apply_text("done");
        transcript.commit_turn();

        assert_eq!(transcript.active_role(), None);
        assert_eq!(transcript.messages().len(), 1);
        assert_eq!(transcript.messages()[0].content, "done");
    }
}
