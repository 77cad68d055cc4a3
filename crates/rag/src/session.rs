pub const USER_CONTEXT_PREFIX: &str = "USER_CONTEXT: ";
const ASSISTANT_PREFIX: &str = "Ассистент: ";

/// State carried between turns of one consultation.
///
/// `chat_log` accumulates every answer and is replayed to the model as the
/// assistant turn; `user_context` collects what the current turn knows and is
/// reset once an answer is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    chat_log: String,
    user_context: String,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self {
            chat_log: String::new(),
            user_context: USER_CONTEXT_PREFIX.to_string(),
        }
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat_log(&self) -> &str {
        &self.chat_log
    }

    pub fn user_context(&self) -> &str {
        &self.user_context
    }

    pub fn push_context(&mut self, text: &str) {
        self.user_context.push_str(text);
    }

    pub fn history(&self) -> Option<String> {
        if self.chat_log.trim().is_empty() {
            None
        } else {
            Some(self.chat_log.clone())
        }
    }

    pub fn record_answer(&mut self, answer: &str) {
        self.chat_log.push('\n');
        self.chat_log.push_str(ASSISTANT_PREFIX);
        self.chat_log.push_str(answer);
        self.user_context = USER_CONTEXT_PREFIX.to_string();
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_accumulate_and_context_resets() {
        let mut session = ChatSession::new();
        assert!(session.history().is_none());
        session.push_context("Ключевые термины: аренд");
        assert_eq!(session.user_context(), "USER_CONTEXT: Ключевые термины: аренд");

        session.record_answer("Срок аренды не ограничен.");
        session.record_answer("Уточните договор.");
        assert_eq!(
            session.chat_log(),
            "\nАссистент: Срок аренды не ограничен.\nАссистент: Уточните договор."
        );
        assert_eq!(session.user_context(), USER_CONTEXT_PREFIX);
        assert!(session.history().is_some());

        session.reset();
        assert_eq!(session, ChatSession::default());
    }
}
