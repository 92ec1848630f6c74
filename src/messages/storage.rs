use super::types::{Message, Role};

/// Ordered conversation history.
///
/// Index 0, when present, holds the system prompt and survives trimming.
/// The store is not synchronized on its own; the orchestrator keeps it behind
/// the same lock as the conversation state.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    messages: Vec<Message>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Create a store seeded with a single system message
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Independent copy of the history, safe to hand to another thread
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Keep the system message plus the newest `max_context_messages` entries.
    /// Zero means unbounded history.
    pub fn trim(&mut self, max_context_messages: usize) {
        if max_context_messages == 0 {
            return;
        }

        let start = self.history_start();
        let retained = self.messages.len() - start;
        if retained > max_context_messages {
            let excess = retained - max_context_messages;
            self.messages.drain(start..start + excess);
        }
    }

    /// Replace the history with a single system message
    pub fn reset(&mut self, system_prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::system(system_prompt));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role() == Role::System)
            .map(|m| m.content())
    }

    pub fn non_system_count(&self) -> usize {
        self.messages.len() - self.history_start()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn history_start(&self) -> usize {
        match self.messages.first() {
            Some(first) if first.is_system() => 1,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(store: &ConversationStore) -> Vec<&str> {
        store.messages().iter().map(|m| m.content()).collect()
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut store = ConversationStore::with_system_prompt("system");
        store.append(Message::user("first"));

        let snapshot = store.snapshot();
        store.append(Message::assistant("second"));
        store.reset("other");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].content(), "first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_trim_keeps_system_and_newest() {
        let mut store = ConversationStore::with_system_prompt("system");
        for i in 0..5 {
            store.append(Message::user(format!("u{}", i)));
        }

        store.trim(2);

        assert_eq!(contents(&store), vec!["system", "u3", "u4"]);
        assert_eq!(store.messages()[0].role(), Role::System);
    }

    #[test]
    fn test_trim_zero_is_unbounded() {
        let mut store = ConversationStore::with_system_prompt("system");
        for i in 0..20 {
            store.append(Message::user(format!("u{}", i)));
        }

        store.trim(0);
        assert_eq!(store.len(), 21);
    }

    #[test]
    fn test_trim_under_limit_is_noop() {
        let mut store = ConversationStore::with_system_prompt("system");
        store.append(Message::user("a"));
        store.append(Message::assistant("b"));

        store.trim(10);
        assert_eq!(contents(&store), vec!["system", "a", "b"]);
    }

    #[test]
    fn test_trim_invariant_for_many_limits() {
        for k in 1..8usize {
            let mut store = ConversationStore::with_system_prompt("system");
            let mut appended = Vec::new();
            for i in 0..15 {
                let text = format!("m{}", i);
                let message = if i % 2 == 0 {
                    Message::user(&text)
                } else {
                    Message::assistant(&text)
                };
                store.append(message);
                appended.push(text);
                store.trim(k);

                assert_eq!(store.messages()[0].content(), "system");
                assert!(store.non_system_count() <= k);
                let expected: Vec<&str> = appended
                    .iter()
                    .rev()
                    .take(k)
                    .rev()
                    .map(|s| s.as_str())
                    .collect();
                assert_eq!(&contents(&store)[1..], expected.as_slice());
            }
        }
    }

    #[test]
    fn test_trim_pairs_scenario() {
        let mut store = ConversationStore::with_system_prompt("system");
        for i in 0..3 {
            store.append(Message::user(format!("q{}", i)));
            store.trim(2);
            store.append(Message::assistant(format!("a{}", i)));
        }
        store.trim(2);

        assert_eq!(store.len(), 3);
        assert_eq!(contents(&store), vec!["system", "q2", "a2"]);
    }

    #[test]
    fn test_trim_without_system_message() {
        let mut store = ConversationStore::new();
        store.append(Message::user("a"));
        store.append(Message::user("b"));
        store.append(Message::user("c"));

        store.trim(1);
        assert_eq!(contents(&store), vec!["c"]);
        assert!(store.system_prompt().is_none());
    }

    #[test]
    fn test_reset() {
        let mut store = ConversationStore::with_system_prompt("old");
        store.append(Message::user("hello"));

        store.reset("new prompt");

        assert_eq!(store.len(), 1);
        assert_eq!(store.system_prompt(), Some("new prompt"));
        assert_eq!(store.non_system_count(), 0);
    }
}
