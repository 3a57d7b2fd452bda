use crate::message::{Role, Turn};

/// Ordered conversation history.
///
/// Append-only apart from [`Transcript::pop_last`], which exists solely to
/// retract a user turn whose model call failed, and [`Transcript::clear`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Remove the final turn if it is a user turn. No-op otherwise.
    pub fn pop_last(&mut self) -> Option<Turn> {
        if self.turns.last().is_some_and(|t| t.role == Role::User) {
            self.turns.pop()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Owned copy of every turn, in order, for submission to the model.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Whether turns strictly alternate user/assistant starting with a user
    /// turn, allowing a single trailing user turn.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.turns.iter().enumerate().all(|(i, t)| {
            let expected = if i % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            t.role == expected
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_order() {
        let mut t = Transcript::new();
        t.append(Turn::user_text("a"));
        t.append(Turn::assistant("b"));
        let snap = t.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].text(), "a");
        assert_eq!(snap[1].text(), "b");
        assert!(t.is_balanced());
    }

    #[test]
    fn pop_last_removes_trailing_user_turn() {
        let mut t = Transcript::new();
        t.append(Turn::user_text("a"));
        t.append(Turn::assistant("b"));
        t.append(Turn::user_text("c"));

        let popped = t.pop_last();
        assert_eq!(popped.map(|p| p.text()), Some("c".to_string()));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn pop_last_ignores_assistant_turn() {
        let mut t = Transcript::new();
        t.append(Turn::user_text("a"));
        t.append(Turn::assistant("b"));
        assert!(t.pop_last().is_none());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn pop_last_on_empty_is_noop() {
        let mut t = Transcript::new();
        assert!(t.pop_last().is_none());
        assert!(t.is_empty());
    }

    #[test]
    fn clear_empties() {
        let mut t = Transcript::new();
        t.append(Turn::user_text("a"));
        t.clear();
        assert!(t.is_empty());
        assert!(t.last().is_none());
    }

    #[test]
    fn detects_unbalanced_history() {
        let mut t = Transcript::new();
        t.append(Turn::user_text("a"));
        assert!(t.is_balanced());
        t.append(Turn::user_text("b"));
        assert!(!t.is_balanced());
    }
}
