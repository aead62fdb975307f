use crate::models::{ConversationTurn, QueryResult, Role, VisualizationMode};
use chrono::Utc;

/// Append-only, in-memory turn log for one session.
#[derive(Debug, Default, Clone)]
pub struct Conversation {
    turns: Vec<ConversationTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: ConversationTurn) -> &ConversationTurn {
        self.turns.push(turn);
        &self.turns[self.turns.len() - 1]
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Most recent turn carrying a result set.
    pub fn latest_result(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|turn| turn.result.is_some())
    }
}

pub fn new_turn(role: Role, content: impl Into<String>) -> ConversationTurn {
    ConversationTurn {
        id: uuid::Uuid::new_v4().to_string(),
        role,
        content: content.into(),
        sql: None,
        result: None,
        narrative: None,
        visualization: None,
        timestamp: Utc::now(),
    }
}

pub fn assistant_turn(
    content: impl Into<String>,
    sql: Option<String>,
    result: Option<QueryResult>,
    visualization: Option<VisualizationMode>,
) -> ConversationTurn {
    ConversationTurn {
        sql,
        result,
        visualization,
        ..new_turn(Role::Assistant, content)
    }
}

#[cfg(test)]
mod tests {
    use super::{assistant_turn, new_turn, Conversation};
    use crate::models::{QueryResult, Role};

    #[test]
    fn turns_keep_insertion_order() {
        let mut conversation = Conversation::new();
        conversation.push(new_turn(Role::User, "first"));
        conversation.push(assistant_turn("answer", Some("SELECT 1".to_string()), Some(QueryResult::default()), None));
        conversation.push(new_turn(Role::User, "second"));

        let contents = conversation
            .turns()
            .iter()
            .map(|turn| turn.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["first", "answer", "second"]);
        assert_eq!(conversation.latest_result().expect("result").content, "answer");
        assert_ne!(conversation.turns()[0].id, conversation.turns()[2].id);
    }
}
