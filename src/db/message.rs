//! Message repository: ordered user/assistant turns per conversation

use chrono::{DateTime, Utc};
use rusqlite::{ErrorCode, params};

use super::{DbPool, conn, parse_datetime};
use crate::context::{Role, Turn};
use crate::{Error, Result};

/// Ordered persistence of conversation turns
///
/// Insertion order is the only notion of history; `list_turns` returns
/// turns oldest first exactly as they were appended.
pub trait MessageStore: Send + Sync {
    /// All turns of a conversation, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn list_turns(&self, conversation_id: i64) -> Result<Vec<Turn>>;

    /// Append a single turn
    ///
    /// # Errors
    ///
    /// Returns error if the turn cannot be stored
    fn append_turn(&self, conversation_id: i64, turn: &Turn) -> Result<()>;

    /// Append a user message and the assistant reply as one unit
    ///
    /// Either both turns are stored or neither is.
    ///
    /// # Errors
    ///
    /// Returns error if the pair cannot be stored
    fn append_exchange(&self, conversation_id: i64, user: &str, assistant: &str) -> Result<()>;
}

/// A persisted message with its metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub content: String,
    pub is_user: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    #[must_use]
    pub fn to_turn(&self) -> Turn {
        if self.is_user {
            Turn::user(&self.content)
        } else {
            Turn::assistant(&self.content)
        }
    }
}

/// `SQLite`-backed message repository
#[derive(Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    /// Create a new message repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// All messages of a conversation with metadata, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self, conversation_id: i64) -> Result<Vec<StoredMessage>> {
        let conn = conn(&self.pool)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, conversation_id, content, is_user, created_at
                 FROM messages WHERE conversation_id = ?1
                 ORDER BY id ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let messages = stmt
            .query_map([conversation_id], |row| {
                Ok(StoredMessage {
                    id: row.get(0)?,
                    conversation_id: row.get(1)?,
                    content: row.get(2)?,
                    is_user: row.get(3)?,
                    created_at: parse_datetime(&row.get::<_, String>(4)?),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(messages)
    }

    /// Count messages in a conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self, conversation_id: i64) -> Result<usize> {
        let conn = conn(&self.pool)?;

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl MessageStore for MessageRepo {
    fn list_turns(&self, conversation_id: i64) -> Result<Vec<Turn>> {
        Ok(self
            .list(conversation_id)?
            .iter()
            .map(StoredMessage::to_turn)
            .collect())
    }

    fn append_turn(&self, conversation_id: i64, turn: &Turn) -> Result<()> {
        let is_user = stored_flag(turn.role)?;
        let conn = conn(&self.pool)?;

        insert(&conn, conversation_id, &turn.content, is_user)
    }

    fn append_exchange(&self, conversation_id: i64, user: &str, assistant: &str) -> Result<()> {
        let mut conn = conn(&self.pool)?;
        let tx = conn.transaction()?;

        insert(&tx, conversation_id, user, true)?;
        insert(&tx, conversation_id, assistant, false)?;

        tx.commit()?;
        tracing::debug!(conversation = conversation_id, "stored exchange");
        Ok(())
    }
}

/// Map a role to the stored `is_user` flag; system turns are never stored
fn stored_flag(role: Role) -> Result<bool> {
    match role {
        Role::User => Ok(true),
        Role::Assistant => Ok(false),
        Role::System => Err(Error::Validation(
            "system turns are not persisted".to_string(),
        )),
    }
}

fn insert(
    conn: &rusqlite::Connection,
    conversation_id: i64,
    content: &str,
    is_user: bool,
) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (conversation_id, content, is_user, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![conversation_id, content, is_user, Utc::now().to_rfc3339()],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref f, _) if f.code == ErrorCode::ConstraintViolation => {
            Error::NotFound(format!("conversation {conversation_id}"))
        }
        other => Error::Database(other.to_string()),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConversationRepo, init_memory};

    fn setup() -> (ConversationRepo, MessageRepo) {
        let pool = init_memory().unwrap();
        (
            ConversationRepo::new(pool.clone(), "gpt-3.5-turbo"),
            MessageRepo::new(pool),
        )
    }

    #[test]
    fn test_append_preserves_order() {
        let (conversations, messages) = setup();
        let conv = conversations.create(None).unwrap();

        messages.append_turn(conv.id, &Turn::user("Hello")).unwrap();
        messages
            .append_turn(conv.id, &Turn::assistant("Hi there!"))
            .unwrap();
        messages.append_turn(conv.id, &Turn::user("Bye")).unwrap();

        let turns = messages.list_turns(conv.id).unwrap();
        assert_eq!(
            turns,
            vec![
                Turn::user("Hello"),
                Turn::assistant("Hi there!"),
                Turn::user("Bye"),
            ]
        );
    }

    #[test]
    fn test_system_turn_rejected() {
        let (conversations, messages) = setup();
        let conv = conversations.create(None).unwrap();

        let err = messages
            .append_turn(conv.id, &Turn::system("Output format: Markdown"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(messages.count(conv.id).unwrap(), 0);
    }

    #[test]
    fn test_append_exchange_stores_pair() {
        let (conversations, messages) = setup();
        let conv = conversations.create(None).unwrap();

        messages.append_exchange(conv.id, "question", "answer").unwrap();

        let stored = messages.list(conv.id).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].is_user);
        assert_eq!(stored[0].content, "question");
        assert!(!stored[1].is_user);
        assert_eq!(stored[1].content, "answer");
    }

    #[test]
    fn test_append_to_missing_conversation() {
        let (_, messages) = setup();

        let err = messages.append_exchange(404, "question", "answer").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(messages.count(404).unwrap(), 0);
    }

    #[test]
    fn test_messages_scoped_to_conversation() {
        let (conversations, messages) = setup();
        let a = conversations.create(Some("a")).unwrap();
        let b = conversations.create(Some("b")).unwrap();

        messages.append_exchange(a.id, "a1", "a2").unwrap();
        messages.append_exchange(b.id, "b1", "b2").unwrap();

        let turns = messages.list_turns(b.id).unwrap();
        assert_eq!(turns, vec![Turn::user("b1"), Turn::assistant("b2")]);
    }

    #[test]
    fn test_delete_conversation_cascades() {
        let (conversations, messages) = setup();
        let conv = conversations.create(None).unwrap();
        messages.append_exchange(conv.id, "q", "a").unwrap();

        conversations.delete(conv.id).unwrap();

        assert_eq!(messages.count(conv.id).unwrap(), 0);
    }
}
