//! Conversation repository for CRUD operations

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};

use super::{DbPool, conn, parse_datetime};
use crate::{Error, Result};

/// Name given to conversations created without one
pub const DEFAULT_CONVERSATION_NAME: &str = "New conversation";

/// A stored conversation and its per-conversation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub name: String,
    /// Whether prior turns are sent along with new messages
    pub context_enabled: bool,
    /// Model used for completions in this conversation
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepo {
    pool: DbPool,
    default_model: String,
}

impl ConversationRepo {
    /// Create a new conversation repository
    ///
    /// New conversations start on `default_model`.
    #[must_use]
    pub fn new(pool: DbPool, default_model: impl Into<String>) -> Self {
        Self {
            pool,
            default_model: default_model.into(),
        }
    }

    /// Create a conversation, falling back to the default name
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, name: Option<&str>) -> Result<Conversation> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_NAME);
        let now = Utc::now();

        let conn = conn(&self.pool)?;
        conn.execute(
            "INSERT INTO conversations (name, context_enabled, model, created_at)
             VALUES (?1, 1, ?2, ?3)",
            params![name, &self.default_model, now.to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        let id = conn.last_insert_rowid();
        tracing::debug!(conversation = id, name, "created conversation");

        Ok(Conversation {
            id,
            name: name.to_string(),
            context_enabled: true,
            model: self.default_model.clone(),
            created_at: now,
        })
    }

    /// List all conversations, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(&self) -> Result<Vec<Conversation>> {
        let conn = conn(&self.pool)?;

        let mut stmt = conn
            .prepare(
                "SELECT id, name, context_enabled, model, created_at
                 FROM conversations ORDER BY id DESC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let conversations = stmt
            .query_map([], row_to_conversation)
            .map_err(|e| Error::Database(e.to_string()))?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(conversations)
    }

    /// Get a conversation by ID
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: i64) -> Result<Option<Conversation>> {
        let conn = conn(&self.pool)?;

        conn.query_row(
            "SELECT id, name, context_enabled, model, created_at
             FROM conversations WHERE id = ?1",
            [id],
            row_to_conversation,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Get a conversation or fail with [`Error::NotFound`]
    ///
    /// # Errors
    ///
    /// Returns error if the conversation does not exist or the query fails
    pub fn require(&self, id: i64) -> Result<Conversation> {
        self.get(id)?
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    /// Rename a conversation
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for an empty name, [`Error::NotFound`]
    /// if the conversation does not exist
    pub fn rename(&self, id: i64, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("name must not be empty".to_string()));
        }

        let conn = conn(&self.pool)?;
        let updated = conn
            .execute(
                "UPDATE conversations SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Error::NotFound(format!("conversation {id}")));
        }
        Ok(())
    }

    /// Delete a conversation and all of its messages
    ///
    /// Returns true if a conversation was deleted
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = conn(&self.pool)?;
        let deleted = conn
            .execute("DELETE FROM conversations WHERE id = ?1", [id])
            .map_err(|e| Error::Database(e.to_string()))?;

        if deleted > 0 {
            tracing::info!(conversation = id, "deleted conversation");
        }
        Ok(deleted > 0)
    }

    /// Flip the context flag and return its new value
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the conversation does not exist
    pub fn toggle_context(&self, id: i64) -> Result<bool> {
        let conn = conn(&self.pool)?;
        conn.query_row(
            "UPDATE conversations SET context_enabled = NOT context_enabled
             WHERE id = ?1 RETURNING context_enabled",
            [id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))?
        .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }

    /// Whether prior turns are sent with new messages
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the conversation does not exist
    pub fn context_enabled(&self, id: i64) -> Result<bool> {
        self.column(id, "SELECT context_enabled FROM conversations WHERE id = ?1")
    }

    /// Model used for completions
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the conversation does not exist
    pub fn model(&self, id: i64) -> Result<String> {
        self.column(id, "SELECT model FROM conversations WHERE id = ?1")
    }

    /// Set the model used for completions
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the conversation does not exist
    pub fn set_model(&self, id: i64, model: &str) -> Result<()> {
        let conn = conn(&self.pool)?;
        let updated = conn
            .execute(
                "UPDATE conversations SET model = ?1 WHERE id = ?2",
                params![model, id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        if updated == 0 {
            return Err(Error::NotFound(format!("conversation {id}")));
        }
        tracing::debug!(conversation = id, model, "changed conversation model");
        Ok(())
    }

    fn column<T: rusqlite::types::FromSql>(&self, id: i64, sql: &str) -> Result<T> {
        let conn = conn(&self.pool)?;
        conn.query_row(sql, [id], |row| row.get(0))
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("conversation {id}")))
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        name: row.get(1)?,
        context_enabled: row.get(2)?,
        model: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn setup() -> ConversationRepo {
        ConversationRepo::new(init_memory().unwrap(), "gpt-3.5-turbo")
    }

    #[test]
    fn test_create_defaults() {
        let repo = setup();

        let conv = repo.create(None).unwrap();
        assert_eq!(conv.name, DEFAULT_CONVERSATION_NAME);
        assert!(conv.context_enabled);
        assert_eq!(conv.model, "gpt-3.5-turbo");

        let blank = repo.create(Some("   ")).unwrap();
        assert_eq!(blank.name, DEFAULT_CONVERSATION_NAME);

        let stored = repo.get(conv.id).unwrap().unwrap();
        assert_eq!(stored.name, conv.name);
        assert_eq!(stored.model, conv.model);
    }

    #[test]
    fn test_list_newest_first() {
        let repo = setup();
        let first = repo.create(Some("first")).unwrap();
        let second = repo.create(Some("second")).unwrap();

        let all = repo.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn test_rename() {
        let repo = setup();
        let conv = repo.create(Some("old")).unwrap();

        repo.rename(conv.id, "  new name ").unwrap();
        assert_eq!(repo.get(conv.id).unwrap().unwrap().name, "new name");

        assert!(matches!(repo.rename(conv.id, ""), Err(Error::Validation(_))));
        assert!(matches!(repo.rename(999, "x"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_toggle_context() {
        let repo = setup();
        let conv = repo.create(None).unwrap();

        assert!(!repo.toggle_context(conv.id).unwrap());
        assert!(!repo.get(conv.id).unwrap().unwrap().context_enabled);
        assert!(repo.toggle_context(conv.id).unwrap());
        assert!(repo.context_enabled(conv.id).unwrap());

        assert!(matches!(repo.toggle_context(42), Err(Error::NotFound(_))));
        assert!(matches!(repo.context_enabled(42), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_set_model() {
        let repo = setup();
        let conv = repo.create(None).unwrap();

        repo.set_model(conv.id, "gpt-4").unwrap();
        assert_eq!(repo.model(conv.id).unwrap(), "gpt-4");
        assert!(matches!(repo.set_model(7, "gpt-4"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_delete() {
        let repo = setup();
        let conv = repo.create(None).unwrap();

        assert!(repo.delete(conv.id).unwrap());
        assert!(!repo.delete(conv.id).unwrap());
        assert!(repo.get(conv.id).unwrap().is_none());
        assert!(matches!(repo.require(conv.id), Err(Error::NotFound(_))));
    }
}
