use anyhow::{Context, Result};
use parley_presence::Message;
use uuid::Uuid;

use super::ChatRepository;
use crate::models::MessageRow;

impl ChatRepository {
    /// Persist a direct message. At least one of `text`/`image` must be set.
    pub async fn insert_message(
        &self,
        sender_id: &str,
        receiver_id: &str,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<Message> {
        let row = MessageRow {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            text: text.map(String::from),
            image: image.map(String::from),
            created_at: chrono::Utc::now().timestamp(),
        };

        sqlx::query(
            r#"
            INSERT INTO messages (id, sender_id, receiver_id, text, image, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.sender_id)
        .bind(&row.receiver_id)
        .bind(&row.text)
        .bind(&row.image)
        .bind(row.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;

        Ok(row.into())
    }

    /// All messages between two users in either direction, oldest first.
    pub async fn get_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT id, sender_id, receiver_id, text, image, created_at
            FROM messages
            WHERE (sender_id = ? AND receiver_id = ?)
               OR (sender_id = ? AND receiver_id = ?)
            ORDER BY seq ASC
            "#,
        )
        .bind(user_a)
        .bind(user_b)
        .bind(user_b)
        .bind(user_a)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Message::from).collect())
    }
}
