//! Login sessions. The client holds a random token; only its SHA-256 is stored.

use anyhow::Result;
use data_encoding::HEXLOWER;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::Duration;

use super::ChatRepository;
use crate::models::User;

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

fn hash_token(token: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(token.as_bytes())[..])
}

impl ChatRepository {
    /// Start a session for `user_id`. Returns the raw token for the cookie.
    pub async fn create_session(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let token = generate_token();
        let expires_at = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;

        sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(hash_token(&token))
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;

        Ok(token)
    }

    /// Resolve a session token to its user. Expired sessions resolve to None.
    pub async fn get_session_user(&self, token: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.email, u.full_name, u.password_hash, u.profile_pic, u.created_at, u.updated_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token_hash = ? AND s.expires_at > ?
            "#,
        )
        .bind(hash_token(token))
        .bind(chrono::Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
            .bind(hash_token(token))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove all expired sessions. Returns how many were removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
