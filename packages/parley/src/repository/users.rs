//! User accounts with argon2-hashed passwords.

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use uuid::Uuid;

use super::ChatRepository;
use crate::models::User;

/// Hash a password with Argon2id and a random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored Argon2id hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Emails are compared case-insensitively.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

const USER_COLUMNS: &str =
    "id, email, full_name, password_hash, profile_pic, created_at, updated_at";

impl ChatRepository {
    /// Create a user with an argon2-hashed password.
    pub async fn create_user(&self, email: &str, full_name: &str, password: &str) -> Result<User> {
        let now = chrono::Utc::now().timestamp();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: normalize_email(email),
            full_name: full_name.trim().to_string(),
            password_hash: hash_password(password)?,
            profile_pic: None,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            "INSERT INTO users (id, email, full_name, password_hash, profile_pic, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&user.password_hash)
        .bind(&user.profile_pic)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert user")?;

        Ok(user)
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = ?"
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Verify password against stored argon2 hash. Returns the User on success.
    pub async fn verify_user_password(&self, email: &str, password: &str) -> Result<Option<User>> {
        let user = match self.get_user_by_email(email).await? {
            Some(u) => u,
            None => return Ok(None),
        };
        if verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Set the profile picture URL. Returns the updated user, or None if it doesn't exist.
    pub async fn update_profile_pic(&self, user_id: &str, profile_pic: &str) -> Result<Option<User>> {
        let result = sqlx::query("UPDATE users SET profile_pic = ?, updated_at = ? WHERE id = ?")
            .bind(profile_pic)
            .bind(chrono::Utc::now().timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_user_by_id(user_id).await
    }

    /// Every user except `user_id`, for the contact sidebar.
    pub async fn list_users_except(&self, user_id: &str) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ? ORDER BY full_name COLLATE NOCASE, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }
}
