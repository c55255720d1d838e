use anyhow::{anyhow, Result};
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::user::{Role, User};
use crate::infra::db::Db;

pub(crate) const USER_COLUMNS: &str = "id, name, email, role, created_at";

#[derive(Clone)]
pub struct UserService {
    db: Db,
}

impl UserService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn update_details(
        &self,
        user_id: Uuid,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "UPDATE users \
             SET name = COALESCE($2, name), \
                 email = COALESCE($3, email) \
             WHERE id = $1 \
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(name.map(|name| name.trim().to_string()))
        .bind(email.map(|email| email.trim().to_lowercase()))
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn set_role(&self, user_id: Uuid, role: Role) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "UPDATE users SET role = $2 WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(role.as_db())
        .fetch_optional(self.db.pool())
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }
}

pub(crate) fn user_from_row(row: &PgRow) -> Result<User> {
    let role: String = row.get("role");
    let role = Role::from_db(&role).ok_or_else(|| anyhow!("unknown user role: {}", role))?;
    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        role,
        created_at: row.get("created_at"),
    })
}
