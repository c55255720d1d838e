use anyhow::anyhow;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

use crate::app::error::is_unique_violation;
use crate::app::pagination::{PageOf, PageRequest};
use crate::app::{ServiceError, ServiceResult};
use crate::domain::stream::{
    generate_stream_key, LiveState, Stream, StreamCategory, DEFAULT_THUMBNAIL,
};
use crate::domain::user::{OwnerSummary, Requester};
use crate::infra::db::Db;

const STREAM_KEY_CONSTRAINT: &str = "streams_stream_key_key";
const KEY_GENERATION_ATTEMPTS: usize = 3;

const STREAM_SELECT: &str = "SELECT s.id, s.title, s.description, s.stream_key, s.is_live, \
            s.start_time, s.end_time, s.thumbnail, s.category, s.user_id, \
            s.created_at, s.updated_at, u.name AS owner_name, u.email AS owner_email \
     FROM streams s \
     JOIN users u ON u.id = s.user_id";

#[derive(Debug, Clone)]
pub struct NewStream {
    pub title: String,
    pub description: String,
    pub category: StreamCategory,
    pub thumbnail: Option<String>,
    pub stream_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<StreamCategory>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamFilter {
    pub category: Option<StreamCategory>,
    pub is_live: Option<bool>,
}

#[derive(Clone)]
pub struct StreamService {
    db: Db,
}

impl StreamService {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn list(&self, filter: StreamFilter, page: PageRequest) -> ServiceResult<PageOf<Stream>> {
        let category = filter.category.map(|category| category.as_db());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM streams s \
             WHERE ($1::text IS NULL OR s.category = $1) \
               AND ($2::bool IS NULL OR s.is_live = $2)",
        )
        .bind(category)
        .bind(filter.is_live)
        .fetch_one(self.db.pool())
        .await?;

        let rows = sqlx::query(&format!(
            "{} \
             WHERE ($1::text IS NULL OR s.category = $1) \
               AND ($2::bool IS NULL OR s.is_live = $2) \
             ORDER BY s.created_at DESC, s.id DESC \
             LIMIT $3 OFFSET $4",
            STREAM_SELECT
        ))
        .bind(category)
        .bind(filter.is_live)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(self.db.pool())
        .await?;

        let items = rows
            .iter()
            .map(|row| stream_from_row(row, true))
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok(PageOf { items, total, page })
    }

    pub async fn get(&self, stream_id: Uuid) -> ServiceResult<Stream> {
        self.find(stream_id)
            .await?
            .ok_or_else(|| not_found(stream_id))
    }

    pub async fn find(&self, stream_id: Uuid) -> ServiceResult<Option<Stream>> {
        let row = sqlx::query(&format!("{} WHERE s.id = $1", STREAM_SELECT))
            .bind(stream_id)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(|row| stream_from_row(row, true)).transpose()
    }

    pub async fn find_by_key(&self, stream_key: &str) -> ServiceResult<Option<Stream>> {
        let row = sqlx::query(&format!("{} WHERE s.stream_key = $1", STREAM_SELECT))
            .bind(stream_key)
            .fetch_optional(self.db.pool())
            .await?;

        row.as_ref().map(|row| stream_from_row(row, true)).transpose()
    }

    /// Live streams with the owner's name only.
    pub async fn list_live(&self) -> ServiceResult<Vec<Stream>> {
        let rows = sqlx::query(&format!(
            "{} WHERE s.is_live ORDER BY s.start_time DESC, s.id DESC",
            STREAM_SELECT
        ))
        .fetch_all(self.db.pool())
        .await?;

        rows.iter().map(|row| stream_from_row(row, false)).collect()
    }

    pub async fn create(&self, owner_id: Uuid, new: NewStream) -> ServiceResult<Stream> {
        let supplied_key = new.stream_key.is_some();
        let thumbnail = new
            .thumbnail
            .filter(|thumbnail| !thumbnail.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_THUMBNAIL.to_string());

        let mut attempts = 0;
        let stream_id = loop {
            attempts += 1;
            let stream_key = new.stream_key.clone().unwrap_or_else(generate_stream_key);

            let inserted: Result<Uuid, sqlx::Error> = sqlx::query_scalar(
                "INSERT INTO streams (title, description, stream_key, thumbnail, category, user_id) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 RETURNING id",
            )
            .bind(new.title.trim())
            .bind(&new.description)
            .bind(&stream_key)
            .bind(&thumbnail)
            .bind(new.category.as_db())
            .bind(owner_id)
            .fetch_one(self.db.pool())
            .await;

            match inserted {
                Ok(id) => break id,
                Err(err) if is_unique_violation(&err, STREAM_KEY_CONSTRAINT) => {
                    if supplied_key {
                        return Err(ServiceError::Conflict(
                            "streamKey is already in use".to_string(),
                        ));
                    }
                    if attempts >= KEY_GENERATION_ATTEMPTS {
                        return Err(ServiceError::Internal(anyhow!(
                            "could not generate a unique stream key"
                        )));
                    }
                    tracing::warn!(attempts, "generated stream key collided, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        };

        self.get(stream_id).await
    }

    /// Loads a stream `requester` may `action`; anyone but the owner or an admin is refused.
    pub async fn authorize(
        &self,
        stream_id: Uuid,
        requester: Requester,
        action: &str,
    ) -> ServiceResult<Stream> {
        let stream = self.get(stream_id).await?;
        ensure_may_modify(&stream, requester, action)?;
        Ok(stream)
    }

    pub async fn update(
        &self,
        stream_id: Uuid,
        requester: Requester,
        changes: StreamChanges,
    ) -> ServiceResult<Stream> {
        self.authorize(stream_id, requester, "update").await?;

        sqlx::query(
            "UPDATE streams \
             SET title = COALESCE($2, title), \
                 description = COALESCE($3, description), \
                 category = COALESCE($4, category), \
                 thumbnail = COALESCE($5, thumbnail), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(stream_id)
        .bind(changes.title.map(|title| title.trim().to_string()))
        .bind(changes.description)
        .bind(changes.category.map(|category| category.as_db()))
        .bind(changes.thumbnail)
        .execute(self.db.pool())
        .await?;

        self.get(stream_id).await
    }

    pub async fn delete(&self, stream_id: Uuid, requester: Requester) -> ServiceResult<()> {
        self.authorize(stream_id, requester, "delete").await?;

        sqlx::query("DELETE FROM streams WHERE id = $1")
            .bind(stream_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    pub async fn start(&self, stream_id: Uuid, requester: Requester) -> ServiceResult<Stream> {
        self.transition_checked(stream_id, requester, LiveState::Live)
            .await
    }

    pub async fn end(&self, stream_id: Uuid, requester: Requester) -> ServiceResult<Stream> {
        self.transition_checked(stream_id, requester, LiveState::Idle)
            .await
    }

    async fn transition_checked(
        &self,
        stream_id: Uuid,
        requester: Requester,
        target: LiveState,
    ) -> ServiceResult<Stream> {
        let action = match target {
            LiveState::Live => "start",
            LiveState::Idle => "end",
        };
        let stream = self.authorize(stream_id, requester, action).await?;

        if LiveState::of(&stream) == target || !self.transition(stream_id, target).await? {
            return Err(ServiceError::Conflict(match target {
                LiveState::Live => "Stream is already live".to_string(),
                LiveState::Idle => "Stream is not currently live".to_string(),
            }));
        }

        self.get(stream_id).await
    }

    /// Moves a stream into `target` if it is currently in the other state.
    ///
    /// The write is conditional on the current `is_live` value, so of two racing
    /// transitions exactly one returns true.
    pub async fn transition(&self, stream_id: Uuid, target: LiveState) -> ServiceResult<bool> {
        let query = match target {
            LiveState::Live => {
                "UPDATE streams \
                 SET is_live = true, start_time = now(), updated_at = now() \
                 WHERE id = $1 AND is_live = $2"
            }
            LiveState::Idle => {
                "UPDATE streams \
                 SET is_live = false, end_time = now(), updated_at = now() \
                 WHERE id = $1 AND is_live = $2"
            }
        };

        let result = sqlx::query(query)
            .bind(stream_id)
            .bind(target.required_is_live())
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

fn ensure_may_modify(stream: &Stream, requester: Requester, action: &str) -> ServiceResult<()> {
    if requester.may_modify(stream.user_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "User {} is not authorized to {} this stream",
            requester.user_id, action
        )))
    }
}

fn not_found(stream_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Stream not found with id of {}", stream_id))
}

fn stream_from_row(row: &PgRow, with_email: bool) -> ServiceResult<Stream> {
    let category: String = row.get("category");
    let category = StreamCategory::from_db(&category)
        .ok_or_else(|| anyhow!("unknown stream category: {}", category))?;
    let user_id: Uuid = row.get("user_id");

    Ok(Stream {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        stream_key: Some(row.get("stream_key")),
        is_live: row.get("is_live"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        thumbnail: row.get("thumbnail"),
        category,
        user_id,
        user: Some(OwnerSummary {
            id: user_id,
            name: row.get("owner_name"),
            email: with_email.then(|| row.get("owner_email")),
        }),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
