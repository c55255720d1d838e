use anyhow::anyhow;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::path::PathBuf;
use tracing::{error, warn};
use uuid::Uuid;

use crate::app::pagination::{PageOf, PageRequest};
use crate::app::{ServiceError, ServiceResult};
use crate::domain::document::{format_bytes, Document, DocumentCategory, FileType};
use crate::domain::user::{OwnerSummary, Requester};
use crate::infra::db::Db;
use crate::infra::storage::ObjectStorage;

pub const MAX_TITLE_LEN: usize = 100;

const DOCUMENT_SELECT: &str = "SELECT d.id, d.title, d.description, d.file_url, d.file_type, \
            d.file_size, d.category, d.is_public, d.user_id, d.created_at, \
            u.name AS owner_name \
     FROM documents d \
     JOIN users u ON u.id = d.user_id";

/// An uploaded file spooled to local disk while the request is handled.
#[derive(Debug)]
pub struct SpooledFile {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
}

impl SpooledFile {
    pub async fn discard(self) {
        if let Err(err) = tokio::fs::remove_file(&self.path).await {
            warn!(error = ?err, path = %self.path.display(), "failed to remove spooled upload");
        }
    }
}

/// Metadata fields of an upload form, as received.
#[derive(Debug, Clone, Default)]
pub struct DocumentDraft {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<DocumentCategory>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentFilter {
    pub category: Option<DocumentCategory>,
    pub file_type: Option<FileType>,
}

struct ValidDraft {
    title: String,
    description: String,
    category: DocumentCategory,
    is_public: bool,
    file_type: FileType,
}

#[derive(Clone)]
pub struct DocumentService {
    db: Db,
    storage: ObjectStorage,
}

impl DocumentService {
    pub fn new(db: Db, storage: ObjectStorage) -> Self {
        Self { db, storage }
    }

    /// Uploads the spooled file and records its metadata.
    ///
    /// Nothing is uploaded unless the metadata is valid, and no record is written unless the
    /// upload succeeded. The spooled file is removed in every case.
    pub async fn create(
        &self,
        owner_id: Uuid,
        file: Option<SpooledFile>,
        draft: DocumentDraft,
    ) -> ServiceResult<Document> {
        let Some(file) = file else {
            return Err(ServiceError::BadRequest("Please upload a file".to_string()));
        };

        let result = self.store(owner_id, &file, draft).await;
        file.discard().await;
        result
    }

    async fn store(
        &self,
        owner_id: Uuid,
        file: &SpooledFile,
        draft: DocumentDraft,
    ) -> ServiceResult<Document> {
        let valid = validate_draft(draft, &file.original_name)?;

        let key = self.storage.document_key(&format!(
            "{}.{}",
            Uuid::new_v4(),
            valid.file_type.as_db()
        ));
        let file_url = self
            .storage
            .upload_file(&file.path, &key, valid.file_type.content_type())
            .await
            .map_err(ServiceError::Upstream)?;

        let inserted: Result<Uuid, sqlx::Error> = sqlx::query_scalar(
            "INSERT INTO documents \
                (title, description, file_url, file_type, file_size, category, is_public, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(&valid.title)
        .bind(&valid.description)
        .bind(&file_url)
        .bind(valid.file_type.as_db())
        .bind(format_bytes(file.size))
        .bind(valid.category.as_db())
        .bind(valid.is_public)
        .bind(owner_id)
        .fetch_one(self.db.pool())
        .await;

        let document_id = match inserted {
            Ok(id) => id,
            Err(err) => {
                if let Err(cleanup) = self.storage.delete_object(&key).await {
                    error!(error = ?cleanup, key = %key, "failed to remove orphaned upload");
                }
                return Err(err.into());
            }
        };

        self.load(document_id).await
    }

    /// Lists documents visible to `viewer`: admins see everything, others see public
    /// documents plus their own.
    pub async fn list(
        &self,
        viewer: Option<Requester>,
        filter: DocumentFilter,
        page: PageRequest,
    ) -> ServiceResult<PageOf<Document>> {
        let see_all = viewer.is_some_and(|viewer| viewer.is_admin());
        let viewer_id = viewer.map(|viewer| viewer.user_id);
        let category = filter.category.map(|category| category.as_db());
        let file_type = filter.file_type.map(|file_type| file_type.as_db());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents d \
             WHERE ($1 OR d.is_public OR d.user_id = $2) \
               AND ($3::text IS NULL OR d.category = $3) \
               AND ($4::text IS NULL OR d.file_type = $4)",
        )
        .bind(see_all)
        .bind(viewer_id)
        .bind(category)
        .bind(file_type)
        .fetch_one(self.db.pool())
        .await?;

        let rows = sqlx::query(&format!(
            "{} \
             WHERE ($1 OR d.is_public OR d.user_id = $2) \
               AND ($3::text IS NULL OR d.category = $3) \
               AND ($4::text IS NULL OR d.file_type = $4) \
             ORDER BY d.created_at DESC, d.id DESC \
             LIMIT $5 OFFSET $6",
            DOCUMENT_SELECT
        ))
        .bind(see_all)
        .bind(viewer_id)
        .bind(category)
        .bind(file_type)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(self.db.pool())
        .await?;

        let items = rows
            .iter()
            .map(document_from_row)
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok(PageOf { items, total, page })
    }

    /// Private documents are reported missing to anyone but their owner or an admin.
    pub async fn get(&self, document_id: Uuid, viewer: Option<Requester>) -> ServiceResult<Document> {
        let document = self.load(document_id).await?;
        let visible = document.is_public
            || viewer.is_some_and(|viewer| viewer.may_modify(document.user_id));
        if !visible {
            return Err(not_found(document_id));
        }
        Ok(document)
    }

    pub async fn download_url(
        &self,
        document_id: Uuid,
        viewer: Option<Requester>,
    ) -> ServiceResult<String> {
        Ok(self.get(document_id, viewer).await?.file_url)
    }

    /// Loads a document `requester` may `action`; anyone but the owner or an admin is refused.
    pub async fn authorize(
        &self,
        document_id: Uuid,
        requester: Requester,
        action: &str,
    ) -> ServiceResult<Document> {
        let document = self.load(document_id).await?;
        ensure_may_modify(&document, requester, action)?;
        Ok(document)
    }

    pub async fn update(
        &self,
        document_id: Uuid,
        requester: Requester,
        changes: DocumentChanges,
    ) -> ServiceResult<Document> {
        self.authorize(document_id, requester, "update").await?;

        sqlx::query(
            "UPDATE documents \
             SET title = COALESCE($2, title), \
                 description = COALESCE($3, description), \
                 category = COALESCE($4, category), \
                 is_public = COALESCE($5, is_public) \
             WHERE id = $1",
        )
        .bind(document_id)
        .bind(changes.title.map(|title| title.trim().to_string()))
        .bind(changes.description)
        .bind(changes.category.map(|category| category.as_db()))
        .bind(changes.is_public)
        .execute(self.db.pool())
        .await?;

        self.load(document_id).await
    }

    /// Removes the stored file first; the record is only deleted once storage confirmed.
    pub async fn delete(&self, document_id: Uuid, requester: Requester) -> ServiceResult<()> {
        let document = self.authorize(document_id, requester, "delete").await?;

        let key = self.storage.document_key_from_url(&document.file_url)?;
        self.storage
            .delete_object(&key)
            .await
            .map_err(ServiceError::Upstream)?;

        sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(self.db.pool())
            .await?;

        Ok(())
    }

    async fn load(&self, document_id: Uuid) -> ServiceResult<Document> {
        let row = sqlx::query(&format!("{} WHERE d.id = $1", DOCUMENT_SELECT))
            .bind(document_id)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => document_from_row(&row),
            None => Err(not_found(document_id)),
        }
    }
}

fn validate_draft(draft: DocumentDraft, original_name: &str) -> ServiceResult<ValidDraft> {
    let title = draft
        .title
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .ok_or_else(|| ServiceError::BadRequest("Please add a title".to_string()))?;
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::BadRequest(
            "Title cannot be more than 100 characters".to_string(),
        ));
    }

    let description = draft
        .description
        .filter(|description| !description.trim().is_empty())
        .ok_or_else(|| ServiceError::BadRequest("Please add a description".to_string()))?;

    let category = draft
        .category
        .as_deref()
        .and_then(|category| DocumentCategory::from_db(category.trim()))
        .ok_or_else(|| ServiceError::BadRequest("Please select a category".to_string()))?;

    let file_type = FileType::from_file_name(original_name).ok_or_else(|| {
        ServiceError::BadRequest("File type must be one of pdf, docx, xlsx, pptx, txt".to_string())
    })?;

    Ok(ValidDraft {
        title,
        description,
        category,
        is_public: draft.is_public.unwrap_or(true),
        file_type,
    })
}

fn ensure_may_modify(document: &Document, requester: Requester, action: &str) -> ServiceResult<()> {
    if requester.may_modify(document.user_id) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!(
            "User {} is not authorized to {} this document",
            requester.user_id, action
        )))
    }
}

fn not_found(document_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("Document not found with id of {}", document_id))
}

fn document_from_row(row: &PgRow) -> ServiceResult<Document> {
    let file_type: String = row.get("file_type");
    let file_type =
        FileType::from_db(&file_type).ok_or_else(|| anyhow!("unknown file type: {}", file_type))?;
    let category: String = row.get("category");
    let category = DocumentCategory::from_db(&category)
        .ok_or_else(|| anyhow!("unknown document category: {}", category))?;
    let user_id: Uuid = row.get("user_id");

    Ok(Document {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        file_url: row.get("file_url"),
        file_type,
        file_size: row.get("file_size"),
        category,
        is_public: row.get("is_public"),
        user_id,
        user: Some(OwnerSummary {
            id: user_id,
            name: row.get("owner_name"),
            email: None,
        }),
        created_at: row.get("created_at"),
    })
}
