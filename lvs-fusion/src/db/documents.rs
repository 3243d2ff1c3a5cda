//! Identity document queries

use crate::error::Result;
use lvs_common::db::IdentityDocument;
use sqlx::SqlitePool;

/// Newest identity document uploaded by a subject
pub async fn latest_identity_document(
    pool: &SqlitePool,
    subject_id: i64,
) -> Result<Option<IdentityDocument>> {
    let document = sqlx::query_as::<_, IdentityDocument>(
        r#"
        SELECT id, subject_id, file_path, doc_type, uploaded_at
        FROM identity_documents
        WHERE subject_id = ?
        ORDER BY uploaded_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(subject_id)
    .fetch_optional(pool)
    .await?;

    Ok(document)
}
