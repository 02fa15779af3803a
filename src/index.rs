//! Durable keyed metadata index, backed by `sea-orm` (default: SQLite).
//!
//! The store must tolerate process restart; a single-file embedded database
//! is sufficient (spec.md §4.8). All operations are timed and error-counted
//! via the [`crate::metrics`] facade.

use futures::TryStreamExt;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{ColumnDef, Table};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, Set};

use crate::content::Content;
use crate::expiry::Expiry;
use crate::metrics::Timer;
use crate::storage::StorageBackend;

pub mod entity {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "content")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub key: String,
        pub content_type: String,
        pub encoding: String,
        /// Milliseconds since epoch, or `-1` for "never".
        pub expiry: i64,
        pub last_modified: i64,
        pub modifiable: bool,
        pub auth_key: Option<String>,
        pub backend_id: String,
        pub content_length: i64,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

use entity::{ActiveModel, Column, Entity as ContentEntity, Model};

fn model_to_content(model: Model) -> Content {
    let encoding = if model.encoding.is_empty() {
        Vec::new()
    } else {
        model.encoding.split(',').map(|s| s.to_string()).collect()
    };

    Content {
        key: model.key.clone(),
        content_type: model.content_type,
        encoding,
        expiry: Expiry::from_millis(model.expiry),
        last_modified: chrono::DateTime::from_timestamp_millis(model.last_modified)
            .unwrap_or_else(chrono::Utc::now),
        modifiable: model.modifiable,
        auth_key: model.auth_key,
        backend_id: model.backend_id,
        content_length: model.content_length as u64,
        content: None,
        ..Content::new(model.key, String::new(), vec![], Expiry::Never, false, None, vec![])
    }
}

fn content_to_active_model(content: &Content) -> ActiveModel {
    ActiveModel {
        key: Set(content.key.clone()),
        content_type: Set(content.content_type.clone()),
        encoding: Set(content.encoding.join(",")),
        expiry: Set(content.expiry.to_millis()),
        last_modified: Set(content.last_modified.timestamp_millis()),
        modifiable: Set(content.modifiable),
        auth_key: Set(content.auth_key.clone()),
        backend_id: Set(content.backend_id.clone()),
        content_length: Set(content.content_length as i64),
    }
}

/// Aggregate row returned by `group_by`: per-`(content_type, backend_id)`
/// count and total byte size, used to drive the stored-content gauges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStats {
    pub content_type: String,
    pub backend_id: String,
    pub count: u64,
    pub total_bytes: u64,
}

pub struct ContentIndex {
    db: DatabaseConnection,
}

impl ContentIndex {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let mut options = ConnectOptions::new(url.to_owned());
        options.sqlx_logging(false);
        let db = Database::connect(options).await?;
        let index = Self { db };
        index.ensure_schema().await?;
        Ok(index)
    }

    async fn ensure_schema(&self) -> anyhow::Result<()> {
        let backend = self.db.get_database_backend();
        let builder = backend.build(
            Table::create()
                .table(ContentEntity)
                .if_not_exists()
                .col(ColumnDef::new(Column::Key).string().not_null().primary_key())
                .col(ColumnDef::new(Column::ContentType).string().not_null())
                .col(ColumnDef::new(Column::Encoding).string().not_null())
                .col(ColumnDef::new(Column::Expiry).big_integer().not_null())
                .col(ColumnDef::new(Column::LastModified).big_integer().not_null())
                .col(ColumnDef::new(Column::Modifiable).boolean().not_null())
                .col(ColumnDef::new(Column::AuthKey).string())
                .col(ColumnDef::new(Column::BackendId).string().not_null())
                .col(ColumnDef::new(Column::ContentLength).big_integer().not_null()),
        );
        self.db.execute(builder).await?;
        Ok(())
    }

    pub async fn put(&self, content: &Content) -> anyhow::Result<()> {
        let timer = Timer::new();
        let model = content_to_active_model(content);
        ContentEntity::insert(model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(Column::Key)
                    .update_columns([
                        Column::ContentType,
                        Column::Encoding,
                        Column::Expiry,
                        Column::LastModified,
                        Column::Modifiable,
                        Column::AuthKey,
                        Column::BackendId,
                        Column::ContentLength,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await
            .map_err(|e| {
                crate::metrics::counter("bytebin_index_errors_total", 1);
                e
            })?;
        crate::metrics::histogram("bytebin_index_put_seconds", timer.elapsed());
        Ok(())
    }

    pub async fn put_all(&self, items: &[Content]) -> anyhow::Result<()> {
        for item in items {
            self.put(item).await?;
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<Content>> {
        let timer = Timer::new();
        let result = ContentEntity::find_by_id(key.to_string())
            .one(&self.db)
            .await
            .map_err(|e| {
                crate::metrics::counter("bytebin_index_errors_total", 1);
                e
            })?;
        crate::metrics::histogram("bytebin_index_get_seconds", timer.elapsed());
        Ok(result.map(model_to_content))
    }

    pub async fn remove(&self, key: &str) -> anyhow::Result<()> {
        let timer = Timer::new();
        ContentEntity::delete_by_id(key.to_string())
            .exec(&self.db)
            .await
            .map_err(|e| {
                crate::metrics::counter("bytebin_index_errors_total", 1);
                e
            })?;
        crate::metrics::histogram("bytebin_index_remove_seconds", timer.elapsed());
        Ok(())
    }

    /// Rows with a finite expiry strictly before `now`.
    pub async fn get_expired(&self, now: chrono::DateTime<chrono::Utc>) -> anyhow::Result<Vec<Content>> {
        let models = ContentEntity::find()
            .filter(Column::Expiry.gte(0))
            .filter(Column::Expiry.lt(now.timestamp_millis()))
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(model_to_content).collect())
    }

    /// `count(*)` and `sum(content_length)` grouped by `(content_type, backend_id)`.
    pub async fn group_by_content_type_and_backend(&self) -> anyhow::Result<Vec<GroupStats>> {
        use sea_orm::{FromQueryResult, Statement};

        #[derive(Debug, FromQueryResult)]
        struct Row {
            content_type: String,
            backend_id: String,
            count: i64,
            total_bytes: i64,
        }

        let backend = self.db.get_database_backend();
        let stmt = Statement::from_string(
            backend,
            "SELECT content_type, backend_id, COUNT(*) AS count, \
             COALESCE(SUM(content_length), 0) AS total_bytes \
             FROM content GROUP BY content_type, backend_id ORDER BY content_type"
                .to_owned(),
        );

        let rows = Row::find_by_statement(stmt).all(&self.db).await?;

        Ok(rows
            .into_iter()
            .map(|r| GroupStats {
                content_type: r.content_type,
                backend_id: r.backend_id,
                count: r.count.max(0) as u64,
                total_bytes: r.total_bytes.max(0) as u64,
            })
            .collect())
    }

    /// Rebuilds the index from scratch by listing every backend. Used on
    /// startup when the index file is empty/missing.
    pub async fn rebuild_from_backends(
        &self,
        backends: &[std::sync::Arc<dyn StorageBackend>],
    ) -> anyhow::Result<()> {
        for backend in backends {
            let mut stream = backend.list().await?;
            let mut batch = Vec::new();
            while let Some(content) = stream.try_next().await? {
                batch.push(content);
                if batch.len() >= 500 {
                    self.put_all(&batch).await?;
                    batch.clear();
                }
            }
            if !batch.is_empty() {
                self.put_all(&batch).await?;
            }
        }
        Ok(())
    }

    pub async fn is_empty(&self) -> anyhow::Result<bool> {
        Ok(ContentEntity::find().one(&self.db).await?.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::Expiry;

    fn sample(key: &str, expiry: Expiry) -> Content {
        Content::new(key.into(), "text/plain".into(), vec![], expiry, false, None, b"x".to_vec())
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let index = ContentIndex::connect("sqlite::memory:").await.unwrap();
        let mut content = sample("abc1234", Expiry::Never);
        content.backend_id = "local".into();
        index.put(&content).await.unwrap();

        let loaded = index.get("abc1234").await.unwrap().unwrap();
        assert_eq!(loaded.key, "abc1234");
        assert_eq!(loaded.backend_id, "local");
    }

    #[tokio::test]
    async fn remove_deletes_the_row() {
        let index = ContentIndex::connect("sqlite::memory:").await.unwrap();
        let content = sample("abc1234", Expiry::Never);
        index.put(&content).await.unwrap();
        index.remove("abc1234").await.unwrap();
        assert!(index.get("abc1234").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_expired_only_returns_past_finite_expiries() {
        let index = ContentIndex::connect("sqlite::memory:").await.unwrap();
        let now = chrono::Utc::now();
        index.put(&sample("expired1", Expiry::At(now - chrono::Duration::minutes(5)))).await.unwrap();
        index.put(&sample("future01", Expiry::At(now + chrono::Duration::minutes(5)))).await.unwrap();
        index.put(&sample("forever1", Expiry::Never)).await.unwrap();

        let expired = index.get_expired(now).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].key, "expired1");
    }
}
