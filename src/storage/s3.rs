//! S3-compatible object storage backend.
//!
//! One object per key. All `Content` fields other than the bytes are stored
//! as object metadata, mirroring spec.md §4.6:
//! `bytebin-version`, `-contenttype`, `-expiry`, `-lastmodified`,
//! `-modifiable`, `-authkey` (when modifiable), `-encoding`.

use async_trait::async_trait;
use aws_sdk_s3::model::Object;
use aws_sdk_s3::output::GetObjectOutput;
use aws_sdk_s3::types::ByteStream;
use aws_sdk_s3::Client;
use futures::stream;

use crate::content::Content;
use crate::expiry::Expiry;

use super::{BackendResult, ContentStream, KeyStream, StorageBackend};

const META_VERSION: &str = "bytebin-version";
const META_CONTENT_TYPE: &str = "bytebin-contenttype";
const META_EXPIRY: &str = "bytebin-expiry";
const META_LAST_MODIFIED: &str = "bytebin-lastmodified";
const META_MODIFIABLE: &str = "bytebin-modifiable";
const META_AUTH_KEY: &str = "bytebin-authkey";
const META_ENCODING: &str = "bytebin-encoding";

const CURRENT_VERSION: &str = "2";

pub struct S3Storage {
    id: String,
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(id: impl Into<String>, client: Client, bucket: impl Into<String>) -> Self {
        Self { id: id.into(), client, bucket: bucket.into() }
    }

    fn metadata_for(&self, content: &Content) -> std::collections::HashMap<String, String> {
        let mut meta = std::collections::HashMap::new();
        meta.insert(META_VERSION.to_string(), CURRENT_VERSION.to_string());
        meta.insert(META_CONTENT_TYPE.to_string(), content.content_type.clone());
        meta.insert(META_EXPIRY.to_string(), content.expiry.to_millis().to_string());
        meta.insert(
            META_LAST_MODIFIED.to_string(),
            content.last_modified.timestamp_millis().to_string(),
        );
        meta.insert(META_MODIFIABLE.to_string(), content.modifiable.to_string());
        if let Some(auth_key) = &content.auth_key {
            meta.insert(META_AUTH_KEY.to_string(), auth_key.clone());
        }
        meta.insert(META_ENCODING.to_string(), content.encoding.join(","));
        meta
    }

    fn content_from_metadata(
        &self,
        key: &str,
        meta: &std::collections::HashMap<String, String>,
        content_length: u64,
        body: Option<Vec<u8>>,
    ) -> anyhow::Result<Content> {
        let content_type = meta
            .get(META_CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let expiry = meta
            .get(META_EXPIRY)
            .and_then(|v| v.parse::<i64>().ok())
            .map(Expiry::from_millis)
            .unwrap_or(Expiry::Never);
        let last_modified = meta
            .get(META_LAST_MODIFIED)
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(chrono::DateTime::from_timestamp_millis)
            .unwrap_or_else(chrono::Utc::now);
        let modifiable = meta
            .get(META_MODIFIABLE)
            .map(|v| v == "true")
            .unwrap_or(false);
        let auth_key = meta.get(META_AUTH_KEY).cloned();
        let encoding = meta
            .get(META_ENCODING)
            .map(|v| {
                if v.is_empty() {
                    Vec::new()
                } else {
                    v.split(',').map(|s| s.to_string()).collect()
                }
            })
            .unwrap_or_default();

        Ok(Content {
            key: key.to_string(),
            content_type,
            encoding,
            expiry,
            last_modified,
            modifiable,
            auth_key,
            backend_id: self.id.clone(),
            content_length,
            content: body,
            ..Content::new(key.to_string(), String::new(), vec![], Expiry::Never, false, None, vec![])
        })
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn backend_id(&self) -> &str {
        &self.id
    }

    async fn load(&self, key: &str) -> BackendResult<Option<Content>> {
        let output: GetObjectOutput = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(output) => output,
            Err(aws_sdk_s3::types::SdkError::ServiceError(e))
                if e.err().is_no_such_key() =>
            {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = output.metadata().cloned().unwrap_or_default();
        let content_length = output.content_length().max(0) as u64;
        let body = output.body.collect().await?.into_bytes().to_vec();

        Ok(Some(self.content_from_metadata(key, &metadata, content_length, Some(body))?))
    }

    async fn save(&self, content: &Content) -> BackendResult<()> {
        let body = content.content.clone().unwrap_or_default();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&content.key)
            .set_metadata(Some(self.metadata_for(content)))
            .body(ByteStream::from(body))
            .send()
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    async fn list(&self) -> BackendResult<ContentStream> {
        let objects = self.list_objects().await?;
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let id = self.id.clone();

        let stream = stream::iter(objects).then(move |obj: Object| {
            let client = client.clone();
            let bucket = bucket.clone();
            let id = id.clone();
            async move {
                let key = obj.key().unwrap_or_default().to_string();
                let head = client.head_object().bucket(&bucket).key(&key).send().await?;
                let metadata = head.metadata().cloned().unwrap_or_default();
                let content_length = head.content_length().max(0) as u64;
                let backend = S3Storage { id, client, bucket };
                backend.content_from_metadata(&key, &metadata, content_length, None)
            }
        });

        Ok(Box::pin(stream))
    }

    async fn list_keys(&self) -> BackendResult<KeyStream> {
        let objects = self.list_objects().await?;
        let keys: Vec<_> = objects
            .into_iter()
            .map(|o| Ok(o.key().unwrap_or_default().to_string()))
            .collect();
        Ok(Box::pin(stream::iter(keys)))
    }
}

impl S3Storage {
    /// Paginates through every object in the bucket.
    async fn list_objects(&self) -> anyhow::Result<Vec<Object>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }
            let output = request.send().await?;
            objects.extend(output.contents().unwrap_or_default().iter().cloned());

            if output.is_truncated() {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(objects)
    }
}
