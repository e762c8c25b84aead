use std::time::Duration;

use aws_sdk_s3::{
    presigning::PresigningConfig,
    primitives::ByteStream,
    types::{CompletedMultipartUpload, Delete, ObjectIdentifier},
};
use bytes::Bytes;

use crate::{
    CompletedPart, ListPage, MultipartUpload, ObjectInfo, ObjectKey, ObjectStorage, ObjectTags,
    StorageError,
};

/// S3 deletes at most 1000 keys per `DeleteObjects` call.
const DELETE_BATCH_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn encode_tags(tags: &ObjectTags) -> Option<String> {
        if tags.is_empty() {
            return None;
        }
        let encoded = tags
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        Some(encoded)
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3Storage {
    async fn put(
        &self,
        key: &ObjectKey,
        bytes: Bytes,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .body(ByteStream::from(bytes));
        if let Some(tagging) = Self::encode_tags(tags) {
            request = request.tagging(tagging);
        }
        request
            .send()
            .await
            .map_err(|e| StorageError::backend("put_object", key, e))?;
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Bytes, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::NotFound { key: key.clone() }
                } else {
                    StorageError::backend("get_object", key, service_error)
                }
            })?;
        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::backend("get_object", key, e))?;
        Ok(bytes.into_bytes())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StorageError> {
        // S3 returns success for absent keys, which matches the trait contract.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(|e| StorageError::backend("delete_object", key, e))?;
        Ok(())
    }

    async fn delete_batch(&self, keys: &[ObjectKey]) -> Result<(), StorageError> {
        for chunk in keys.chunks(DELETE_BATCH_LIMIT) {
            let identifiers = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key.as_str())
                        .build()
                        .map_err(|e| StorageError::backend("delete_objects", key, e))
                })
                .collect::<Result<Vec<_>, _>>()?;
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::backend_list("delete_objects", e))?;
            let response = self
                .client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::backend_list("delete_objects", e))?;
            for error in response.errors() {
                tracing::warn!(
                    key = error.key().unwrap_or("<unknown>"),
                    code = error.code().unwrap_or("<unknown>"),
                    "S3 rejected one key inside a batch delete"
                );
            }
        }
        Ok(())
    }

    async fn list(
        &self,
        continuation: Option<String>,
        page_size: i32,
    ) -> Result<ListPage, StorageError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(page_size)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| StorageError::backend_list("list_objects_v2", e))?;

        let mut objects = Vec::with_capacity(response.contents().len());
        for object in response.contents() {
            let Some(key) = object.key() else { continue };
            let Ok(key) = ObjectKey::new(key) else {
                tracing::warn!(key, "skipping unparseable key in bucket listing");
                continue;
            };
            let last_modified = object
                .last_modified()
                .and_then(|dt| {
                    chrono::DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
                })
                .unwrap_or_default();
            objects.push(ObjectInfo {
                key,
                size_bytes: object.size().unwrap_or(0).try_into().unwrap_or(0),
                last_modified,
            });
        }

        Ok(ListPage {
            objects,
            next_token: response.next_continuation_token().map(ToOwned::to_owned),
        })
    }

    async fn initiate_multipart(
        &self,
        key: &ObjectKey,
        content_type: &str,
        tags: &ObjectTags,
    ) -> Result<MultipartUpload, StorageError> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type);
        if let Some(tagging) = Self::encode_tags(tags) {
            request = request.tagging(tagging);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StorageError::backend("create_multipart_upload", key, e))?;
        let upload_id = response.upload_id().ok_or_else(|| {
            StorageError::backend(
                "create_multipart_upload",
                key,
                std::io::Error::other("S3 returned no upload id"),
            )
        })?;
        Ok(MultipartUpload {
            key: key.clone(),
            upload_id: upload_id.to_string(),
        })
    }

    async fn presign_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<url::Url, StorageError> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| StorageError::backend("presign_part", &upload.key, e))?;
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(upload.key.as_str())
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .presigned(config)
            .await
            .map_err(|e| StorageError::backend("presign_part", &upload.key, e))?;
        url::Url::parse(presigned.uri())
            .map_err(|e| StorageError::backend("presign_part", &upload.key, e))
    }

    async fn upload_part(
        &self,
        upload: &MultipartUpload,
        part_number: i32,
        bytes: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(upload.key.as_str())
            .upload_id(&upload.upload_id)
            .part_number(part_number)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::backend("upload_part", &upload.key, e))?;
        let etag = response.e_tag().ok_or_else(|| {
            StorageError::backend(
                "upload_part",
                &upload.key,
                std::io::Error::other("S3 returned no ETag for uploaded part"),
            )
        })?;
        Ok(CompletedPart {
            part_number,
            etag: etag.to_string(),
        })
    }

    async fn complete_multipart(
        &self,
        upload: &MultipartUpload,
        parts: &[CompletedPart],
    ) -> Result<(), StorageError> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                aws_sdk_s3::types::CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(&part.etag)
                    .build()
            })
            .collect::<Vec<_>>();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(upload.key.as_str())
            .upload_id(&upload.upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::backend("complete_multipart_upload", &upload.key, e))?;
        Ok(())
    }

    async fn abort_multipart(&self, upload: &MultipartUpload) -> Result<(), StorageError> {
        let result = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(upload.key.as_str())
            .upload_id(&upload.upload_id)
            .send()
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_error = e.into_service_error();
                // A second abort for the same upload id must stay a no-op.
                if service_error.is_no_such_upload() {
                    Ok(())
                } else {
                    Err(StorageError::backend(
                        "abort_multipart_upload",
                        &upload.key,
                        service_error,
                    ))
                }
            }
        }
    }
}
