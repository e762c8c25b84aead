//! Multipart upload path for large assets.
//!
//! Parts have a fixed size and a bounded number of them is in flight at any
//! time. Whatever goes wrong after initiation, the upload is aborted so the
//! backend does not accumulate invisible part garbage.

use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use galleria_io::{
    CompletedPart, MultipartUpload, ObjectKey, ObjectStorage, ObjectTags, StorageError,
};
use tokio_util::sync::CancellationToken;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum MultipartError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("multipart upload canceled")]
    Canceled,
}

/// Uploads `bytes` to `key` in parts of `part_bytes`, with at most
/// `max_concurrency` part uploads in flight.
///
/// On any failure, including cancellation, the initiated upload is aborted
/// before the error is returned. Abort failures are logged; the original
/// error wins.
pub(crate) async fn upload_multipart(
    storage: &dyn ObjectStorage,
    key: &ObjectKey,
    bytes: Bytes,
    content_type: &str,
    tags: &ObjectTags,
    part_bytes: u64,
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> Result<(), MultipartError> {
    let upload = storage.initiate_multipart(key, content_type, tags).await?;

    let result = upload_parts(storage, &upload, bytes, part_bytes, max_concurrency, cancel).await;
    let parts = match result {
        Ok(parts) => parts,
        Err(e) => {
            abort_quietly(storage, &upload).await;
            return Err(e);
        }
    };

    if let Err(e) = storage.complete_multipart(&upload, &parts).await {
        abort_quietly(storage, &upload).await;
        return Err(e.into());
    }
    Ok(())
}

async fn upload_parts(
    storage: &dyn ObjectStorage,
    upload: &MultipartUpload,
    bytes: Bytes,
    part_bytes: u64,
    max_concurrency: usize,
    cancel: &CancellationToken,
) -> Result<Vec<CompletedPart>, MultipartError> {
    let chunks = chunk(&bytes, part_bytes);
    let uploads = futures::stream::iter(chunks.into_iter().map(|(part_number, chunk)| async move {
        storage.upload_part(upload, part_number, chunk).await
    }))
    .buffered(max_concurrency.max(1))
    .try_collect::<Vec<_>>();

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(MultipartError::Canceled),
        parts = uploads => Ok(parts?),
    }
}

async fn abort_quietly(storage: &dyn ObjectStorage, upload: &MultipartUpload) {
    if let Err(e) = storage.abort_multipart(upload).await {
        tracing::error!(
            key = %upload.key,
            upload_id = %upload.upload_id,
            error = %e,
            "Failed to abort multipart upload, parts may linger"
        );
    }
}

/// Splits into fixed-size parts numbered from 1. Slicing is zero-copy.
fn chunk(bytes: &Bytes, part_bytes: u64) -> Vec<(i32, Bytes)> {
    let part_bytes = usize::try_from(part_bytes).unwrap_or(usize::MAX).max(1);
    let mut parts = Vec::with_capacity(bytes.len().div_ceil(part_bytes));
    let mut offset = 0;
    let mut part_number = 1;
    while offset < bytes.len() {
        let end = usize::min(offset + part_bytes, bytes.len());
        parts.push((part_number, bytes.slice(offset..end)));
        offset = end;
        part_number += 1;
    }
    parts
}

/// Presigns upload URLs for `part_count` parts, issuing at most
/// `batch_size` presign calls per round trip.
pub async fn presign_upload_parts(
    storage: &dyn ObjectStorage,
    upload: &MultipartUpload,
    part_count: usize,
    batch_size: usize,
    expires_in: Duration,
) -> Result<Vec<Url>, StorageError> {
    let mut urls = Vec::with_capacity(part_count);
    let part_numbers: Vec<i32> = (1..=part_count)
        .map(|n| i32::try_from(n).unwrap_or(i32::MAX))
        .collect();
    for batch in part_numbers.chunks(batch_size.max(1)) {
        let batch_urls = futures::future::try_join_all(
            batch
                .iter()
                .map(|part_number| storage.presign_part(upload, *part_number, expires_in)),
        )
        .await?;
        urls.extend(batch_urls);
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use galleria_io::memory::MemoryStorage;

    use super::*;

    fn payload(len: usize) -> Bytes {
        Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
    }

    #[test]
    fn chunking_is_exact_and_one_based() {
        let parts = chunk(&payload(25), 10);
        assert_eq!(
            parts.iter().map(|(n, c)| (*n, c.len())).collect::<Vec<_>>(),
            vec![(1, 10), (2, 10), (3, 5)]
        );
    }

    #[tokio::test]
    async fn assembles_all_parts_in_order() {
        let storage = MemoryStorage::new();
        let key = ObjectKey::new("media/big.bin").unwrap();
        let bytes = payload(35);
        upload_multipart(
            &storage,
            &key,
            bytes.clone(),
            "application/octet-stream",
            &ObjectTags::new(),
            10,
            4,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(storage.get(&key).await.unwrap(), bytes);
        assert_eq!(
            storage.counters().abort_multipart.load(Ordering::Relaxed),
            0
        );
    }

    #[tokio::test]
    async fn cancellation_aborts_the_upload() {
        let storage = MemoryStorage::new();
        let key = ObjectKey::new("media/canceled.bin").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = upload_multipart(
            &storage,
            &key,
            payload(35),
            "application/octet-stream",
            &ObjectTags::new(),
            10,
            4,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MultipartError::Canceled));
        assert_eq!(
            storage.counters().abort_multipart.load(Ordering::Relaxed),
            1
        );
        assert!(storage.get(&key).await.is_err());
    }

    #[tokio::test]
    async fn presigning_respects_the_batch_limit() {
        let storage = MemoryStorage::new();
        let key = ObjectKey::new("media/presigned.bin").unwrap();
        let upload = storage
            .initiate_multipart(&key, "video/mp4", &ObjectTags::new())
            .await
            .unwrap();
        let urls = presign_upload_parts(&storage, &upload, 230, 100, Duration::from_secs(900))
            .await
            .unwrap();
        assert_eq!(urls.len(), 230);
    }
}
