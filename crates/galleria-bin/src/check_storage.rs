use galleria::{io::ObjectStorage, tracing};
use galleria_io::s3::{S3AccessKeyAuth, S3Settings};

use crate::CONFIG_BIN;

/// Connects to the configured bucket and lists one page of objects, so a
/// deployment can verify credentials and connectivity before going live.
pub(crate) async fn check_storage() -> anyhow::Result<()> {
    let s3 = &CONFIG_BIN.s3;
    anyhow::ensure!(!s3.bucket.is_empty(), "GALLERIA__S3__BUCKET is not set");
    anyhow::ensure!(!s3.region.is_empty(), "GALLERIA__S3__REGION is not set");
    galleria_io::s3::validate_region(&s3.region).map_err(|e| anyhow::anyhow!(e))?;

    let settings = S3Settings::builder()
        .bucket(s3.bucket.clone())
        .region(s3.region.clone())
        .endpoint(s3.endpoint.clone())
        .path_style_access(s3.path_style_access)
        .build();
    let credential = match (&s3.access_key_id, &s3.secret_access_key) {
        (Some(access_key_id), Some(secret_access_key)) => Some(
            S3AccessKeyAuth::builder()
                .access_key_id(access_key_id.clone())
                .secret_access_key(secret_access_key.clone())
                .build(),
        ),
        (None, None) => None,
        _ => anyhow::bail!(
            "S3 access key id and secret access key must be set together or not at all"
        ),
    };

    let storage = settings.get_storage_client(credential.as_ref()).await;
    let page = storage.list(None, 10).await?;
    tracing::info!(
        bucket = %s3.bucket,
        objects = page.objects.len(),
        truncated = page.next_token.is_some(),
        "Storage reachable"
    );
    println!(
        "Bucket `{}` reachable, first page holds {} object(s).",
        s3.bucket,
        page.objects.len()
    );
    Ok(())
}
