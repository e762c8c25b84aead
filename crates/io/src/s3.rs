use std::sync::{Arc, LazyLock};

use aws_config::{
    AppName, BehaviorVersion, SdkConfig, retry::RetryConfig, timeout::TimeoutConfig,
};
use aws_sdk_s3::config::{
    IdentityCache, SharedAsyncSleep, SharedCredentialsProvider, SharedHttpClient,
    SharedIdentityCache,
};
use aws_smithy_async::{
    rt::sleep::{self, TokioSleep},
    time::SharedTimeSource,
};
use veil::Redact;

mod s3_storage;
pub use s3_storage::S3Storage;

static IDENTITY_CACHE: LazyLock<SharedIdentityCache> =
    LazyLock::new(|| IdentityCache::lazy().build());
static SMITHY_HTTP_CLIENT: LazyLock<SharedHttpClient> = LazyLock::new(|| {
    aws_smithy_http_client::Builder::new()
        .tls_provider(aws_smithy_http_client::tls::Provider::Rustls(
            aws_smithy_http_client::tls::rustls_provider::CryptoMode::AwsLc,
        ))
        .build_https()
});

static RETRY_CONFIG: LazyLock<RetryConfig> = LazyLock::new(RetryConfig::adaptive);
static TIMEOUT_CONFIG: LazyLock<TimeoutConfig> = LazyLock::new(|| TimeoutConfig::builder().build());
static TIME_SOURCE: LazyLock<SharedTimeSource> = LazyLock::new(SharedTimeSource::default);
static TOKIO_SLEEP: LazyLock<Arc<dyn sleep::AsyncSleep>> =
    LazyLock::new(|| Arc::new(TokioSleep::new()) as Arc<dyn sleep::AsyncSleep>);
static SLEEP_IMPL: LazyLock<SharedAsyncSleep> =
    LazyLock::new(|| SharedAsyncSleep::from(TOKIO_SLEEP.clone()));

/// Macro to apply common AWS configuration to any builder that supports these methods
macro_rules! apply_aws_config {
    ($builder:expr, $region:expr) => {
        $builder
            .region($region)
            .retry_config(RETRY_CONFIG.clone())
            .timeout_config(TIMEOUT_CONFIG.clone())
            .time_source(TIME_SOURCE.clone())
            .sleep_impl(SLEEP_IMPL.clone())
            .behavior_version(BehaviorVersion::latest())
            .http_client((*SMITHY_HTTP_CLIENT).clone())
            .identity_cache(IDENTITY_CACHE.clone())
            .app_name(AppName::new("galleria").unwrap())
    };
}

#[derive(Redact, Hash, Clone, PartialEq, Eq, typed_builder::TypedBuilder)]
pub struct S3AccessKeyAuth {
    pub access_key_id: String,
    #[redact(partial)]
    pub secret_access_key: String,
}

/// Connection settings for one S3-compatible bucket.
///
/// All media for a deployment lives in a single bucket; objects are
/// namespaced by key prefix, not by bucket.
#[derive(Debug, Eq, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct S3Settings {
    pub bucket: String,
    pub region: String,
    #[builder(default)]
    pub endpoint: Option<url::Url>,
    /// MinIO and most other self-hosted stores need path-style access.
    #[builder(default)]
    pub path_style_access: Option<bool>,
}

impl S3Settings {
    pub async fn get_storage_client(&self, credential: Option<&S3AccessKeyAuth>) -> S3Storage {
        let sdk_config = self.get_sdk_config(credential).await;
        let s3_config: aws_sdk_s3::config::Config = (&sdk_config).into();
        let mut s3_builder = s3_config.to_builder();

        if self.path_style_access.unwrap_or(false) {
            s3_builder.set_force_path_style(Some(true));
        }

        let client = aws_sdk_s3::Client::from_conf(s3_builder.build());
        S3Storage::new(client, self.bucket.clone())
    }

    pub async fn get_sdk_config(&self, credential: Option<&S3AccessKeyAuth>) -> SdkConfig {
        let S3Settings {
            bucket: _,
            region,
            endpoint,
            path_style_access: _,
        } = self;

        let region = aws_config::Region::new(region.clone());

        match credential {
            Some(S3AccessKeyAuth {
                access_key_id,
                secret_access_key,
            }) => {
                let aws_credentials = aws_credential_types::Credentials::new(
                    access_key_id,
                    secret_access_key,
                    None,
                    None,
                    "galleria-storage-settings",
                );
                let credential_provider = SharedCredentialsProvider::new(aws_credentials);

                let mut builder = apply_aws_config!(SdkConfig::builder(), region)
                    .credentials_provider(credential_provider);
                if let Some(endpoint) = endpoint {
                    builder = builder.endpoint_url(endpoint.to_string());
                }
                builder.build()
            }
            None => {
                let mut builder = apply_aws_config!(aws_config::from_env(), region);
                if let Some(endpoint) = endpoint {
                    builder = builder.endpoint_url(endpoint.to_string());
                }
                builder.load().await
            }
        }
    }
}

/// Validate the S3 region.
///
/// # Errors
/// If the region is longer than 128 characters, an error is returned.
pub fn validate_region(region: &str) -> Result<(), String> {
    if region.len() > 128 {
        return Err("`region` must be less than 128 characters.".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_key_auth_is_redacted_in_debug_output() {
        let auth = S3AccessKeyAuth::builder()
            .access_key_id("AKIAEXAMPLE".to_string())
            .secret_access_key("super-secret-value".to_string())
            .build();
        let debug = format!("{auth:?}");
        assert!(!debug.contains("super-secret-value"));
    }

    #[test]
    fn region_validation() {
        assert!(validate_region("eu-central-1").is_ok());
        assert!(validate_region(&"x".repeat(200)).is_err());
    }
}
