//! S3 backend for state storage

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketVersioningStatus, PublicAccessBlockConfiguration, ServerSideEncryption,
    VersioningConfiguration,
};

use crate::backend::{BackendConfig, BackendError, BackendResult, StateBackend};
use crate::lock::LockInfo;
use crate::state::StateFile;

/// S3-based state backend
///
/// The lock is a sibling object written with `If-None-Match: *`, so only one
/// writer can create it. Replacing or deleting it is conditioned on the ETag
/// read just before, so only the lock that was checked is ever touched.
pub struct S3Backend {
    client: Client,
    bucket: String,
    /// Object key for the state file
    key: String,
    region: String,
    /// Whether to encrypt objects at rest (default: true)
    encrypt: bool,
    /// Whether `init` may create a missing bucket (default: false)
    auto_create: bool,
}

impl S3Backend {
    /// Create a new S3Backend from configuration
    ///
    /// `access_key` and `secret_key` attributes, when both present, take
    /// precedence over the default credential chain.
    pub async fn from_config(config: &BackendConfig) -> BackendResult<Self> {
        let bucket = config.require_string("bucket")?.to_string();
        let key = config.require_string("key")?.to_string();
        let region = config.require_string("region")?.to_string();

        let encrypt = config.get_bool_or("encrypt", true);
        let auto_create = config.get_bool_or("auto_create", false);

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.clone()));

        match (config.get_string("access_key"), config.get_string("secret_key")) {
            (Some(access_key), Some(secret_key)) => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key, secret_key, None, None, "strata",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(BackendError::configuration(
                    "access_key and secret_key must be given together",
                ));
            }
        }

        let client = Client::new(&loader.load().await);

        Ok(Self {
            client,
            bucket,
            key,
            region,
            encrypt,
            auto_create,
        })
    }

    fn lock_key(&self) -> String {
        lock_key_for(&self.key)
    }

    async fn read_lock(&self) -> BackendResult<Option<LockInfo>> {
        Ok(self.read_lock_tagged().await?.map(|(lock, _)| lock))
    }

    /// The lock along with the ETag of the object it was read from
    async fn read_lock_tagged(&self) -> BackendResult<Option<(LockInfo, String)>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.lock_key())
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag = output
                    .e_tag()
                    .map(str::to_string)
                    .ok_or_else(|| BackendError::Aws("Lock object has no ETag".to_string()))?;
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| BackendError::Io(e.to_string()))?;
                let lock: LockInfo = serde_json::from_slice(&body.into_bytes())
                    .map_err(|e| BackendError::Serialization(e.to_string()))?;
                Ok(Some((lock, etag)))
            }
            Err(err) if is_status(&err, 404) => Ok(None),
            Err(err) => Err(BackendError::Aws(err.to_string())),
        }
    }

    /// Conditionally create the lock object
    ///
    /// Returns `false` when the object already exists.
    async fn try_create_lock(&self, lock: &LockInfo) -> BackendResult<bool> {
        let body = serde_json::to_vec_pretty(lock)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.lock_key())
            .if_none_match("*")
            .body(ByteStream::from(body))
            .content_type("application/json");

        if self.encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        match request.send().await {
            Ok(_) => Ok(true),
            // 412: object exists, 409: a concurrent conditional write won
            Err(err) if is_status(&err, 412) || is_status(&err, 409) => Ok(false),
            Err(err) => Err(BackendError::Aws(err.to_string())),
        }
    }

    /// Overwrite the lock object only if it still carries `etag`
    ///
    /// Returns `false` when the object changed since it was read.
    async fn replace_lock(&self, lock: &LockInfo, etag: &str) -> BackendResult<bool> {
        let body = serde_json::to_vec_pretty(lock)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.lock_key())
            .if_match(etag)
            .body(ByteStream::from(body))
            .content_type("application/json");

        if self.encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        match request.send().await {
            Ok(_) => Ok(true),
            // 404: deleted meanwhile
            Err(err) if is_status(&err, 412) || is_status(&err, 409) || is_status(&err, 404) => {
                Ok(false)
            }
            Err(err) => Err(BackendError::Aws(err.to_string())),
        }
    }

    /// Delete the lock if its id is `lock_id` and it is unchanged since read
    async fn delete_lock_if(&self, lock_id: &str) -> BackendResult<()> {
        let (existing, etag) = match self.read_lock_tagged().await? {
            Some(tagged) => tagged,
            None => return Err(BackendError::LockNotFound(lock_id.to_string())),
        };
        if existing.id != lock_id {
            return Err(BackendError::LockMismatch {
                expected: lock_id.to_string(),
                actual: existing.id,
            });
        }

        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.lock_key())
            .if_match(etag)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            // Replaced between our read and our delete
            Err(err) if is_status(&err, 412) => match self.read_lock().await? {
                Some(current) => Err(BackendError::LockMismatch {
                    expected: lock_id.to_string(),
                    actual: current.id,
                }),
                None => Err(BackendError::LockNotFound(lock_id.to_string())),
            },
            Err(err) if is_status(&err, 404) => Err(BackendError::LockNotFound(lock_id.to_string())),
            Err(err) => Err(BackendError::Aws(err.to_string())),
        }
    }

    async fn bucket_exists(&self) -> BackendResult<bool> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(true),
            Err(err) if err.as_service_error().is_some() || is_status(&err, 404) => Ok(false),
            Err(err) => Err(BackendError::Aws(err.to_string())),
        }
    }

    /// Create the state bucket with versioning on and public access blocked
    async fn create_bucket(&self) -> BackendResult<()> {
        let mut create_request = self.client.create_bucket().bucket(&self.bucket);

        if self.region != "us-east-1" {
            use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};

            let config = CreateBucketConfiguration::builder()
                .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                .build();
            create_request = create_request.create_bucket_configuration(config);
        }

        create_request
            .send()
            .await
            .map_err(|e| BackendError::Aws(format!("Failed to create bucket: {}", e)))?;

        let versioning_config = VersioningConfiguration::builder()
            .status(BucketVersioningStatus::Enabled)
            .build();

        self.client
            .put_bucket_versioning()
            .bucket(&self.bucket)
            .versioning_configuration(versioning_config)
            .send()
            .await
            .map_err(|e| BackendError::Aws(format!("Failed to enable versioning: {}", e)))?;

        let public_access_block = PublicAccessBlockConfiguration::builder()
            .block_public_acls(true)
            .block_public_policy(true)
            .ignore_public_acls(true)
            .restrict_public_buckets(true)
            .build();

        self.client
            .put_public_access_block()
            .bucket(&self.bucket)
            .public_access_block_configuration(public_access_block)
            .send()
            .await
            .map_err(|e| BackendError::Aws(format!("Failed to block public access: {}", e)))?;

        Ok(())
    }

}

#[async_trait]
impl StateBackend for S3Backend {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn read_state(&self) -> BackendResult<Option<StateFile>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| BackendError::Io(e.to_string()))?;
                StateFile::from_json(&body.into_bytes())
                    .map(Some)
                    .map_err(BackendError::InvalidState)
            }
            Err(err) if is_status(&err, 404) => Ok(None),
            Err(err) => Err(BackendError::Aws(err.to_string())),
        }
    }

    async fn write_state(&self, state: &StateFile) -> BackendResult<()> {
        let body = serde_json::to_vec_pretty(state)
            .map_err(|e| BackendError::Serialization(e.to_string()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(body))
            .content_type("application/json");

        if self.encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        request
            .send()
            .await
            .map_err(|e| BackendError::Aws(e.to_string()))?;

        Ok(())
    }

    async fn remove_state(&self) -> BackendResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| BackendError::Aws(e.to_string()))?;

        Ok(())
    }

    async fn acquire_lock(&self, operation: &str) -> BackendResult<LockInfo> {
        let lock = LockInfo::new(operation);
        if self.try_create_lock(&lock).await? {
            return Ok(lock);
        }

        match self.read_lock_tagged().await? {
            Some((existing, etag)) if existing.is_expired() => {
                if !self.replace_lock(&lock, &etag).await? {
                    return Err(self.read_lock().await?.map_or_else(
                        BackendError::locked_by_unknown,
                        |current| BackendError::locked(&current),
                    ));
                }
                log::warn!(
                    "Took over expired lock {} held by {}",
                    existing.id,
                    existing.who
                );
                Ok(lock)
            }
            Some((existing, _)) => Err(BackendError::locked(&existing)),
            // Released between our write and our read
            None => Err(BackendError::locked_by_unknown()),
        }
    }

    async fn release_lock(&self, lock: &LockInfo) -> BackendResult<()> {
        self.delete_lock_if(&lock.id).await
    }

    async fn force_unlock(&self, lock_id: &str) -> BackendResult<()> {
        self.delete_lock_if(lock_id).await
    }

    async fn current_lock(&self) -> BackendResult<Option<LockInfo>> {
        self.read_lock().await
    }

    async fn init(&self) -> BackendResult<()> {
        if !self.bucket_exists().await? {
            if self.auto_create {
                log::info!("Creating state bucket {}", self.bucket);
                self.create_bucket().await?;
            } else {
                return Err(BackendError::BucketNotFound(self.bucket.clone()));
            }
        }

        if self.read_state().await?.is_none() {
            self.write_state(&StateFile::new()).await?;
        }

        Ok(())
    }
}

fn lock_key_for(key: &str) -> String {
    format!("{}.lock", key)
}

fn is_status<E>(err: &SdkError<E>, status: u16) -> bool {
    err.raw_response()
        .is_some_and(|raw| raw.status().as_u16() == status)
}
