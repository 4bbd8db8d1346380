//! S3 multipart upload.
//!
//! Each file becomes one multipart upload: `start_file` initiates it,
//! every part is a separate `UploadPart` request, `finalize` completes it
//! with the collected ETags and `abort` discards the uploaded parts.

use async_trait::async_trait;
use chunkdrop_transfer::{
    ChannelError, ChannelSession, ConnectCause, FinalizeResult, NameProber, Part, PartAck,
    PartLimits, RemoteFile, TransferChannel, UploadTask,
};
use s3::BucketConfiguration;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::region::Region;
use s3::serde_types::Part as CompletedPart;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::BuildError;
use crate::credentials::S3Credentials;

const FORBIDDEN_HINT: &str = "Check your Access Key ID and Secret are correct and you have \
    permission to access the specified bucket.";
const UNREACHABLE_HINT: &str =
    "Check the S3 server (endpoint) is set correctly and check your network connection.";

/// Configuration of an S3-compatible bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// Host of the S3 API, e.g. `s3.eu-central-003.backblazeb2.com`.
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Create the bucket when the session opens and it does not exist.
    #[serde(default)]
    pub create_bucket_if_missing: bool,
    /// Upload objects with the `public-read` canned ACL.
    #[serde(default)]
    pub public_read: bool,
}

fn default_region() -> String {
    "us-east-1".into()
}

impl S3Config {
    /// Credentials given inline, if all three fields are present.
    pub fn credentials(&self) -> Option<S3Credentials> {
        Some(S3Credentials {
            access_key: self.access_key.clone()?,
            secret_key: self.secret_key.clone()?,
            bucket_name: self.bucket_name.clone()?.to_lowercase(),
        })
    }
}

/// Uploads into one bucket.
pub struct S3Channel {
    bucket: Box<Bucket>,
    /// Used for `InitiateMultipartUpload` only, where the object ACL is set.
    initiate_bucket: Box<Bucket>,
    region: Region,
    credentials: Credentials,
    create_bucket_if_missing: bool,
}

impl S3Channel {
    pub fn new(config: S3Config, creds: S3Credentials) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::Config {
            transport: "s3",
            reason,
        };

        let credentials = Credentials::new(
            Some(&creds.access_key),
            Some(&creds.secret_key),
            None,
            None,
            None,
        )
        .map_err(|e| invalid(e.to_string()))?;

        let region = Region::Custom {
            region: config.region,
            endpoint: config.endpoint,
        };

        let bucket = Bucket::new(&creds.bucket_name, region.clone(), credentials.clone())
            .map_err(|e| invalid(e.to_string()))?
            .with_path_style();

        let mut initiate_bucket = bucket.clone();
        if config.public_read {
            initiate_bucket.add_header("x-amz-acl", "public-read");
        }

        Ok(Self {
            bucket,
            initiate_bucket,
            region,
            credentials,
            create_bucket_if_missing: config.create_bucket_if_missing,
        })
    }

    async fn create_bucket(&self) -> Result<(), ChannelError> {
        let name = self.bucket.name();
        let response = Bucket::create_with_path_style(
            &name,
            self.region.clone(),
            self.credentials.clone(),
            BucketConfiguration::default(),
        )
        .await
        .map_err(map_connect_error)?;

        info!(bucket = %name, status = response.response_code, "created missing bucket");
        Ok(())
    }
}

/// Maps an S3 error raised while opening the session.
fn map_connect_error(e: S3Error) -> ChannelError {
    match e {
        S3Error::HttpFailWithBody(401 | 403, _) => {
            ChannelError::connect(ConnectCause::Credentials, FORBIDDEN_HINT)
        }
        S3Error::HttpFailWithBody(404, _) => ChannelError::connect(
            ConnectCause::NotFound,
            "Bucket not found. Check the bucket name is correct.",
        ),
        S3Error::HttpFailWithBody(301, _) => ChannelError::connect(
            ConnectCause::NotFound,
            "Incorrect server (endpoint) for this bucket.",
        ),
        S3Error::HttpFailWithBody(status, body) => {
            ChannelError::connect(ConnectCause::Network, format!("S3 answered {status}: {body}"))
        }
        other => {
            debug!(error = %other, "S3 connect failed");
            ChannelError::connect(ConnectCause::Network, UNREACHABLE_HINT)
        }
    }
}

/// Maps an S3 error raised mid-transfer. 5xx answers are retryable.
fn map_transfer_error(e: S3Error) -> ChannelError {
    match e {
        S3Error::HttpFailWithBody(401 | 403, _) => ChannelError::Permission(FORBIDDEN_HINT.into()),
        S3Error::HttpFailWithBody(status, body) if (500..600).contains(&status) => {
            ChannelError::transient(format!("S3 answered {status}: {body}"))
        }
        S3Error::HttpFailWithBody(status, body) => {
            ChannelError::Protocol(format!("S3 answered {status}: {body}"))
        }
        other => ChannelError::transient(other.to_string()),
    }
}

#[async_trait]
impl TransferChannel for S3Channel {
    type Session = S3Session;

    fn name(&self) -> &'static str {
        "s3"
    }

    fn part_limits(&self) -> PartLimits {
        PartLimits::S3
    }

    async fn open(&self, task: &UploadTask) -> Result<S3Session, ChannelError> {
        // A one-key listing proves the credentials, endpoint and bucket.
        let listed = self
            .bucket
            .list_page(
                task.destination_prefix().to_string(),
                None,
                None,
                None,
                Some(1),
            )
            .await;

        match listed {
            Ok((_, status)) => debug!(bucket = %self.bucket.name(), status, "bucket reachable"),
            Err(S3Error::HttpFailWithBody(404, _)) if self.create_bucket_if_missing => {
                self.create_bucket().await?;
            }
            Err(e) => return Err(map_connect_error(e)),
        }

        Ok(S3Session {
            bucket: self.bucket.clone(),
            initiate_bucket: self.initiate_bucket.clone(),
        })
    }
}

/// Open session against one bucket.
pub struct S3Session {
    bucket: Box<Bucket>,
    initiate_bucket: Box<Bucket>,
}

/// State of one multipart upload.
pub struct S3Upload {
    key: String,
    upload_id: String,
    content_type: String,
    parts: Vec<CompletedPart>,
}

#[async_trait]
impl NameProber for S3Session {
    async fn exists(&self, remote_path: &str) -> Result<bool, ChannelError> {
        match self.bucket.head_object(remote_path).await {
            Ok((_, status)) => Ok(status == 200),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(false),
            Err(e) => Err(map_transfer_error(e)),
        }
    }
}

#[async_trait]
impl ChannelSession for S3Session {
    type Upload = S3Upload;

    async fn start_file(&mut self, file: &RemoteFile) -> Result<S3Upload, ChannelError> {
        let resp = self
            .initiate_bucket
            .initiate_multipart_upload(&file.remote_path, &file.mime_type)
            .await
            .map_err(map_transfer_error)?;

        debug!(
            key = %file.remote_path,
            upload_id = %resp.upload_id,
            parts = file.plan.num_parts,
            "multipart upload initiated"
        );
        Ok(S3Upload {
            key: file.remote_path.clone(),
            upload_id: resp.upload_id,
            content_type: file.mime_type.clone(),
            parts: Vec::with_capacity(file.plan.num_parts as usize),
        })
    }

    async fn send_part(
        &mut self,
        upload: &mut S3Upload,
        part: &Part,
    ) -> Result<PartAck, ChannelError> {
        let part_number = u32::try_from(part.range.part_number())
            .map_err(|_| ChannelError::Protocol("part number out of range".into()))?;

        let completed = self
            .bucket
            .put_multipart_chunk(
                part.data.clone(),
                &upload.key,
                part_number,
                &upload.upload_id,
                &upload.content_type,
            )
            .await
            .map_err(map_transfer_error)?;

        let ack = PartAck {
            index: part.index(),
            bytes: part.len() as u64,
            etag: Some(completed.etag.clone()),
        };
        upload.parts.push(completed);
        Ok(ack)
    }

    async fn finalize(
        &mut self,
        upload: &mut S3Upload,
        remote_name: &str,
    ) -> Result<FinalizeResult, ChannelError> {
        let parts = std::mem::take(&mut upload.parts);
        self.bucket
            .complete_multipart_upload(&upload.key, &upload.upload_id, parts)
            .await
            .map_err(map_transfer_error)?;

        Ok(FinalizeResult {
            remote_path: remote_name.to_string(),
            url: None,
        })
    }

    async fn abort(&mut self, upload: S3Upload) {
        if let Err(e) = self.bucket.abort_upload(&upload.key, &upload.upload_id).await {
            warn!(key = %upload.key, error = %e, "failed to abort multipart upload");
        }
    }

    async fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdrop_transfer::ErrorKind;

    fn config() -> S3Config {
        S3Config {
            endpoint: "s3.example.com".into(),
            region: default_region(),
            bucket_name: Some("Photos".into()),
            access_key: Some("AKIA".into()),
            secret_key: Some("secret".into()),
            create_bucket_if_missing: false,
            public_read: false,
        }
    }

    #[test]
    fn inline_credentials_need_all_fields() {
        let creds = config().credentials().unwrap();
        assert_eq!(creds.bucket_name, "photos");

        let partial = S3Config {
            secret_key: None,
            ..config()
        };
        assert!(partial.credentials().is_none());
    }

    #[test]
    fn builds_path_style_bucket() {
        let cfg = config();
        let creds = cfg.credentials().unwrap();
        let channel = S3Channel::new(cfg, creds).unwrap();
        assert_eq!(channel.bucket.name(), "photos");
        assert_eq!(channel.part_limits(), PartLimits::S3);
    }

    #[test]
    fn bucket_options_default_off() {
        let cfg: S3Config =
            serde_json::from_str(r#"{"endpoint":"s3.example.com","bucket_name":"Photos"}"#)
                .unwrap();
        assert!(!cfg.create_bucket_if_missing);
        assert!(!cfg.public_read);

        let cfg: S3Config = serde_json::from_str(
            r#"{"endpoint":"s3.example.com","create_bucket_if_missing":true,"public_read":true}"#,
        )
        .unwrap();
        assert!(cfg.create_bucket_if_missing);
        assert!(cfg.public_read);
    }

    #[test]
    fn channel_keeps_bucket_options() {
        let cfg = S3Config {
            create_bucket_if_missing: true,
            public_read: true,
            ..config()
        };
        let creds = cfg.credentials().unwrap();
        let channel = S3Channel::new(cfg, creds).unwrap();
        assert!(channel.create_bucket_if_missing);
        assert_eq!(
            channel.initiate_bucket.extra_headers().get("x-amz-acl").unwrap(),
            "public-read"
        );
        assert!(channel.bucket.extra_headers().get("x-amz-acl").is_none());

        let private = S3Channel::new(config(), config().credentials().unwrap()).unwrap();
        assert!(private.initiate_bucket.extra_headers().is_empty());
    }

    #[test]
    fn forbidden_on_connect_is_credentials() {
        let err = map_connect_error(S3Error::HttpFailWithBody(403, String::new()));
        assert!(matches!(
            err,
            ChannelError::Connect {
                cause: ConnectCause::Credentials,
                ..
            }
        ));
        assert_eq!(err.to_string(), FORBIDDEN_HINT);
    }

    #[test]
    fn redirect_means_wrong_endpoint() {
        let err = map_connect_error(S3Error::HttpFailWithBody(301, String::new()));
        assert!(err.to_string().contains("Incorrect server"));
    }

    #[test]
    fn server_errors_are_retryable_mid_transfer() {
        assert!(map_transfer_error(S3Error::HttpFailWithBody(503, "slow down".into())).is_retryable());
        assert!(!map_transfer_error(S3Error::HttpFailWithBody(400, String::new())).is_retryable());
        assert_eq!(
            map_transfer_error(S3Error::HttpFailWithBody(403, String::new())).kind(),
            ErrorKind::Transfer
        );
    }
}
