//! HTTP multipart form upload.
//!
//! The whole file travels in one `multipart/form-data` POST whose body is
//! fed part by part through a bounded channel, so only one part is held in
//! memory at a time. The endpoint assigns the final name and answers with a
//! JSON document that carries the public URL.

use std::time::Duration;

use async_trait::async_trait;
use chunkdrop_transfer::{
    ChannelError, ChannelSession, ConnectCause, FinalizeResult, NameProber, Part, PartAck,
    PartLimits, RemoteFile, TransferChannel, UploadTask,
};
use futures_util::stream;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::multipart::{Form, Part as FormPart};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::BuildError;
use crate::credentials::ApiKeyCredentials;

/// Body chunks queued ahead of the request.
const BODY_QUEUE_DEPTH: usize = 1;

/// Configuration of an HTTP upload endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Form field the file is attached to.
    #[serde(default = "default_file_field")]
    pub file_field: String,
    /// JSON pointer to the URL inside the response body.
    #[serde(default = "default_url_pointer")]
    pub url_pointer: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_file_field() -> String {
    "file".into()
}

fn default_url_pointer() -> String {
    "/url".into()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Uploads to an HTTP endpoint with Bearer authentication.
pub struct HttpChannel {
    http: reqwest::Client,
    config: HttpConfig,
}

impl HttpChannel {
    pub fn new(config: HttpConfig, key: Option<ApiKeyCredentials>) -> Result<Self, BuildError> {
        let invalid = |reason: String| BuildError::Config {
            transport: "http",
            reason,
        };

        let mut headers = HeaderMap::new();
        if let Some(key) = key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key.api_key))
                .map_err(|_| invalid("API key contains invalid characters".into()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self { http, config })
    }
}

fn map_connect_error(e: reqwest::Error) -> ChannelError {
    if e.is_timeout() {
        ChannelError::connect(ConnectCause::Timeout, "Connection timed out.")
    } else if e.is_connect() {
        ChannelError::connect(
            ConnectCause::NotFound,
            "Server not found. Check the upload URL and your network connection.",
        )
    } else {
        ChannelError::connect(ConnectCause::Network, e.to_string())
    }
}

#[async_trait]
impl TransferChannel for HttpChannel {
    type Session = HttpSession;

    fn name(&self) -> &'static str {
        "http"
    }

    fn part_limits(&self) -> PartLimits {
        PartLimits::STREAM
    }

    async fn open(&self, _task: &UploadTask) -> Result<HttpSession, ChannelError> {
        let resp = self
            .http
            .head(&self.config.url)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(map_connect_error)?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ChannelError::connect(
                    ConnectCause::Credentials,
                    "API key rejected. Check your API key.",
                ));
            }
            status => debug!(%status, url = %self.config.url, "upload endpoint reachable"),
        }

        Ok(HttpSession {
            http: self.http.clone(),
            config: self.config.clone(),
        })
    }
}

/// Open HTTP "session". Holds no server-side state.
pub struct HttpSession {
    http: reqwest::Client,
    config: HttpConfig,
}

type BodyChunk = Result<Vec<u8>, std::io::Error>;

/// A request in flight whose body is still being produced.
pub struct HttpUpload {
    body_tx: Option<mpsc::Sender<BodyChunk>>,
    request: Option<JoinHandle<Result<reqwest::Response, reqwest::Error>>>,
}

impl HttpUpload {
    /// Closes the body and waits for the server's answer.
    async fn response(&mut self) -> Result<(StatusCode, String), ChannelError> {
        // Closing the sender ends the body stream.
        self.body_tx.take();

        let request = self
            .request
            .take()
            .ok_or_else(|| ChannelError::terminal("request already finished"))?;
        let resp = request
            .await
            .map_err(|e| ChannelError::terminal(format!("upload task failed: {e}")))?
            .map_err(|e| ChannelError::terminal(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

/// Maps a non-success answer to the error reported for the file.
fn status_error(status: StatusCode, body: &str) -> Option<ChannelError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(ChannelError::Permission(format!("server answered {status}")))
    } else if !status.is_success() {
        Some(ChannelError::terminal(format!("server answered {status}: {body}")))
    } else {
        None
    }
}

#[async_trait]
impl NameProber for HttpSession {
    /// The server assigns names, so nothing ever collides on our side.
    async fn exists(&self, _remote_path: &str) -> Result<bool, ChannelError> {
        Ok(false)
    }
}

#[async_trait]
impl ChannelSession for HttpSession {
    type Upload = HttpUpload;

    async fn start_file(&mut self, file: &RemoteFile) -> Result<HttpUpload, ChannelError> {
        let (body_tx, mut body_rx) = mpsc::channel::<BodyChunk>(BODY_QUEUE_DEPTH);
        let body = stream::poll_fn(move |cx| body_rx.poll_recv(cx));

        let part = FormPart::stream_with_length(reqwest::Body::wrap_stream(body), file.size_bytes)
            .file_name(file.file_name().to_string())
            .mime_str(&file.mime_type)
            .map_err(|e| ChannelError::Protocol(format!("invalid mime type: {e}")))?;
        let form = Form::new().part(self.config.file_field.clone(), part);

        let request = self.http.post(&self.config.url).multipart(form).send();
        Ok(HttpUpload {
            body_tx: Some(body_tx),
            request: Some(tokio::spawn(request)),
        })
    }

    async fn send_part(
        &mut self,
        upload: &mut HttpUpload,
        part: &Part,
    ) -> Result<PartAck, ChannelError> {
        let tx = upload
            .body_tx
            .as_ref()
            .ok_or_else(|| ChannelError::terminal("request body already closed"))?;

        if tx.send(Ok(part.data.clone())).await.is_err() {
            // The request ended before the body did; its answer says why.
            let (status, body) = upload.response().await?;
            return Err(status_error(status, &body)
                .unwrap_or_else(|| ChannelError::terminal("server closed the connection")));
        }

        Ok(PartAck {
            index: part.index(),
            bytes: part.len() as u64,
            etag: None,
        })
    }

    async fn finalize(
        &mut self,
        upload: &mut HttpUpload,
        remote_name: &str,
    ) -> Result<FinalizeResult, ChannelError> {
        let (status, body) = upload.response().await?;
        if let Some(e) = status_error(status, &body) {
            return Err(e);
        }

        let url = extract_url(&body, &self.config.url_pointer)?;
        Ok(FinalizeResult {
            remote_path: remote_name.to_string(),
            url,
        })
    }

    async fn abort(&mut self, mut upload: HttpUpload) {
        if let Some(tx) = upload.body_tx.take() {
            let _ = tx
                .send(Err(std::io::Error::other("upload aborted")))
                .await;
        }
        if let Some(request) = upload.request.take() {
            request.abort();
        }
    }

    async fn close(self) {}
}

/// Pulls the URL out of a JSON response body.
///
/// An empty body or a missing pointer yields `None`; a body that is not
/// JSON at all is a protocol error.
fn extract_url(body: &str, pointer: &str) -> Result<Option<String>, ChannelError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ChannelError::Protocol(format!("response is not JSON: {e}")))?;

    let url = json
        .pointer(pointer)
        .and_then(|v| v.as_str())
        .map(str::to_string);
    if url.is_none() {
        warn!(pointer, "response has no URL at pointer");
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HttpConfig {
        HttpConfig {
            url: "http://127.0.0.1:9/upload".into(),
            api_key: None,
            file_field: default_file_field(),
            url_pointer: default_url_pointer(),
            timeout_secs: 1,
        }
    }

    #[test]
    fn extracts_url_by_pointer() {
        let body = r#"{"result":{"images":[{"direct_link":"https://img.example/a.png"}]}}"#;
        assert_eq!(
            extract_url(body, "/result/images/0/direct_link").unwrap(),
            Some("https://img.example/a.png".into())
        );
        assert_eq!(
            extract_url(r#"{"url":"https://x/y"}"#, "/url").unwrap(),
            Some("https://x/y".into())
        );
    }

    #[test]
    fn missing_pointer_is_none() {
        assert_eq!(extract_url(r#"{"ok":true}"#, "/url").unwrap(), None);
        assert_eq!(extract_url("", "/url").unwrap(), None);
    }

    #[test]
    fn non_json_body_is_protocol_error() {
        let err = extract_url("<html>oops</html>", "/url").unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }

    #[test]
    fn forbidden_answer_is_permission_error() {
        let err = status_error(StatusCode::FORBIDDEN, "").unwrap();
        assert!(matches!(err, ChannelError::Permission(_)));
        assert_eq!(err.title(), "Access Denied");
        assert_eq!(err.kind(), chunkdrop_transfer::ErrorKind::Transfer);
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            Some(ChannelError::Permission(_))
        ));
    }

    #[test]
    fn other_failures_keep_status_and_body() {
        let err = status_error(StatusCode::PAYLOAD_TOO_LARGE, "file too big").unwrap();
        assert!(!err.is_retryable());
        let message = err.to_string();
        assert!(message.contains("413"));
        assert!(message.contains("file too big"));
        assert!(status_error(StatusCode::OK, "{}").is_none());
    }

    /// Serves one connection, answering `status_line` once the request head
    /// arrived and returning the URL to request.
    async fn answer_once(status_line: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let reply = format!("HTTP/1.1 {status_line}\r\nContent-Length: 0\r\n\r\n");
            socket.write_all(reply.as_bytes()).await.unwrap();
            let _ = socket.read(&mut buf).await;
        });
        format!("http://{addr}/upload")
    }

    #[tokio::test]
    async fn early_answer_is_reported_by_send_part() {
        let url = answer_once("403 Forbidden").await;
        let channel = HttpChannel::new(config(), None).unwrap();
        let mut session = HttpSession {
            http: channel.http.clone(),
            config: channel.config.clone(),
        };

        // The server answered without reading the body.
        let (body_tx, body_rx) = mpsc::channel::<BodyChunk>(BODY_QUEUE_DEPTH);
        drop(body_rx);
        let request = tokio::spawn(session.http.get(url).send());
        let mut upload = HttpUpload {
            body_tx: Some(body_tx),
            request: Some(request),
        };
        let part = Part {
            range: chunkdrop_transfer::plan(4, 10, 4).part(0).unwrap(),
            data: b"data".to_vec(),
        };

        let err = session.send_part(&mut upload, &part).await.unwrap_err();

        assert!(matches!(err, ChannelError::Permission(_)));
        assert!(upload.request.is_none());
    }

    #[test]
    fn rejects_unprintable_api_key() {
        let key = ApiKeyCredentials {
            api_key: "bad\nkey".into(),
        };
        assert!(matches!(
            HttpChannel::new(config(), Some(key)),
            Err(BuildError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn exists_is_always_false() {
        let channel = HttpChannel::new(config(), None).unwrap();
        let session = HttpSession {
            http: channel.http.clone(),
            config: channel.config.clone(),
        };
        assert!(!session.exists("anything.png").await.unwrap());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connect_error() {
        let channel = HttpChannel::new(config(), None).unwrap();
        let task = UploadTask::new(vec![chunkdrop_transfer::LocalFile::new("a", 1)], "").unwrap();
        let err = match channel.open(&task).await {
            Err(e) => e,
            Ok(_) => panic!("port 9 should refuse connections"),
        };
        assert_eq!(err.kind(), chunkdrop_transfer::ErrorKind::Connect);
    }
}
