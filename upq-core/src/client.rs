use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

/// Path of the file collection on the server, for both listing and upload.
pub const FILES_PATH: &str = "/files";
/// Multipart field that carries the uploaded file.
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server rejected the request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// How a failed send should be treated by the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// No usable response; expected to be transient.
    Transport,
    /// The server answered and refused the file.
    Rejected,
}

/// Raw file content together with the name it was declared with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePayload {
    pub name: String,
    pub content: Vec<u8>,
}

impl FilePayload {
    pub fn new(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Body of a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Error object returned by the server on any failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone)]
pub struct UploadClient {
    http: Client,
    base_url: Url,
}

impl UploadClient {
    pub fn new() -> Result<Self, UploadError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, UploadError> {
        Self::with_http(base_url, Client::new())
    }

    pub fn with_http(base_url: &str, http: Client) -> Result<Self, UploadError> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn send_file(
        &self,
        payload: &FilePayload,
        filename: &str,
    ) -> Result<UploadReceipt, UploadError> {
        let url = self.endpoint(FILES_PATH)?;
        let part = Part::bytes(payload.content.clone()).file_name(filename.to_string());
        let form = Form::new().part(FILE_FIELD, part);
        let response = self.http.post(url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status,
                message: rejection_message(status, &body),
            });
        }
        let body = response.text().await?;
        // The file is stored once the server answers 2xx, whatever the body says.
        Ok(serde_json::from_str(&body).unwrap_or_else(|_| UploadReceipt {
            success: true,
            message: None,
            filename: Some(filename.to_string()),
        }))
    }

    pub async fn list_files(&self) -> Result<Vec<String>, UploadError> {
        let url = self.endpoint(FILES_PATH)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status,
                message: rejection_message(status, &body),
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Raw GET used for static resources outside the file API.
    pub async fn fetch_resource(&self, path: &str) -> Result<Vec<u8>, UploadError> {
        let url = self.endpoint(path)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status,
                message: rejection_message(status, &body),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    fn endpoint(&self, path: &str) -> Result<Url, UploadError> {
        Ok(self.base_url.join(path)?)
    }
}

impl UploadError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            UploadError::Rejected { .. } => FailureClass::Rejected,
            _ => FailureClass::Transport,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.failure_class() == FailureClass::Transport
    }

    /// Message suitable for showing next to a queued file.
    pub fn user_message(&self) -> String {
        match self {
            UploadError::Rejected { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

fn rejection_message(status: StatusCode, body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .map(|parsed| parsed.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| format!("Server responded with status {}", status.as_u16()))
}
