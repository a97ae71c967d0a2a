use std::net::SocketAddr;
use std::path::PathBuf;

use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tempfile::TempDir;

use upq_server::config::Config;

/// A running server bound to an ephemeral port with its own upload directory.
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub upload_dir: PathBuf,
    _dir: TempDir,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub async fn upload(&self, filename: &str, content: &[u8]) -> reqwest::Response {
        let part = Part::bytes(content.to_vec()).file_name(filename.to_string());
        self.client
            .post(self.url("/files"))
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .expect("upload request failed")
    }
}

pub async fn spawn_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let upload_dir = dir.path().join("uploads");
    spawn_with_upload_dir(dir, upload_dir).await
}

pub async fn spawn_with_upload_dir(dir: TempDir, upload_dir: PathBuf) -> TestApp {
    let config = Config {
        host: "127.0.0.1".parse().unwrap(),
        port: 0,
        upload_dir: upload_dir.clone(),
        static_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("public"),
        max_upload_bytes: 1024 * 1024,
        log_level: "debug".to_string(),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = upq_server::build_app(config);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        addr,
        client: Client::new(),
        upload_dir,
        _dir: dir,
    }
}
