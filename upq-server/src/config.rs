use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let host: IpAddr = env_or("UPQ_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid UPQ_HOST: {e}"))?;

        let port: u16 = env_or("UPQ_PORT", "8080")
            .parse()
            .map_err(|e| format!("Invalid UPQ_PORT: {e}"))?;

        let upload_dir = PathBuf::from(env_or("UPQ_UPLOAD_DIR", "uploads/"));
        let static_dir = PathBuf::from(env_or("UPQ_STATIC_DIR", "public"));

        let max_upload_bytes: usize = env_or("UPQ_MAX_UPLOAD_BYTES", "33554432")
            .parse()
            .map_err(|e| format!("Invalid UPQ_MAX_UPLOAD_BYTES: {e}"))?;

        let log_level = env_or("UPQ_LOG", "info");

        Ok(Config {
            host,
            port,
            upload_dir,
            static_dir,
            max_upload_bytes,
            log_level,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
