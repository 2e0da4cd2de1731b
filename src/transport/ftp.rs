//! FTP driver, binary mode, backed by `suppaftp`'s async client.

use async_trait::async_trait;
use suppaftp::AsyncFtpStream;
use tokio::sync::Mutex;

use super::{FileSourceDriver, RemoteEntry, SourceCredentials};
use crate::error::TransportError;

/// An FTP connection to one host, reused across a worker's listing/fetch calls.
pub struct FtpDriver {
    host: String,
    stream: Mutex<AsyncFtpStream>,
}

impl FtpDriver {
    /// Connect and authenticate to `host:21` with the given credentials.
    pub async fn connect(host: &str, credentials: &SourceCredentials) -> Result<Self, TransportError> {
        let mut stream =
            AsyncFtpStream::connect((host, 21))
                .await
                .map_err(|e| TransportError::Connect {
                    host: host.to_string(),
                    message: e.to_string(),
                })?;

        let username = credentials.username.as_deref().unwrap_or("anonymous");
        let password = credentials.password.as_deref().unwrap_or("");
        stream
            .login(username, password)
            .await
            .map_err(|e| TransportError::Auth {
                host: host.to_string(),
                message: e.to_string(),
            })?;
        stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .await
            .map_err(|e| TransportError::Connect {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            host: host.to_string(),
            stream: Mutex::new(stream),
        })
    }
}

#[async_trait]
impl FileSourceDriver for FtpDriver {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let mut stream = self.stream.lock().await;
        let names = stream.nlst(Some(path)).await.map_err(|e| TransportError::List {
            host: self.host.clone(),
            path: path.to_string(),
            message: e.to_string(),
        })?;

        Ok(names
            .into_iter()
            .filter_map(|full| {
                let name = full.rsplit('/').next().unwrap_or(&full).to_string();
                if name.ends_with(".zip") {
                    Some(RemoteEntry { name, size: None })
                } else {
                    None
                }
            })
            .collect())
    }

    async fn open_stream(
        &self,
        path: &str,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>, TransportError> {
        let mut stream = self.stream.lock().await;
        let bytes = stream.retr_as_buffer(path).await.map_err(|e| TransportError::Fetch {
            host: self.host.clone(),
            path: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(Box::new(std::io::Cursor::new(bytes.into_inner())))
    }

    async fn disconnect(&mut self) {
        let mut stream = self.stream.lock().await;
        let _ = stream.quit().await;
    }
}
