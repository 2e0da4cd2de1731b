//! SFTP driver backed by `ssh2`. The underlying crate is synchronous, so every call is wrapped
//! in `tokio::task::spawn_blocking`, the same way the teacher wraps the synchronous `zip`/
//! `unrar`/`sevenz-rust` crates in `extraction/shared.rs`.

use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ssh2::Session;

use super::{FileSourceDriver, RemoteEntry, SourceCredentials};
use crate::error::TransportError;

/// An SFTP connection to one host, reused across a worker's listing/fetch calls.
pub struct SftpDriver {
    host: String,
    session: Arc<Mutex<Session>>,
}

impl SftpDriver {
    /// Connect and authenticate to `host:22`.
    ///
    /// If `credentials.password` is present, password authentication is used; otherwise the
    /// local SSH agent is consulted for a public-key identity, per §4.6.
    pub async fn connect(host: &str, credentials: &SourceCredentials) -> Result<Self, TransportError> {
        let host = host.to_string();
        let username = credentials.username.clone().unwrap_or_else(|| "anonymous".to_string());
        let password = credentials.password.clone();

        tokio::task::spawn_blocking(move || {
            let tcp = TcpStream::connect((host.as_str(), 22)).map_err(|e| TransportError::Connect {
                host: host.clone(),
                message: e.to_string(),
            })?;

            let mut session = Session::new().map_err(|e| TransportError::Connect {
                host: host.clone(),
                message: e.to_string(),
            })?;
            session.set_tcp_stream(tcp);
            session.handshake().map_err(|e| TransportError::Connect {
                host: host.clone(),
                message: e.to_string(),
            })?;

            match password {
                Some(password) if !password.is_empty() => {
                    session
                        .userauth_password(&username, &password)
                        .map_err(|e| TransportError::Auth {
                            host: host.clone(),
                            message: e.to_string(),
                        })?;
                }
                _ => {
                    session
                        .userauth_agent(&username)
                        .map_err(|e| TransportError::Auth {
                            host: host.clone(),
                            message: e.to_string(),
                        })?;
                }
            }

            if !session.authenticated() {
                return Err(TransportError::Auth {
                    host: host.clone(),
                    message: "session not authenticated after userauth".to_string(),
                });
            }

            Ok(Self {
                host,
                session: Arc::new(Mutex::new(session)),
            })
        })
        .await
        .map_err(|e| TransportError::Connect {
            host: "unknown".to_string(),
            message: format!("connect task panicked: {e}"),
        })?
    }
}

#[async_trait]
impl FileSourceDriver for SftpDriver {
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
        let session = self.session.clone();
        let host = self.host.clone();
        let path = path.to_string();

        tokio::task::spawn_blocking(move || {
            let session = session.lock().unwrap();
            let sftp = session.sftp().map_err(|e| TransportError::List {
                host: host.clone(),
                path: path.clone(),
                message: e.to_string(),
            })?;
            let entries = sftp.readdir(std::path::Path::new(&path)).map_err(|e| TransportError::List {
                host: host.clone(),
                path: path.clone(),
                message: e.to_string(),
            })?;

            Ok(entries
                .into_iter()
                .filter_map(|(path_buf, stat)| {
                    let name = path_buf.file_name()?.to_str()?.to_string();
                    if name.ends_with(".zip") {
                        Some(RemoteEntry { name, size: stat.size })
                    } else {
                        None
                    }
                })
                .collect())
        })
        .await
        .map_err(|e| TransportError::List {
            host: self.host.clone(),
            path: "unknown".to_string(),
            message: format!("list task panicked: {e}"),
        })?
    }

    async fn open_stream(
        &self,
        path: &str,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>, TransportError> {
        let session = self.session.clone();
        let host = self.host.clone();
        let path = path.to_string();

        let bytes = tokio::task::spawn_blocking(move || {
            let session = session.lock().unwrap();
            let sftp = session.sftp().map_err(|e| TransportError::Fetch {
                host: host.clone(),
                path: path.clone(),
                message: e.to_string(),
            })?;
            let mut file = sftp.open(std::path::Path::new(&path)).map_err(|e| TransportError::Fetch {
                host: host.clone(),
                path: path.clone(),
                message: e.to_string(),
            })?;
            let mut buf = Vec::new();
            file.read_to_end(&mut buf).map_err(|e| TransportError::Fetch {
                host: host.clone(),
                path: path.clone(),
                message: e.to_string(),
            })?;
            Ok::<_, TransportError>(buf)
        })
        .await
        .map_err(|e| TransportError::Fetch {
            host: self.host.clone(),
            path: path.to_string(),
            message: format!("fetch task panicked: {e}"),
        })??;

        Ok(Box::new(std::io::Cursor::new(bytes)))
    }

    async fn disconnect(&mut self) {
        // ssh2's Session has no async close; dropping the Arc once the last worker releases it
        // tears down the TCP stream along with it.
    }
}
