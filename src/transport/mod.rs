//! Remote file-source drivers (supplements C6/C7): a protocol-agnostic capability trait over
//! FTP and SFTP, mirroring the teacher's `ParityHandler` trait-object pattern for pluggable
//! external capability.

pub mod ftp;
pub mod sftp;

use async_trait::async_trait;

use crate::error::TransportError;

/// One directory entry as seen by a [`FileSourceDriver`] listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Entry name, no path components.
    pub name: String,
    /// Size in bytes, if the protocol reports it in the listing.
    pub size: Option<u64>,
}

/// Credentials for a remote file source, as stored on the `FileSource` row.
#[derive(Debug, Clone)]
pub struct SourceCredentials {
    /// Username; FTP anonymous login uses `"anonymous"`.
    pub username: Option<String>,
    /// Password. For SFTP, an empty/absent password means "use the local agent identity".
    pub password: Option<String>,
}

/// Abstracts the two supported remote transports so discovery and download workers never see
/// `suppaftp`/`ssh2` types directly.
#[async_trait]
pub trait FileSourceDriver: Send + Sync {
    /// List the `*.zip` entries directly under `path`. Non-zip entries and sub-directories are
    /// never returned.
    async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError>;

    /// Open a stream of the remote file at `path`, yielding chunks as they arrive.
    async fn open_stream(
        &self,
        path: &str,
    ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>, TransportError>;

    /// Close the underlying connection. Drivers are not reused across hostnames; a worker's
    /// per-hostname cache holds one of these per live connection.
    async fn disconnect(&mut self);
}

/// Connect to `host` using the driver appropriate for `protocol`. `http` has no registered
/// driver (§9 open question); callers should skip such sources before reaching here.
pub async fn connect(
    protocol: crate::types::SourceProtocol,
    host: &str,
    credentials: &SourceCredentials,
) -> Result<Box<dyn FileSourceDriver>, TransportError> {
    use crate::types::SourceProtocol;
    match protocol {
        SourceProtocol::Ftp => Ok(Box::new(ftp::FtpDriver::connect(host, credentials).await?)),
        SourceProtocol::Sftp => Ok(Box::new(sftp::SftpDriver::connect(host, credentials).await?)),
        SourceProtocol::Http => Err(TransportError::UnsupportedProtocol("http".to_string())),
    }
}

/// In-memory driver used by tests that exercise discovery/download logic without a real FTP or
/// SFTP endpoint — there is no HTTP wire protocol here to mock with `wiremock`, so this fixture
/// plays that role against the `FileSourceDriver` trait instead.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A fake remote filesystem: path -> (entries, contents by name).
    #[derive(Default)]
    pub struct FakeDriver {
        listings: Mutex<HashMap<String, Vec<RemoteEntry>>>,
        contents: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl FakeDriver {
        /// Build an empty fake remote filesystem.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a directory listing and the byte contents of each listed file.
        pub fn seed(&self, path: &str, files: Vec<(&str, Vec<u8>)>) {
            let mut listings = self.listings.lock().unwrap();
            let mut contents = self.contents.lock().unwrap();
            let entries = files
                .iter()
                .map(|(name, bytes)| RemoteEntry {
                    name: name.to_string(),
                    size: Some(bytes.len() as u64),
                })
                .collect();
            listings.insert(path.to_string(), entries);
            for (name, bytes) in files {
                contents.insert(format!("{path}/{name}"), bytes);
            }
        }
    }

    #[async_trait]
    impl FileSourceDriver for FakeDriver {
        async fn list(&self, path: &str) -> Result<Vec<RemoteEntry>, TransportError> {
            Ok(self
                .listings
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .unwrap_or_default())
        }

        async fn open_stream(
            &self,
            path: &str,
        ) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>, TransportError> {
            let bytes = self
                .contents
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| TransportError::Fetch {
                    host: "fake".into(),
                    path: path.into(),
                    message: "no such file".into(),
                })?;
            Ok(Box::new(std::io::Cursor::new(bytes)))
        }

        async fn disconnect(&mut self) {}
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn fake_driver_lists_and_streams_seeded_files() {
            let driver = FakeDriver::new();
            driver.seed("/outgoing/add", vec![("ABCD_20140115_1.zip", b"zip-bytes".to_vec())]);

            let entries = driver.list("/outgoing/add").await.unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].name, "ABCD_20140115_1.zip");

            let mut stream = driver.open_stream("/outgoing/add/ABCD_20140115_1.zip").await.unwrap();
            let mut buf = Vec::new();
            tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf).await.unwrap();
            assert_eq!(buf, b"zip-bytes");
        }

        #[tokio::test]
        async fn fake_driver_missing_path_yields_empty_listing() {
            let driver = FakeDriver::new();
            let entries = driver.list("/nowhere").await.unwrap();
            assert!(entries.is_empty());
        }
    }
}
