//! Host callback contracts: the subsystems this crate treats as external
//! collaborators (PTY, filesystem, outbound sockets, update trigger).
//!
//! Each subsystem is one `#[async_trait]` trait, mirroring the teacher
//! crate's `AuthProvider` trait split between a production and a mock
//! implementation. The mocks here are not gated behind `#[cfg(test)]`
//! because the integration tests under `tests/` need them too.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::DeviceResult;

/// Opaque handle to an open file, minted by `FileHost::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub u64);

/// Opaque handle to an outbound connection, minted by `PortForwardHost::connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle(pub u64);

/// Requested access mode for `FileHost::open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
}

/// Result of `FileHost::stat`; every field independently optional, matching
/// the wire shape of `FileInfo`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStat {
    pub size: Option<i64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub mode: Option<u32>,
    pub modtime: Option<i64>,
}

/// One interactive PTY-like session.
#[async_trait]
pub trait ShellHost: Send + Sync + 'static {
    async fn open(&self, width: u16, height: u16) -> DeviceResult<()>;
    async fn resize(&self, width: u16, height: u16) -> DeviceResult<()>;
    async fn write(&self, data: &[u8]) -> DeviceResult<()>;
    async fn close(&self) -> DeviceResult<()>;
}

/// Filesystem access for the file-transfer handler.
#[async_trait]
pub trait FileHost: Send + Sync + 'static {
    async fn stat(&self, path: &str) -> DeviceResult<FileStat>;
    async fn open(&self, path: &str, mode: FileMode) -> DeviceResult<FileHandle>;
    /// Empty result means end-of-file.
    async fn read(&self, handle: FileHandle, max_len: usize) -> DeviceResult<Vec<u8>>;
    async fn write(&self, handle: FileHandle, data: &[u8]) -> DeviceResult<()>;
    async fn close(&self, handle: FileHandle) -> DeviceResult<()>;
}

/// One outbound TCP/UDP connection for the port-forward handler.
#[async_trait]
pub trait PortForwardHost: Send + Sync + 'static {
    async fn connect(&self, host: &str, port: u16, protocol: &str) -> DeviceResult<ConnHandle>;
    async fn send(&self, handle: ConnHandle, data: &[u8]) -> DeviceResult<()>;
    async fn close(&self, handle: ConnHandle) -> DeviceResult<()>;
}

/// Update-check and inventory-push triggers.
#[async_trait]
pub trait UpdateHost: Send + Sync + 'static {
    async fn check_update(&self) -> DeviceResult<()>;
    async fn send_inventory(&self) -> DeviceResult<()>;
}

/// In-memory test doubles used by unit tests and the `tests/` integration
/// suite. Not gated behind `#[cfg(test)]` so external integration tests can
/// depend on them too.
pub mod mock {
    use super::*;
    use tokio::sync::Mutex as TokioMutex;

    #[derive(Debug, Default)]
    pub struct MockShellHost {
        pub opened: TokioMutex<Option<(u16, u16)>>,
        pub written: TokioMutex<Vec<u8>>,
        pub closed: TokioMutex<bool>,
        pub fail_open: bool,
    }

    #[async_trait]
    impl ShellHost for MockShellHost {
        async fn open(&self, width: u16, height: u16) -> DeviceResult<()> {
            if self.fail_open {
                return Err(crate::error::DeviceError::host_callback("mock open failure"));
            }
            *self.opened.lock().await = Some((width, height));
            Ok(())
        }

        async fn resize(&self, width: u16, height: u16) -> DeviceResult<()> {
            *self.opened.lock().await = Some((width, height));
            Ok(())
        }

        async fn write(&self, data: &[u8]) -> DeviceResult<()> {
            self.written.lock().await.extend_from_slice(data);
            Ok(())
        }

        async fn close(&self) -> DeviceResult<()> {
            *self.closed.lock().await = true;
            Ok(())
        }
    }

    /// An in-memory file, keyed by path, read or written through handles
    /// minted sequentially.
    #[derive(Debug, Default)]
    pub struct MockFileHost {
        pub files: TokioMutex<HashMap<String, Vec<u8>>>,
        next_handle: TokioMutex<u64>,
        open_reads: TokioMutex<HashMap<u64, (String, usize)>>,
        open_writes: TokioMutex<HashMap<u64, String>>,
    }

    impl MockFileHost {
        pub fn with_file(path: impl Into<String>, contents: Vec<u8>) -> Self {
            let host = Self::default();
            host.files
                .try_lock()
                .expect("uncontended at construction")
                .insert(path.into(), contents);
            host
        }

        async fn mint_handle(&self) -> FileHandle {
            let mut next = self.next_handle.lock().await;
            let handle = FileHandle(*next);
            *next += 1;
            handle
        }
    }

    #[async_trait]
    impl FileHost for MockFileHost {
        async fn stat(&self, path: &str) -> DeviceResult<FileStat> {
            let files = self.files.lock().await;
            let contents = files
                .get(path)
                .ok_or_else(|| crate::error::DeviceError::host_callback("no such file"))?;
            Ok(FileStat {
                size: Some(contents.len() as i64),
                uid: Some(0),
                gid: Some(0),
                mode: Some(0o644),
                modtime: Some(0),
            })
        }

        async fn open(&self, path: &str, mode: FileMode) -> DeviceResult<FileHandle> {
            let handle = self.mint_handle().await;
            match mode {
                FileMode::Read => {
                    if !self.files.lock().await.contains_key(path) {
                        return Err(crate::error::DeviceError::host_callback("no such file"));
                    }
                    self.open_reads
                        .lock()
                        .await
                        .insert(handle.0, (path.to_string(), 0));
                }
                FileMode::Write => {
                    self.files.lock().await.entry(path.to_string()).or_default();
                    self.open_writes.lock().await.insert(handle.0, path.to_string());
                }
            }
            Ok(handle)
        }

        async fn read(&self, handle: FileHandle, max_len: usize) -> DeviceResult<Vec<u8>> {
            let mut reads = self.open_reads.lock().await;
            let (path, offset) = reads
                .get_mut(&handle.0)
                .ok_or_else(|| crate::error::DeviceError::host_callback("stale read handle"))?;
            let files = self.files.lock().await;
            let contents = files
                .get(path)
                .ok_or_else(|| crate::error::DeviceError::host_callback("file vanished"))?;
            let end = (*offset + max_len).min(contents.len());
            let chunk = contents[*offset..end].to_vec();
            *offset = end;
            Ok(chunk)
        }

        async fn write(&self, handle: FileHandle, data: &[u8]) -> DeviceResult<()> {
            let writes = self.open_writes.lock().await;
            let path = writes
                .get(&handle.0)
                .ok_or_else(|| crate::error::DeviceError::host_callback("stale write handle"))?;
            self.files
                .lock()
                .await
                .entry(path.clone())
                .or_default()
                .extend_from_slice(data);
            Ok(())
        }

        async fn close(&self, handle: FileHandle) -> DeviceResult<()> {
            self.open_reads.lock().await.remove(&handle.0);
            self.open_writes.lock().await.remove(&handle.0);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct MockPortForwardHost {
        next_handle: TokioMutex<u64>,
        pub sent: TokioMutex<Vec<Vec<u8>>>,
        pub closed: TokioMutex<Vec<ConnHandle>>,
        pub fail_connect: bool,
    }

    #[async_trait]
    impl PortForwardHost for MockPortForwardHost {
        async fn connect(&self, _host: &str, _port: u16, _protocol: &str) -> DeviceResult<ConnHandle> {
            if self.fail_connect {
                return Err(crate::error::DeviceError::host_callback("mock connect failure"));
            }
            let mut next = self.next_handle.lock().await;
            let handle = ConnHandle(*next);
            *next += 1;
            Ok(handle)
        }

        async fn send(&self, _handle: ConnHandle, data: &[u8]) -> DeviceResult<()> {
            self.sent.lock().await.push(data.to_vec());
            Ok(())
        }

        async fn close(&self, handle: ConnHandle) -> DeviceResult<()> {
            self.closed.lock().await.push(handle);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct MockUpdateHost {
        pub checked: Mutex<bool>,
        pub inventory_sent: Mutex<bool>,
        pub fail: bool,
    }

    #[async_trait]
    impl UpdateHost for MockUpdateHost {
        async fn check_update(&self) -> DeviceResult<()> {
            if self.fail {
                return Err(crate::error::DeviceError::host_callback("mock update failure"));
            }
            *self.checked.lock().await = true;
            Ok(())
        }

        async fn send_inventory(&self) -> DeviceResult<()> {
            if self.fail {
                return Err(crate::error::DeviceError::host_callback("mock inventory failure"));
            }
            *self.inventory_sent.lock().await = true;
            Ok(())
        }
    }
}
