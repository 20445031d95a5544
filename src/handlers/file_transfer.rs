//! File-transfer handler: `IDLE`/`READING`/`EOF` (plus an internal
//! `WRITING` state for uploads), windowed at 10 chunks of up to 1024 bytes.
//! See §4.4.

use std::sync::Arc;

use tracing::warn;

use crate::codec::{Envelope, FileInfo, GetFile, Properties, Proto, StatFile, Status, UploadRequest};
use crate::error::DeviceResult;
use crate::host::{FileHandle, FileHost, FileMode};
use crate::session::FileTransferSession;

use super::{error_envelope, reply};

const CHUNK_SIZE: usize = 1024;
const WINDOW_SIZE: usize = 10;

fn opt_to_vec(opt: Option<Envelope>) -> Vec<Envelope> {
    opt.into_iter().collect()
}

pub struct FileTransferHandler {
    host: Arc<dyn FileHost>,
    session: FileTransferSession,
}

impl FileTransferHandler {
    pub fn new(host: Arc<dyn FileHost>) -> Self {
        FileTransferHandler {
            host,
            session: FileTransferSession::default(),
        }
    }

    pub fn session(&self) -> &FileTransferSession {
        &self.session
    }

    pub async fn handle(&mut self, env: Envelope) -> DeviceResult<Vec<Envelope>> {
        match env.typ.as_str() {
            "get_file" => self.handle_get_file(env).await,
            "put_file" => self.handle_put_file(env).await.map(opt_to_vec),
            "ack" => self.handle_ack(env).await,
            "stat" => self.handle_stat(env).await.map(opt_to_vec),
            "file_chunk" => self.handle_file_chunk(env).await.map(opt_to_vec),
            "file_info" => {
                tracing::debug!("file-transfer: discarding inbound file_info (we never issue stat)");
                Ok(vec![])
            }
            "error" => {
                self.handle_error().await;
                Ok(vec![])
            }
            other => {
                warn!(typ = other, "file-transfer: unknown message type");
                Ok(vec![])
            }
        }
    }

    async fn handle_get_file(&mut self, env: Envelope) -> DeviceResult<Vec<Envelope>> {
        let sid = env.sid.clone();
        let props = env.properties.clone().unwrap_or_default();
        let user_id = props.user_id.clone();

        let Some(body) = env.body.as_deref() else {
            return Ok(opt_to_vec(Some(error_envelope(
                Proto::FileTransfer,
                sid.as_deref(),
                "get_file missing body",
            )?)));
        };
        let request = match GetFile::decode(body) {
            Ok(r) => r,
            Err(e) => {
                return Ok(opt_to_vec(Some(error_envelope(
                    Proto::FileTransfer,
                    sid.as_deref(),
                    format!("malformed get_file: {e}"),
                )?)))
            }
        };

        if !self.session.is_idle() {
            return Ok(opt_to_vec(Some(error_envelope(
                Proto::FileTransfer,
                sid.as_deref(),
                "a transfer is already in progress",
            )?)));
        }

        let handle = match self.host.open(&request.path, FileMode::Read).await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "file-transfer: open for read failed");
                return Ok(opt_to_vec(Some(error_envelope(
                    Proto::FileTransfer,
                    sid.as_deref(),
                    e.to_string(),
                )?)));
            }
        };

        let session_sid = sid.clone().unwrap_or_default();
        self.session = FileTransferSession::Reading {
            sid: session_sid,
            user_id: user_id.clone(),
            handle,
        };
        self.read_window(sid.as_deref(), user_id.as_deref(), handle, 0).await
    }

    async fn handle_put_file(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        let sid = env.sid.clone();
        let props = env.properties.clone().unwrap_or_default();

        let Some(body) = env.body.as_deref() else {
            return Ok(Some(error_envelope(
                Proto::FileTransfer,
                sid.as_deref(),
                "put_file missing body",
            )?));
        };
        let request = match UploadRequest::decode(body) {
            Ok(r) => r,
            Err(e) => {
                return Ok(Some(error_envelope(
                    Proto::FileTransfer,
                    sid.as_deref(),
                    format!("malformed put_file: {e}"),
                )?))
            }
        };

        if !self.session.is_idle() {
            return Ok(Some(error_envelope(
                Proto::FileTransfer,
                sid.as_deref(),
                "a transfer is already in progress",
            )?));
        }

        match self.host.open(&request.path, FileMode::Write).await {
            Ok(handle) => {
                // Starting a fresh upload always resets the inbound-chunk
                // counter, so window counts never leak across sessions.
                self.session = FileTransferSession::Writing { handle, chunk_count: 0 };
                let reply_props = Properties {
                    offset: Some(props.offset.unwrap_or(0)),
                    user_id: props.user_id,
                    status: Some(Status::Normal),
                    ..Default::default()
                };
                let mut resp = Envelope::new(Proto::FileTransfer, "ack").with_properties(reply_props);
                if let Some(sid) = sid {
                    resp = resp.with_sid(sid);
                }
                Ok(Some(resp))
            }
            Err(e) => {
                warn!(error = %e, "file-transfer: open for write failed");
                Ok(Some(error_envelope(Proto::FileTransfer, sid.as_deref(), e.to_string())?))
            }
        }
    }

    async fn handle_ack(&mut self, env: Envelope) -> DeviceResult<Vec<Envelope>> {
        let sid = env.sid.clone();
        let props = env.properties.clone().unwrap_or_default();
        let Some(offset) = props.offset else {
            return Ok(opt_to_vec(Some(error_envelope(
                Proto::FileTransfer,
                sid.as_deref(),
                "ack missing offset",
            )?)));
        };

        match std::mem::take(&mut self.session) {
            FileTransferSession::Reading { sid: session_sid, user_id, handle } => {
                self.session = FileTransferSession::Reading {
                    sid: session_sid.clone(),
                    user_id: user_id.clone(),
                    handle,
                };
                self.read_window(Some(&session_sid), user_id.as_deref(), handle, offset).await
            }
            FileTransferSession::Eof { handle, .. } => {
                if let Err(e) = self.host.close(handle).await {
                    warn!(error = %e, "file-transfer: close after EOF ack failed");
                }
                // session already reset to Idle by mem::take's default
                Ok(vec![])
            }
            _ => Ok(opt_to_vec(Some(error_envelope(
                Proto::FileTransfer,
                sid.as_deref(),
                "ack received outside a read transfer",
            )?))),
        }
    }

    async fn handle_stat(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        let sid = env.sid.clone();
        let Some(body) = env.body.as_deref() else {
            return Ok(Some(error_envelope(Proto::FileTransfer, sid.as_deref(), "stat missing body")?));
        };
        let request = match StatFile::decode(body) {
            Ok(r) => r,
            Err(e) => {
                return Ok(Some(error_envelope(
                    Proto::FileTransfer,
                    sid.as_deref(),
                    format!("malformed stat: {e}"),
                )?))
            }
        };

        match self.host.stat(&request.path).await {
            Ok(stat) => {
                let info = FileInfo {
                    path: request.path,
                    size: stat.size,
                    uid: stat.uid,
                    gid: stat.gid,
                    mode: stat.mode,
                    modtime: stat.modtime,
                };
                let body = info.encode()?;
                let resp = reply(Proto::FileTransfer, "file_info", sid.as_deref(), Status::Normal).with_body(body);
                Ok(Some(resp))
            }
            Err(e) => Ok(Some(error_envelope(Proto::FileTransfer, sid.as_deref(), e.to_string())?)),
        }
    }

    async fn handle_file_chunk(&mut self, env: Envelope) -> DeviceResult<Option<Envelope>> {
        let sid = env.sid.clone();
        let (handle, chunk_count) = match &self.session {
            FileTransferSession::Writing { handle, chunk_count } => (*handle, *chunk_count),
            _ => {
                warn!("file-transfer: file_chunk received outside an upload");
                return Ok(None);
            }
        };

        match env.body {
            Some(data) => {
                self.host.write(handle, &data).await?;
                let chunk_count = chunk_count + 1;
                if let FileTransferSession::Writing { chunk_count: c, .. } = &mut self.session {
                    *c = chunk_count % WINDOW_SIZE as u32;
                }
                if chunk_count as usize >= WINDOW_SIZE {
                    Ok(Some(reply(Proto::FileTransfer, "ack", sid.as_deref(), Status::Normal)))
                } else {
                    Ok(None)
                }
            }
            None => {
                if let Err(e) = self.host.close(handle).await {
                    warn!(error = %e, "file-transfer: close after upload EOF failed");
                }
                self.session = FileTransferSession::Idle;
                Ok(Some(reply(Proto::FileTransfer, "ack", sid.as_deref(), Status::Normal)))
            }
        }
    }

    async fn handle_error(&mut self) {
        if let Some(handle) = self.session.handle() {
            if let Err(e) = self.host.close(handle).await {
                warn!(error = %e, "file-transfer: close after peer error failed");
            }
        }
        self.session = FileTransferSession::Idle;
    }

    /// Reads up to one window of chunks starting at `offset`, transitioning
    /// to `Eof` the moment a zero-length read is observed. A short
    /// (partial, non-empty) read stops the window without a confirming
    /// read: only a subsequent `ack` is allowed to observe genuine EOF.
    async fn read_window(
        &mut self,
        sid: Option<&str>,
        user_id: Option<&str>,
        handle: FileHandle,
        mut offset: u64,
    ) -> DeviceResult<Vec<Envelope>> {
        let mut chunks = Vec::with_capacity(WINDOW_SIZE);
        for _ in 0..WINDOW_SIZE {
            let data = self.host.read(handle, CHUNK_SIZE).await?;
            let props = Properties {
                offset: Some(offset),
                user_id: user_id.map(str::to_string),
                ..Default::default()
            };
            let mut env = Envelope::new(Proto::FileTransfer, "file_chunk").with_properties(props);
            if let Some(sid) = sid {
                env = env.with_sid(sid.to_string());
            }

            if data.is_empty() {
                chunks.push(env.with_body(Vec::new()));
                if let FileTransferSession::Reading { sid, user_id, handle } = std::mem::take(&mut self.session) {
                    self.session = FileTransferSession::Eof { sid, user_id, handle };
                }
                break;
            }

            let short_read = data.len() < CHUNK_SIZE;
            offset += data.len() as u64;
            chunks.push(env.with_body(data));
            if short_read {
                break;
            }
        }
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Proto, Status};
    use crate::host::mock::MockFileHost;

    fn get_file_envelope(sid: &str, path: &str) -> Envelope {
        let body = GetFile { path: path.to_string() }.encode().unwrap();
        Envelope::new(Proto::FileTransfer, "get_file")
            .with_sid(sid)
            .with_body(body)
    }

    #[tokio::test]
    async fn download_stops_at_the_short_read_without_a_confirming_chunk() {
        let contents = vec![7u8; 2500];
        let host = Arc::new(MockFileHost::with_file("/a", contents.clone()));
        let mut h = FileTransferHandler::new(host);

        let chunks = h.handle(get_file_envelope("S1", "/a")).await.unwrap();
        assert_eq!(chunks.len(), 3, "1024 + 1024 + 452, stopping at the short read");
        for c in &chunks {
            assert_eq!(c.typ, "file_chunk");
            assert!(c.body.as_ref().unwrap().len() <= CHUNK_SIZE);
        }
        assert!(chunks.iter().all(|c| !c.body.as_ref().unwrap().is_empty()));
        let total: usize = chunks.iter().map(|c| c.body.as_ref().unwrap().len()).sum();
        assert_eq!(total, contents.len());
        assert!(matches!(h.session(), FileTransferSession::Reading { .. }));
    }

    #[tokio::test]
    async fn download_of_small_file_stays_reading_until_an_explicit_ack() {
        let contents = vec![1u8; 10];
        let host = Arc::new(MockFileHost::with_file("/a", contents.clone()));
        let mut h = FileTransferHandler::new(host);

        let chunks = h.handle(get_file_envelope("S1", "/a")).await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].body.as_ref().unwrap().len(), contents.len());
        assert!(matches!(h.session(), FileTransferSession::Reading { .. }));

        let ack = Envelope::new(Proto::FileTransfer, "ack")
            .with_sid("S1")
            .with_properties(crate::codec::Properties {
                offset: Some(contents.len() as u64),
                ..Default::default()
            });
        let chunks = h.handle(ack).await.unwrap();
        let last = chunks.last().unwrap();
        assert_eq!(last.body.as_ref().unwrap().len(), 0);
        assert!(matches!(h.session(), FileTransferSession::Eof { .. }));
    }

    #[tokio::test]
    async fn get_file_rejects_concurrent_transfer() {
        let host = Arc::new(MockFileHost::with_file("/a", vec![1u8; 10]));
        let mut h = FileTransferHandler::new(host);
        h.handle(get_file_envelope("S1", "/a")).await.unwrap();
        let resp = h.handle(get_file_envelope("S1", "/a")).await.unwrap();
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "error");
    }

    #[tokio::test]
    async fn put_file_rejects_while_a_download_is_in_progress() {
        let host = Arc::new(MockFileHost::with_file("/a", vec![1u8; 10]));
        let mut h = FileTransferHandler::new(host.clone());
        h.handle(get_file_envelope("S1", "/a")).await.unwrap();
        assert!(matches!(h.session(), FileTransferSession::Reading { .. }));

        let put_body = UploadRequest {
            src_path: None,
            path: "/out".to_string(),
        }
        .encode()
        .unwrap();
        let resp = h
            .handle(Envelope::new(Proto::FileTransfer, "put_file").with_sid("S1").with_body(put_body))
            .await
            .unwrap();
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "error");
        // The in-progress download's handle must still be the session's handle.
        assert!(matches!(h.session(), FileTransferSession::Reading { .. }));
    }

    #[tokio::test]
    async fn upload_acks_every_window_and_on_eof() {
        let host = Arc::new(MockFileHost::default());
        let mut h = FileTransferHandler::new(host.clone());

        let put_body = UploadRequest {
            src_path: None,
            path: "/out".to_string(),
        }
        .encode()
        .unwrap();
        let resp = h
            .handle(Envelope::new(Proto::FileTransfer, "put_file").with_sid("S1").with_body(put_body))
            .await
            .unwrap();
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "ack");

        for i in 0..WINDOW_SIZE - 1 {
            let resp = h
                .handle(
                    Envelope::new(Proto::FileTransfer, "file_chunk")
                        .with_sid("S1")
                        .with_body(vec![i as u8]),
                )
                .await
                .unwrap();
            assert!(resp.is_empty(), "ack should only arrive at the window boundary");
        }
        let resp = h
            .handle(
                Envelope::new(Proto::FileTransfer, "file_chunk")
                    .with_sid("S1")
                    .with_body(vec![9u8]),
            )
            .await
            .unwrap();
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].typ, "ack");
        assert_eq!(resp[0].status(), Some(Status::Normal));

        let eof_resp = h
            .handle(Envelope::new(Proto::FileTransfer, "file_chunk").with_sid("S1"))
            .await
            .unwrap();
        assert_eq!(eof_resp.len(), 1);
        assert_eq!(eof_resp[0].typ, "ack");
        assert_eq!(host.files.lock().await.get("/out").unwrap().len(), WINDOW_SIZE);
    }
}
