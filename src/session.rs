//! Per-protocol session records. Explicit state enums, not scattered
//! booleans: each handler owns exactly one of these and the engine never
//! inspects more than one field to know whether a session is live.

use crate::host::{ConnHandle, FileHandle};

/// Shell handler session: present `sid` means a shell is live.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellSession {
    sid: Option<String>,
}

impl ShellSession {
    pub fn is_live(&self) -> bool {
        self.sid.is_some()
    }

    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    pub fn start(&mut self, sid: impl Into<String>) {
        self.sid = Some(sid.into());
    }

    pub fn clear(&mut self) {
        self.sid = None;
    }
}

/// File-transfer handler state. `Idle` carries no handle; `Reading`/`Eof`
/// always carry the handle opened for that transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileTransferSession {
    #[default]
    Idle,
    Reading {
        sid: String,
        user_id: Option<String>,
        handle: FileHandle,
    },
    /// An upload in progress; tracked separately from `Reading` since the
    /// handler's inbound-chunk counter only applies to uploads.
    Writing {
        handle: FileHandle,
        chunk_count: u32,
    },
    Eof {
        sid: String,
        user_id: Option<String>,
        handle: FileHandle,
    },
}

impl FileTransferSession {
    pub fn is_idle(&self) -> bool {
        matches!(self, FileTransferSession::Idle)
    }

    pub fn handle(&self) -> Option<FileHandle> {
        match self {
            FileTransferSession::Idle => None,
            FileTransferSession::Reading { handle, .. }
            | FileTransferSession::Writing { handle, .. }
            | FileTransferSession::Eof { handle, .. } => Some(*handle),
        }
    }
}

/// Port-forward handler session: all three fields are present together, or
/// none are.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortForwardSession {
    live: Option<PortForwardLive>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PortForwardLive {
    sid: String,
    connection_id: String,
    handle: ConnHandle,
}

impl PortForwardSession {
    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    pub fn sid(&self) -> Option<&str> {
        self.live.as_ref().map(|l| l.sid.as_str())
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.live.as_ref().map(|l| l.connection_id.as_str())
    }

    pub fn handle(&self) -> Option<ConnHandle> {
        self.live.as_ref().map(|l| l.handle)
    }

    pub fn start(&mut self, sid: impl Into<String>, connection_id: impl Into<String>, handle: ConnHandle) {
        self.live = Some(PortForwardLive {
            sid: sid.into(),
            connection_id: connection_id.into(),
            handle,
        });
    }

    pub fn clear(&mut self) {
        self.live = None;
    }

    pub fn matches(&self, connection_id: &str) -> bool {
        self.connection_id() == Some(connection_id)
    }
}
