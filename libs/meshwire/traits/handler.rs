//! Callback types
//!
//! Callbacks are strongly-typed closures capturing whatever context they
//! need. They run on the client's I/O worker thread, so they should return
//! quickly; anything slow belongs on a channel to another thread.

use crate::error::{MeshError, Result};
use crate::protocol::Message;
use std::sync::Arc;

/// Invoked once per message after its write completes and the response
/// frame was read (or the send failed)
pub type SendCallback = Box<dyn FnOnce(Result<Message>) + Send + 'static>;

/// Invoked each time the client reaches `Ready`
pub type ConnectCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Invoked after every teardown, with the error that caused it if any
pub type DisconnectCallback = Arc<dyn Fn(Option<&MeshError>) + Send + Sync + 'static>;

/// Invoked for failures callers would otherwise not see (reconnect
/// exhaustion, unrepairable responses)
pub type ErrorCallback = Arc<dyn Fn(&MeshError) + Send + Sync + 'static>;

/// Lifecycle callbacks registered on a client
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_connect: Option<ConnectCallback>,
    pub on_disconnect: Option<DisconnectCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Callbacks {
    pub(crate) fn connected(&self) {
        if let Some(ref cb) = self.on_connect {
            cb();
        }
    }

    pub(crate) fn disconnected(&self, cause: Option<&MeshError>) {
        if let Some(ref cb) = self.on_disconnect {
            cb(cause);
        }
    }

    pub(crate) fn error(&self, error: &MeshError) {
        if let Some(ref cb) = self.on_error {
            cb(error);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
