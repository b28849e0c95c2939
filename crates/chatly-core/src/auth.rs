//! Auth context: who is signed in, and a stream of sign-in/sign-out events.
//!
//! The core never authenticates anyone itself.  An outer layer (the HTTP
//! server, a test) drives the context and components read from it.

use std::sync::Arc;

use chatly_shared::UserId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct AuthContext {
    state: Arc<watch::Sender<Option<Session>>>,
}

impl Default for AuthContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthContext {
    /// A context with nobody signed in.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn signed_in(session: Session) -> Self {
        let ctx = Self::new();
        ctx.sign_in(session);
        ctx
    }

    pub fn sign_in(&self, session: Session) {
        info!(user = %session.user_id, "signed in");
        self.state.send_replace(Some(session));
    }

    pub fn sign_out(&self) {
        if let Some(previous) = self.state.send_replace(None) {
            info!(user = %previous.user_id, "signed out");
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    pub fn current_user_id(&self) -> Option<UserId> {
        self.state.borrow().as_ref().map(|s| s.user_id.clone())
    }

    pub fn current_user_email(&self) -> Option<String> {
        self.state.borrow().as_ref().map(|s| s.email.clone())
    }

    /// Login-state stream.  Yields the current state first, then every
    /// change.
    pub fn changes(&self) -> WatchStream<Option<Session>> {
        WatchStream::new(self.state.subscribe())
    }
}
