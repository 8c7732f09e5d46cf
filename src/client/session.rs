//! Session guard: transparent re-authentication on session expiry.
//!
//! Every remote call goes through the guard. When the control plane reports
//! an expired session the guard re-establishes it and retries the call
//! exactly once; a second consecutive expiry, or any other failure,
//! propagates unchanged. Renewal is a critical section: concurrent batch
//! workers that hit expiry together perform one login and share the new
//! token.

use crate::client::remote::{
    AuthProvider, RemoteApi, RemoteOutcome, RemoteRequest, SessionToken, TaskHandle, TaskStatus,
};
use crate::models::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

struct TokenSlot {
    generation: u64,
    token: Arc<SessionToken>,
}

/// Wraps a [`RemoteApi`] with single-retry session renewal.
pub struct SessionGuard {
    api: Arc<dyn RemoteApi>,
    auth: Arc<dyn AuthProvider>,
    slot: RwLock<TokenSlot>,
    renewal: tokio::sync::Mutex<()>,
}

impl SessionGuard {
    /// Log in and construct the guard around an established session.
    pub async fn establish(api: Arc<dyn RemoteApi>, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let token = auth.login().await?;
        debug!("Session established");
        Ok(Self {
            api,
            auth,
            slot: RwLock::new(TokenSlot {
                generation: 0,
                token: Arc::new(token),
            }),
            renewal: tokio::sync::Mutex::new(()),
        })
    }

    /// Perform a remote operation, renewing the session once on expiry.
    pub async fn execute(&self, request: &RemoteRequest) -> Result<RemoteOutcome> {
        let (token, generation) = self.current();
        match self.api.execute(&token, request).await {
            Err(e) if e.is_session_expired() => {
                warn!(operation = %request.operation, "Session expired, re-authenticating");
                let token = self.renew(generation).await?;
                self.api.execute(&token, request).await
            }
            other => other,
        }
    }

    /// Poll an asynchronous task, renewing the session once on expiry.
    pub async fn task_status(&self, handle: &TaskHandle) -> Result<TaskStatus> {
        let (token, generation) = self.current();
        match self.api.task_status(&token, handle).await {
            Err(e) if e.is_session_expired() => {
                warn!(operation = %handle.operation, "Session expired while polling, re-authenticating");
                let token = self.renew(generation).await?;
                self.api.task_status(&token, handle).await
            }
            other => other,
        }
    }

    fn current(&self) -> (Arc<SessionToken>, u64) {
        let slot = self.slot.read();
        (Arc::clone(&slot.token), slot.generation)
    }

    /// Renew the session unless another caller already did.
    ///
    /// `seen_generation` is the generation the failing call used. If the
    /// slot has moved past it by the time we hold the renewal lock, a
    /// concurrent renewal already happened and its token is reused.
    async fn renew(&self, seen_generation: u64) -> Result<Arc<SessionToken>> {
        let _serialized = self.renewal.lock().await;

        {
            let slot = self.slot.read();
            if slot.generation != seen_generation {
                debug!("Reusing token from concurrent renewal");
                return Ok(Arc::clone(&slot.token));
            }
        }

        let token = Arc::new(self.auth.login().await?);
        let mut slot = self.slot.write();
        slot.generation += 1;
        slot.token = Arc::clone(&token);
        debug!(generation = slot.generation, "Session renewed");
        Ok(token)
    }
}
