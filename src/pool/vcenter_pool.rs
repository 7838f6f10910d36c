use super::throttle_pool::ThrottlePool;
use crate::error::ScraperError;
use crate::helper::cancellable;
use crate::vsphere::{RestSession, Session, VSphereApi};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;

const ACQUIRE_ATTEMPTS: usize = 2;

/// Exclusive use of one pooled session. The token goes back to the pool
/// when the lease is released or dropped, whichever happens first.
#[derive(Debug)]
pub struct ClientLease {
    session: Session,
    _permit: OwnedSemaphorePermit,
}

impl ClientLease {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn release(self) {}
}

#[derive(Debug)]
pub struct RestLease {
    rest: RestSession,
    _lease: ClientLease,
}

impl RestLease {
    pub fn session(&self) -> &RestSession {
        &self.rest
    }

    pub fn release(self) {}
}

/// Fixed number of leases over one authenticated session.
pub struct VCenterPool {
    api: Arc<dyn VSphereApi>,
    throttle: ThrottlePool,
    session: RwLock<Option<Session>>,
    reauth_active: Mutex<()>,
    reauth_backoff: Duration,
}

impl VCenterPool {
    pub fn new(
        api: Arc<dyn VSphereApi>,
        size: usize,
        reauth_backoff: Duration,
    ) -> Result<Self, ScraperError> {
        Ok(Self {
            api,
            throttle: ThrottlePool::new(size)?,
            session: RwLock::new(None),
            reauth_active: Mutex::new(()),
            reauth_backoff,
        })
    }

    pub fn api(&self) -> &Arc<dyn VSphereApi> {
        &self.api
    }

    pub fn size(&self) -> usize {
        self.throttle.size()
    }

    pub fn available(&self) -> usize {
        self.throttle.available()
    }

    pub async fn init(&self) -> Result<(), ScraperError> {
        self.reauthenticate().await
    }

    /// Single-flight login. Holds every token while the session is swapped so
    /// no leaseholder can see a half-replaced session.
    pub async fn reauthenticate(&self) -> Result<(), ScraperError> {
        let _guard = self
            .reauth_active
            .try_lock()
            .map_err(|_| ScraperError::ReauthenticateAlreadyInProgress)?;

        let _drained = self.throttle.drain().await?;
        log::info!("[pool] (re)authenticating with {} tokens drained", self.size());
        let session = self.api.login().await?;
        *self.session.write() = Some(session);
        Ok(())
    }

    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<ClientLease, ScraperError> {
        let mut auth_err: Option<ScraperError> = None;
        for _ in 0..ACQUIRE_ATTEMPTS {
            let permit = self.throttle.acquire(cancel).await?;
            let session = self.session.read().clone();
            if let Some(session) = session {
                if cancellable(cancel, self.api.session_active(&session)).await? {
                    return Ok(ClientLease {
                        session,
                        _permit: permit,
                    });
                }
            }
            drop(permit);

            match self.reauthenticate().await {
                Ok(()) => {}
                Err(ScraperError::ReauthenticateAlreadyInProgress) => {
                    log::debug!("[pool] reauthentication in progress, retry in {:?}", self.reauth_backoff);
                    cancellable(cancel, async {
                        tokio::time::sleep(self.reauth_backoff).await;
                        Ok(())
                    })
                    .await?;
                }
                Err(e) => {
                    auth_err = Some(e);
                    break;
                }
            }
        }
        let reason = auth_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "session not active after login".to_string());
        Err(ScraperError::Reauthentication(reason))
    }

    pub async fn acquire_rest(&self, cancel: &CancellationToken) -> Result<RestLease, ScraperError> {
        let lease = self.acquire(cancel).await?;
        let rest = cancellable(cancel, self.api.rest_login(lease.session())).await?;
        Ok(RestLease { rest, _lease: lease })
    }

    pub async fn destroy(&self) {
        self.throttle.close();
        let session = self.session.write().take();
        if let Some(session) = session {
            if let Err(e) = self.api.logout(&session).await {
                log::warn!("[pool] logout failed: {}", e);
            }
        }
    }
}
