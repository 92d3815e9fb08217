//! Bounded access to browser sessions.
//!
//! A [`SessionLease`] is the right to use the browser for one job; it holds a
//! semaphore permit until dropped. Pages opened through a lease are wrapped in
//! [`PageLease`], which closes the tab when it goes out of scope.

use crate::actions::{PageHandle, PageProvider};
use crate::error::{BrowserError, Result};
use crate::fingerprint::PageProfile;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Hands out at most `max_sessions` concurrent sessions.
#[derive(Clone)]
pub struct BrowserPool {
    provider: Arc<dyn PageProvider>,
    profile: PageProfile,
    permits: Arc<Semaphore>,
}

impl BrowserPool {
    pub fn new(provider: Arc<dyn PageProvider>, profile: PageProfile, max_sessions: usize) -> Self {
        Self {
            provider,
            profile,
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
        }
    }

    /// Wait for a free session.
    ///
    /// # Errors
    /// Returns `BrowserError::PoolClosed` after [`BrowserPool::close`].
    pub async fn acquire(&self) -> Result<SessionLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| BrowserError::PoolClosed)?;

        Ok(SessionLease {
            provider: Arc::clone(&self.provider),
            profile: self.profile.clone(),
            _permit: permit,
        })
    }

    /// Sessions not currently leased.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse further leases. Outstanding leases stay valid.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Exclusive use of one browser session.
pub struct SessionLease {
    provider: Arc<dyn PageProvider>,
    profile: PageProfile,
    _permit: OwnedSemaphorePermit,
}

impl SessionLease {
    /// Open a fresh tab with the pool's profile applied.
    pub async fn open_page(&self) -> Result<PageLease> {
        let page = self.provider.new_page(&self.profile).await?;
        Ok(PageLease::new(page))
    }

    pub fn profile(&self) -> &PageProfile {
        &self.profile
    }
}

/// An open tab that is closed on drop.
pub struct PageLease {
    page: Option<Box<dyn PageHandle>>,
    runtime: Option<tokio::runtime::Handle>,
}

impl PageLease {
    fn new(page: Box<dyn PageHandle>) -> Self {
        Self {
            page: Some(page),
            runtime: tokio::runtime::Handle::try_current().ok(),
        }
    }

    /// Close the tab now and report the outcome.
    pub async fn release(mut self) -> Result<()> {
        match self.page.take() {
            Some(page) => page.close().await,
            None => Ok(()),
        }
    }
}

impl Deref for PageLease {
    type Target = dyn PageHandle;

    fn deref(&self) -> &Self::Target {
        match self.page.as_deref() {
            Some(page) => page,
            // `page` is only taken by `release`, which consumes the lease.
            None => unreachable!("page lease used after release"),
        }
    }
}

impl Drop for PageLease {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match &self.runtime {
            Some(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = page.close().await {
                        tracing::warn!("Page cleanup on drop failed: {}", e);
                    }
                });
            }
            None => tracing::warn!("Dropping page outside a runtime; tab left open"),
        }
    }
}
