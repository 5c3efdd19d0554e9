//! Single-flight refresh of expired sessions.
//!
//! Refresh tokens are frequently single-use, so concurrent requests that carry the
//! same session must not each call the identity provider. The first request for a
//! session key registers an in-flight entry and spawns the refresh; everyone else
//! arriving for that key awaits the same shared outcome.
//!
//! - The map lock is held only for check-and-insert, never across the refresh.
//! - The refresh runs in its own task: a cancelled request only stops waiting.
//! - Entries are released when the refresh completes. Successful outcomes may be
//!   kept for a short reuse window so requests still carrying the pre-rotation
//!   cookie do not replay a spent refresh token.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use sha2::{Digest, Sha256};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::services::auth::issuer::{IssuedTokens, IssuerError, TokenIssuer};
use crate::services::auth::session::SessionState;

type RefreshOutcome = Result<IssuedTokens, IssuerError>;
type SharedOutcome = Shared<BoxFuture<'static, RefreshOutcome>>;

struct Flight {
    id: u64,
    outcome: SharedOutcome,
}

/// Removes a flight from the map when dropped, including on panic or shutdown.
struct FlightRelease {
    in_flight: Arc<DashMap<String, Flight>>,
    key: String,
    id: u64,
}

impl Drop for FlightRelease {
    fn drop(&mut self) {
        self.in_flight.remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

#[derive(Clone)]
pub struct RenewalCoordinator {
    issuer: Arc<dyn TokenIssuer>,
    in_flight: Arc<DashMap<String, Flight>>,
    next_id: Arc<AtomicU64>,
    reuse_window: Duration,
}

impl std::fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalCoordinator")
            .field("in_flight", &self.in_flight.len())
            .field("reuse_window", &self.reuse_window)
            .finish()
    }
}

impl RenewalCoordinator {
    pub fn new(issuer: Arc<dyn TokenIssuer>, reuse_window: Duration) -> Self {
        Self {
            issuer,
            in_flight: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(0)),
            reuse_window,
        }
    }

    /// Number of sessions with a refresh in flight (or inside the reuse window).
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Refresh `session`, joining an in-flight refresh for the same session if any.
    pub async fn renew(&self, session: &SessionState) -> RefreshOutcome {
        let key = session_key(&session.refresh_token);

        let (outcome, leader) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(session = %short(&key), "joining in-flight refresh");
                (entry.get().outcome.clone(), None)
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel::<RefreshOutcome>();
                let outcome = async move {
                    rx.await.unwrap_or_else(|_| {
                        Err(IssuerError::Unavailable("refresh task aborted".to_string()))
                    })
                }
                .boxed()
                .shared();

                entry.insert(Flight {
                    id,
                    outcome: outcome.clone(),
                });
                (outcome, Some((id, tx)))
            }
        };

        if let Some((id, tx)) = leader {
            self.spawn_refresh(key, id, session.refresh_token.clone(), tx);
        }

        outcome.await
    }

    fn spawn_refresh(
        &self,
        key: String,
        id: u64,
        refresh_token: String,
        tx: oneshot::Sender<RefreshOutcome>,
    ) {
        let issuer = Arc::clone(&self.issuer);
        let reuse_window = self.reuse_window;
        let release = FlightRelease {
            in_flight: Arc::clone(&self.in_flight),
            key,
            id,
        };

        tokio::spawn(async move {
            info!(session = %short(&release.key), "refreshing session");
            let outcome = issuer.refresh(&refresh_token).await;

            match &outcome {
                Ok(_) => debug!(session = %short(&release.key), "session refreshed"),
                Err(err) => warn!(session = %short(&release.key), error = %err, "session refresh failed"),
            }

            if outcome.is_ok() && !reuse_window.is_zero() {
                let _ = tx.send(outcome);
                tokio::time::sleep(reuse_window).await;
                drop(release);
            } else {
                // Release before publishing so a retry after a failure starts afresh.
                drop(release);
                let _ = tx.send(outcome);
            }
        });
    }
}

/// Map key for a session: digest of the refresh token, never the token itself.
pub fn session_key(refresh_token: &str) -> String {
    format!("{:x}", Sha256::digest(refresh_token.as_bytes()))
}

fn short(key: &str) -> &str {
    &key[..key.len().min(12)]
}
