//! Background renewal of resolver credentials.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use super::ResolveError;
use crate::error::WorkerError;

const HOUR: Duration = Duration::from_secs(3600);
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// A backend whose credential expires and can be refreshed in place.
pub trait RenewableCredential: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Credential lifetime. `None` means it never expires, so no background
    /// renewal is scheduled.
    fn lifetime(&self) -> Option<Duration>;

    fn renew(&self) -> Result<(), ResolveError>;
}

/// How long to wait between renewals of a credential living `lifetime`.
///
/// Renews an hour before expiry, or halfway through for lifetimes of two
/// hours or less.
pub fn renewal_interval(lifetime: Duration) -> Duration {
    let interval = if lifetime > HOUR * 2 {
        lifetime - HOUR
    } else {
        lifetime / 2
    };
    interval.max(MIN_INTERVAL)
}

/// Handle to a running renewal thread. The thread is stopped and joined when
/// the handle is dropped.
pub struct CredentialRenewal {
    backend: &'static str,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CredentialRenewal {
    /// Starts renewing `credential`. Returns `Ok(None)` for credentials that
    /// do not expire.
    pub fn start(credential: Arc<dyn RenewableCredential>) -> Result<Option<Self>, WorkerError> {
        let Some(lifetime) = credential.lifetime() else {
            return Ok(None);
        };
        Self::start_with_interval(credential, renewal_interval(lifetime)).map(Some)
    }

    pub fn start_with_interval(
        credential: Arc<dyn RenewableCredential>,
        interval: Duration,
    ) -> Result<Self, WorkerError> {
        let backend = credential.backend();
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(format!("{}-renewal", backend.to_lowercase()))
            .spawn(move || {
                log::info!("{} credential renewal every {:?}", backend, interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = credential.renew() {
                                log::error!("{}", e);
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::info!("{} credential renewal stopped", backend);
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            backend,
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// Stops the thread and waits for it to exit.
    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{} renewal thread panicked", self.backend);
            }
        }
    }
}

impl Drop for CredentialRenewal {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingCredential {
        renewals: AtomicUsize,
        fail: bool,
        lifetime: Option<Duration>,
    }

    impl CountingCredential {
        fn new(fail: bool, lifetime: Option<Duration>) -> Arc<Self> {
            Arc::new(Self {
                renewals: AtomicUsize::new(0),
                fail,
                lifetime,
            })
        }
    }

    impl RenewableCredential for CountingCredential {
        fn backend(&self) -> &'static str {
            "Test"
        }

        fn lifetime(&self) -> Option<Duration> {
            self.lifetime
        }

        fn renew(&self) -> Result<(), ResolveError> {
            self.renewals.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ResolveError::Renew {
                    backend: "Test",
                    message: "denied".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_renewal_interval() {
        assert_eq!(
            renewal_interval(Duration::from_secs(86_400)),
            Duration::from_secs(86_400 - 3600)
        );
        assert_eq!(
            renewal_interval(Duration::from_secs(3600)),
            Duration::from_secs(1800)
        );
        assert_eq!(renewal_interval(Duration::ZERO), MIN_INTERVAL);
        for secs in [2, 60, 3600, 7200, 7201, 86_400 * 30] {
            let lifetime = Duration::from_secs(secs);
            assert!(renewal_interval(lifetime) < lifetime, "{secs}");
        }
    }

    #[test]
    fn test_renews_until_stopped() {
        let credential = CountingCredential::new(false, Some(Duration::from_secs(60)));
        let mut renewal =
            CredentialRenewal::start_with_interval(credential.clone(), Duration::from_millis(10))
                .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while credential.renewals.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        renewal.stop();

        let count = credential.renewals.load(Ordering::SeqCst);
        assert!(count >= 3);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(credential.renewals.load(Ordering::SeqCst), count);
    }

    #[test]
    fn test_failures_do_not_stop_renewal() {
        let credential = CountingCredential::new(true, Some(Duration::from_secs(60)));
        let renewal =
            CredentialRenewal::start_with_interval(credential.clone(), Duration::from_millis(5))
                .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while credential.renewals.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        drop(renewal);
        assert!(credential.renewals.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn test_drop_stops_promptly() {
        let credential = CountingCredential::new(false, Some(Duration::from_secs(86_400)));
        let renewal = CredentialRenewal::start(credential.clone()).unwrap().unwrap();
        assert_eq!(renewal.backend(), "Test");

        let started = Instant::now();
        drop(renewal);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(credential.renewals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_expiring_credential_is_not_scheduled() {
        let credential = CountingCredential::new(false, None);
        assert!(CredentialRenewal::start(credential).unwrap().is_none());
    }
}
