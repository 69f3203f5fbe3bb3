use std::{
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    /// Worker slots stayed occupied until the deadline (retryable)
    #[error("Admission exhausted: no worker slot before deadline")]
    Exhausted,
    /// Caller deadline or cancellation fired while waiting for a ticket
    #[error("Admission cancelled while waiting for a ticket")]
    Cancelled,
}

/// Why a call's wait ended early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Deadline,
    Cancelled,
}

/// Deadline and cancellation carried by one redirect call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancellation: Option<CancellationToken>,
}

impl CallContext {
    /// No deadline and no cancellation
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Apply an upper bound of `limit` from now, keeping a tighter caller deadline.
    pub fn bounded_by(mut self, limit: Duration) -> Self {
        let bound = Instant::now() + limit;
        self.deadline = Some(match self.deadline {
            Some(deadline) => deadline.min(bound),
            None => bound,
        });
        self
    }

    async fn interrupted(&self) -> Interrupt {
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Interrupt::Cancelled,
            _ = deadline => Interrupt::Deadline,
        }
    }
}

/// Live count of admitted calls, shared with the pool monitor
#[derive(Debug, Clone, Default)]
pub struct ActiveWorkers(Arc<AtomicI64>);

impl ActiveWorkers {
    pub fn current(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    fn enter(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    fn exit(&self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Both gates held by one admitted call.
///
/// Dropping the permit returns the ticket and the worker slot, on every exit
/// path including errors, panics and cancelled futures.
#[derive(Debug)]
pub struct AdmissionPermit {
    _ticket: OwnedSemaphorePermit,
    _slot: OwnedSemaphorePermit,
    active: ActiveWorkers,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.active.exit();
    }
}

/// Two-stage gate every redirect passes before doing any work:
/// a weighted ticket pool (global ceiling) then a worker slot pool
/// (local ceiling).
pub struct AdmissionController {
    tickets: Arc<Semaphore>,
    slots: Arc<Semaphore>,
    max_tickets: usize,
    worker_slots: usize,
    active: ActiveWorkers,
}

impl AdmissionController {
    pub const DEFAULT_MAX_TICKETS: usize = 5000;
    pub const DEFAULT_WORKER_SLOTS: usize = 500;
    /// Units one redirect call takes from the ticket pool
    const REQUEST_WEIGHT: u32 = 1;

    pub fn new(max_tickets: usize, worker_slots: usize) -> Self {
        Self {
            tickets: Arc::new(Semaphore::new(max_tickets)),
            slots: Arc::new(Semaphore::new(worker_slots)),
            max_tickets,
            worker_slots,
            active: ActiveWorkers::default(),
        }
    }

    /// Acquire a ticket, then a worker slot, within the call's deadline.
    ///
    /// A ticket obtained before a slot failure is returned immediately, so a
    /// failed call never holds either gate.
    pub async fn acquire(&self, ctx: &CallContext) -> Result<AdmissionPermit, AdmissionError> {
        let ticket = tokio::select! {
            biased;
            acquired = self.tickets.clone().acquire_many_owned(Self::REQUEST_WEIGHT) => {
                acquired.map_err(|_| AdmissionError::Cancelled)?
            }
            _ = ctx.interrupted() => return Err(AdmissionError::Cancelled),
        };

        let slot = match self.slots.clone().try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => {
                tracing::debug!(
                    worker_slots = %self.worker_slots,
                    "Worker pool full, waiting for a slot"
                );
                tokio::select! {
                    biased;
                    acquired = self.slots.clone().acquire_owned() => {
                        acquired.map_err(|_| AdmissionError::Exhausted)?
                    }
                    interrupt = ctx.interrupted() => {
                        return Err(match interrupt {
                            Interrupt::Cancelled => AdmissionError::Cancelled,
                            Interrupt::Deadline => AdmissionError::Exhausted,
                        });
                    }
                }
            }
            Err(TryAcquireError::Closed) => return Err(AdmissionError::Exhausted),
        };

        self.active.enter();
        Ok(AdmissionPermit {
            _ticket: ticket,
            _slot: slot,
            active: self.active.clone(),
        })
    }

    pub fn active_workers(&self) -> ActiveWorkers {
        self.active.clone()
    }

    pub fn available_tickets(&self) -> usize {
        self.tickets.available_permits()
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    pub fn max_tickets(&self) -> usize {
        self.max_tickets
    }

    pub fn worker_slots(&self) -> usize {
        self.worker_slots
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_TICKETS, Self::DEFAULT_WORKER_SLOTS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permit_holds_and_releases_both_gates() {
        let admission = AdmissionController::new(10, 2);
        let permit = admission.acquire(&CallContext::new()).await.unwrap();

        assert_eq!(admission.available_tickets(), 9);
        assert_eq!(admission.available_slots(), 1);
        assert_eq!(admission.active_workers().current(), 1);

        drop(permit);
        assert_eq!(admission.available_tickets(), 10);
        assert_eq!(admission.available_slots(), 2);
        assert_eq!(admission.active_workers().current(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ticket_wait_past_deadline_is_cancelled() {
        let admission = AdmissionController::new(1, 5);
        let _held = admission.acquire(&CallContext::new()).await.unwrap();

        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let result = admission.acquire(&ctx).await;

        assert_eq!(result.unwrap_err(), AdmissionError::Cancelled);
        assert_eq!(admission.available_slots(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slot_wait_past_deadline_is_exhausted_and_returns_ticket() {
        let admission = AdmissionController::new(10, 1);
        let _held = admission.acquire(&CallContext::new()).await.unwrap();

        let ctx = CallContext::new().with_timeout(Duration::from_millis(50));
        let result = admission.acquire(&ctx).await;

        assert_eq!(result.unwrap_err(), AdmissionError::Exhausted);
        // Only the held call's ticket is still out.
        assert_eq!(admission.available_tickets(), 9);
        assert_eq!(admission.active_workers().current(), 1);
    }

    #[tokio::test]
    async fn token_cancellation_during_slot_wait_is_cancelled() {
        let admission = AdmissionController::new(10, 1);
        let _held = admission.acquire(&CallContext::new()).await.unwrap();

        let token = CancellationToken::new();
        let ctx = CallContext::new().with_cancellation(token.clone());
        token.cancel();

        let result = admission.acquire(&ctx).await;
        assert_eq!(result.unwrap_err(), AdmissionError::Cancelled);
        assert_eq!(admission.available_tickets(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_call_admitted_once_slot_frees() {
        let admission = Arc::new(AdmissionController::new(10, 1));
        let held = admission.acquire(&CallContext::new()).await.unwrap();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move {
                let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
                admission.acquire(&ctx).await.map(|_permit| ())
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap(), Ok(()));
        assert_eq!(admission.available_slots(), 1);
        assert_eq!(admission.available_tickets(), 10);
    }

    #[test]
    fn bounded_by_keeps_tighter_deadline() {
        let caller = Instant::now() + Duration::from_secs(1);
        let ctx = CallContext::new()
            .with_deadline(caller)
            .bounded_by(Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(caller));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_by_caps_missing_or_loose_deadline() {
        let now = Instant::now();
        let ctx = CallContext::new().bounded_by(Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(10)));

        let loose = CallContext::new()
            .with_timeout(Duration::from_secs(60))
            .bounded_by(Duration::from_secs(10));
        assert_eq!(loose.deadline(), Some(now + Duration::from_secs(10)));
    }
}
