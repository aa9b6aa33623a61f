use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use ri_core::Error;
use tokio::sync::oneshot;

struct Slot {
    run: u64,
    sender: oneshot::Sender<()>,
}

/// Single-slot cancellation signal for the install run in flight.
///
/// Each run arms the gate once. A signal consumes the slot, so a second stop
/// request for the same run is rejected instead of being queued.
#[derive(Default)]
pub struct CancellationGate {
    slot: Mutex<Option<Slot>>,
    runs: AtomicU64,
}

impl CancellationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the gate to a new run, replacing whatever slot was left behind.
    pub fn arm(&self) -> CancelListener {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        let (sender, receiver) = oneshot::channel();
        *self.lock() = Some(Slot { run, sender });
        CancelListener {
            run,
            receiver: Some(receiver),
        }
    }

    pub fn signal(&self) -> Result<(), Error> {
        let slot = self.lock().take().ok_or_else(|| Error::CancelRejected {
            reason: "no cancellable run is armed".to_string(),
        })?;
        slot.sender.send(()).map_err(|_| Error::CancelRejected {
            reason: "the run has already finished".to_string(),
        })
    }

    /// Release the slot held by `listener`'s run. Slots armed by later runs
    /// are left alone.
    pub fn disarm(&self, listener: &CancelListener) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|s| s.run == listener.run) {
            *slot = None;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Slot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct CancelListener {
    run: u64,
    receiver: Option<oneshot::Receiver<()>>,
}

impl CancelListener {
    /// Resolves once the gate is signalled for this run. Pends forever if the
    /// slot is dropped without a signal, or after it has already fired once.
    pub async fn cancelled(&mut self) {
        if let Some(receiver) = self.receiver.take()
            && receiver.await.is_ok()
        {
            return;
        }
        std::future::pending::<()>().await
    }
}
