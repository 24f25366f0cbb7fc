use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Cloneable stop flag shared between the decode thread and whoever asks it
/// to stop. Setting it never touches pipeline resources; the owner of those
/// observes the flag and releases them on its own thread.
#[derive(Debug, Clone, Default)]
pub struct SignalOfStop {
    shared: Arc<SharedState>,
}

#[derive(Debug, Default)]
struct SharedState {
    closing: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SignalOfStop {
    pub fn new() -> SignalOfStop {
        SignalOfStop::default()
    }

    pub fn cancel(&self) {
        self.shared.closing.store(true, Ordering::Release);

        // Lock briefly so a waiter cannot miss the notification
        let _guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.shared.condvar.notify_all();
    }

    pub fn cancelled(&self) -> bool {
        self.shared.closing.load(Ordering::Acquire)
    }

    /// Block until `cancel` is called from any clone.
    pub fn wait_cancellation(&self) {
        let mut guard = self
            .shared
            .mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while !self.cancelled() {
            guard = self
                .shared
                .condvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let sos = SignalOfStop::new();
        let other = sos.clone();
        assert!(!other.cancelled());
        sos.cancel();
        assert!(other.cancelled());
        sos.cancel();
        assert!(other.cancelled());
    }

    #[test]
    fn test_wait_cancellation_wakes_up() {
        let sos = SignalOfStop::new();
        let waiter = {
            let sos = sos.clone();
            thread::spawn(move || sos.wait_cancellation())
        };
        thread::sleep(Duration::from_millis(20));
        sos.cancel();
        waiter.join().unwrap();
    }
}
