//! Once-per-context engine instantiation.
//!
//! The first caller moves the slot from `Unloaded` to `Loading` and runs the
//! loader outside the lock; every caller that arrives meanwhile waits on the
//! condition variable for the same outcome. `Ready` and `Failed` are
//! terminal.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::environment::EngineEnvironment;
use crate::error::EngineLoadError;

/// Observable slot state, without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlotState::Unloaded => "Unloaded",
            SlotState::Loading => "Loading",
            SlotState::Ready => "Ready",
            SlotState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

enum State<T> {
    Unloaded,
    Loading,
    Ready(Arc<T>),
    Failed(EngineLoadError),
}

impl<T> State<T> {
    fn tag(&self) -> SlotState {
        match self {
            State::Unloaded => SlotState::Unloaded,
            State::Loading => SlotState::Loading,
            State::Ready(_) => SlotState::Ready,
            State::Failed(_) => SlotState::Failed,
        }
    }
}

pub struct EngineSlot<T = EngineEnvironment> {
    state: Mutex<State<T>>,
    changed: Condvar,
    instantiations: AtomicUsize,
}

impl<T> fmt::Debug for EngineSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSlot")
            .field("state", &self.state())
            .field("instantiations", &self.instantiations())
            .finish()
    }
}

impl<T> Default for EngineSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EngineSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Unloaded),
            changed: Condvar::new(),
            instantiations: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> SlotState {
        self.lock().tag()
    }

    /// How many times a loader has been started. Never exceeds one.
    pub fn instantiations(&self) -> usize {
        self.instantiations.load(Ordering::Acquire)
    }

    /// The ready environment, if loading has finished successfully.
    ///
    /// # Errors
    ///
    /// `NotLoaded` while unloaded or loading; the stored error once failed.
    pub fn get(&self) -> Result<Arc<T>, EngineLoadError> {
        match &*self.lock() {
            State::Ready(env) => Ok(Arc::clone(env)),
            State::Failed(e) => Err(e.clone()),
            State::Unloaded | State::Loading => Err(EngineLoadError::NotLoaded),
        }
    }

    /// Return the environment, running `load` if this is the first request.
    ///
    /// Callers racing on an unloaded slot block until the single in-flight
    /// load settles, then all observe its result. A loader that panics
    /// leaves the slot `Failed(Poisoned)`.
    pub fn get_or_load<F>(&self, load: F) -> Result<Arc<T>, EngineLoadError>
    where
        F: FnOnce() -> Result<T, EngineLoadError>,
    {
        let mut state = self.lock();
        loop {
            match &*state {
                State::Ready(env) => return Ok(Arc::clone(env)),
                State::Failed(e) => return Err(e.clone()),
                State::Unloaded => break,
                State::Loading => {}
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *state = State::Loading;
        self.instantiations.fetch_add(1, Ordering::AcqRel);
        drop(state);
        info!("engine slot: Unloaded -> Loading");

        let guard = LoadGuard { slot: self, settled: false };
        guard.settle(load())
    }

    /// The loader never runs under this lock, so poisoning cannot leave a
    /// half-written state behind.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, next: State<T>) {
        let tag = next.tag();
        *self.lock() = next;
        self.changed.notify_all();
        match tag {
            SlotState::Failed => warn!("engine slot: Loading -> Failed"),
            _ => info!("engine slot: Loading -> {}", tag),
        }
    }
}

/// Settles the slot exactly once, falling back to `Failed(Poisoned)` if the
/// loader unwinds.
struct LoadGuard<'a, T> {
    slot: &'a EngineSlot<T>,
    settled: bool,
}

impl<T> LoadGuard<'_, T> {
    fn settle(mut self, result: Result<T, EngineLoadError>) -> Result<Arc<T>, EngineLoadError> {
        self.settled = true;
        match result {
            Ok(env) => {
                let env = Arc::new(env);
                self.slot.transition(State::Ready(Arc::clone(&env)));
                Ok(env)
            }
            Err(e) => {
                self.slot.transition(State::Failed(e.clone()));
                Err(e)
            }
        }
    }
}

impl<T> Drop for LoadGuard<'_, T> {
    fn drop(&mut self) {
        if !self.settled {
            self.slot.transition(State::Failed(EngineLoadError::Poisoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_first_load_then_reuse() {
        let slot = EngineSlot::<String>::new();
        assert_eq!(slot.state(), SlotState::Unloaded);
        assert_eq!(slot.get(), Err(EngineLoadError::NotLoaded));

        let a = slot.get_or_load(|| Ok("engine".to_string())).unwrap();
        let b = slot.get_or_load(|| panic!("loader must not run twice")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(slot.state(), SlotState::Ready);
        assert_eq!(slot.instantiations(), 1);
        assert!(Arc::ptr_eq(&slot.get().unwrap(), &a));
    }

    #[test]
    fn test_failure_is_terminal() {
        let slot = EngineSlot::<String>::new();
        let err = EngineLoadError::InvalidModule("bad magic".to_string());
        assert_eq!(slot.get_or_load(|| Err(err.clone())), Err(err.clone()));
        assert_eq!(slot.get_or_load(|| Ok("late".to_string())), Err(err.clone()));
        assert_eq!(slot.get(), Err(err));
        assert_eq!(slot.state(), SlotState::Failed);
        assert_eq!(slot.instantiations(), 1);
    }

    #[test]
    fn test_panicking_loader_poisons_slot() {
        let slot = EngineSlot::<String>::new();
        let result = catch_unwind(AssertUnwindSafe(|| slot.get_or_load(|| panic!("loader crashed"))));
        assert!(result.is_err());
        assert_eq!(slot.state(), SlotState::Failed);
        assert_eq!(slot.get_or_load(|| Ok("x".to_string())), Err(EngineLoadError::Poisoned));
    }

    #[test]
    fn test_racing_callers_share_one_load() {
        const CALLERS: usize = 8;
        let slot = Arc::new(EngineSlot::<usize>::new());
        let loads = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(CALLERS));

        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                let (slot, loads, barrier) = (slot.clone(), loads.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    slot.get_or_load(|| {
                        loads.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok(42)
                    })
                })
            })
            .collect();

        let results: Vec<Arc<usize>> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(slot.instantiations(), 1);
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &results[0])));
    }

    #[test]
    fn test_waiters_receive_load_error() {
        let slot = Arc::new(EngineSlot::<usize>::new());
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (slot, barrier) = (slot.clone(), barrier.clone());
                thread::spawn(move || {
                    barrier.wait();
                    slot.get_or_load(|| {
                        thread::sleep(Duration::from_millis(20));
                        Err(EngineLoadError::Memory("too small".to_string()))
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(
                handle.join().unwrap(),
                Err(EngineLoadError::Memory("too small".to_string()))
            );
        }
        assert_eq!(slot.instantiations(), 1);
    }
}
