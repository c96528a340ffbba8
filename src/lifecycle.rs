use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle of one runtime instance.
///
/// ```text
/// Uninitialized -> Loading -> Ready -> Reloading -> Loading
///                     |          \----> Disposed
///                     \--> Disposed (cancelled before the load completed)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Loading = 1,
    Ready = 2,
    Reloading = 3,
    Disposed = 4,
}

impl LifecycleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Loading,
            2 => Self::Ready,
            3 => Self::Reloading,
            _ => Self::Disposed,
        }
    }

    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Loading)
                | (Uninitialized, Disposed)
                | (Loading, Ready)
                | (Loading, Disposed)
                | (Ready, Reloading)
                | (Ready, Disposed)
                | (Reloading, Loading)
                | (Reloading, Disposed)
        )
    }

    /// Mutation commands are only accepted while loading or ready.
    pub fn accepts_mutations(self) -> bool {
        matches!(self, LifecycleState::Loading | LifecycleState::Ready)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Loading => "loading",
            LifecycleState::Ready => "ready",
            LifecycleState::Reloading => "reloading",
            LifecycleState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Atomically published lifecycle state, readable from either thread.
#[derive(Debug, Clone)]
pub struct PublishedState {
    inner: Arc<AtomicU8>,
}

impl PublishedState {
    pub fn new(initial: LifecycleState) -> Self {
        Self {
            inner: Arc::new(AtomicU8::new(initial as u8)),
        }
    }

    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.inner.load(Ordering::Acquire))
    }

    /// Move to `next` if the state machine allows it from the current state.
    /// Returns the state observed before the attempt on failure.
    pub fn transition(&self, next: LifecycleState) -> Result<LifecycleState, LifecycleState> {
        let mut current = self.inner.load(Ordering::Acquire);
        loop {
            let state = LifecycleState::from_u8(current);
            if !state.can_transition_to(next) {
                return Err(state);
            }
            match self.inner.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(state),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.get() == LifecycleState::Disposed
    }
}
