use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::StoreError;

/// Cooperative cancellation token.
///
/// Callers clone the token and hand it down into store and filesystem
/// operations; those check it at each I/O boundary and abort with
/// [`StoreError::Canceled`]. There are no suspend points — an operation
/// either completes or unwinds at the next check.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that never fires, for callers with no cancellation source.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<(), StoreError> {
        if self.is_canceled() {
            Err(StoreError::Canceled)
        } else {
            Ok(())
        }
    }
}
