//! Navigation to the platform's subscription-management page.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NavigationError {
    #[error("cannot open {url}: {message}")]
    Unavailable { url: String, message: String },
}

/// Opens external URLs on behalf of the client (the platform's link handler).
#[async_trait]
pub trait ManagementSurface: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), NavigationError>;
}

/// Surface that records every URL it is asked to open.
///
/// Intended for tests/dev; the simulator uses it in place of a real browser.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    opened: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ManagementSurface for RecordingSurface {
    async fn open(&self, url: &str) -> Result<(), NavigationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NavigationError::Unavailable {
                url: url.to_string(),
                message: "no handler for URL".to_string(),
            });
        }
        tracing::debug!("opening {url}");
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(url.to_string());
        Ok(())
    }
}
