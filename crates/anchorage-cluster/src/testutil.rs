//! Scripted membership provider for unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::provider::{MembershipHandle, MembershipProvider, ProviderError};

/// A provider whose behavior is scripted per test.
pub struct MockProvider {
    pub fail_create: bool,
    pub fail_join: bool,
    pub leave_times_out: bool,
    pub fail_shutdown: bool,
    /// Artificial latency inside `create`, to widen race windows.
    pub create_delay: Duration,
    /// Peer count reported by a successful join.
    pub peers: usize,
    /// Total shutdown calls across all handles this provider created.
    pub shutdown_calls: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            fail_create: false,
            fail_join: false,
            leave_times_out: false,
            fail_shutdown: false,
            create_delay: Duration::ZERO,
            peers: 1,
            shutdown_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

pub struct MockHandle {
    fail_join: bool,
    leave_times_out: bool,
    fail_shutdown: bool,
    peers: usize,
    shutdown_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl MembershipProvider for MockProvider {
    type Handle = MockHandle;

    async fn create(&self, _bind_addr: &str) -> Result<MockHandle, ProviderError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        if self.fail_create {
            return Err(ProviderError::Create("mock create failure".to_string()));
        }
        Ok(MockHandle {
            fail_join: self.fail_join,
            leave_times_out: self.leave_times_out,
            fail_shutdown: self.fail_shutdown,
            peers: self.peers,
            shutdown_calls: Arc::clone(&self.shutdown_calls),
        })
    }
}

#[async_trait]
impl MembershipHandle for MockHandle {
    async fn join(&mut self, seed_addr: &str) -> Result<usize, ProviderError> {
        if self.fail_join {
            return Err(ProviderError::Join(format!("seed {seed_addr} unreachable")));
        }
        Ok(self.peers)
    }

    async fn leave(&mut self, _timeout: Duration) -> Result<(), ProviderError> {
        if self.leave_times_out {
            return Err(ProviderError::LeaveTimeout);
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ProviderError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_shutdown {
            return Err(ProviderError::Shutdown("mock shutdown failure".to_string()));
        }
        Ok(())
    }
}
