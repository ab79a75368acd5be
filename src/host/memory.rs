//! In-memory response.
//!
//! Captures every frame the transport writes. Used by tests, benchmarks,
//! and hosts that hand frames to their own writer.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::trace;

use crate::error::{Error, Result};

use super::Response;

// ============================================================================
// MemoryResponse
// ============================================================================

/// A [`Response`] that records written frames.
#[derive(Debug)]
pub struct MemoryResponse {
    /// Frames in write order.
    frames: Mutex<Vec<String>>,
    /// Client liveness as reported to the transport.
    connected: AtomicBool,
    /// Last buffering mode requested by the transport.
    buffering: AtomicBool,
    /// Reject writes with a connection error.
    fail_writes: AtomicBool,
    /// Wakes [`wait_for_frames`](Self::wait_for_frames).
    written: Notify,
}

impl Default for MemoryResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryResponse {
    /// Creates a connected, buffering response.
    #[must_use]
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            buffering: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            written: Notify::new(),
        }
    }

    /// Returns a copy of every frame written so far.
    #[must_use]
    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().clone()
    }

    /// Returns the number of frames written so far.
    #[inline]
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    /// Returns `true` if buffering is enabled.
    #[inline]
    #[must_use]
    pub fn is_buffering(&self) -> bool {
        self.buffering.load(Ordering::Acquire)
    }

    /// Simulates the client going away.
    pub fn disconnect_client(&self) {
        self.connected.store(false, Ordering::Release);
        self.written.notify_waiters();
    }

    /// Makes subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Waits until at least `count` frames have been written.
    pub async fn wait_for_frames(&self, count: usize) {
        loop {
            let notified = self.written.notified();
            if self.frame_count() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Response for MemoryResponse {
    fn set_buffering(&self, enabled: bool) {
        self.buffering.store(enabled, Ordering::Release);
    }

    fn is_client_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn write(&self, data: &str) -> Result<()> {
        if !self.is_client_connected() {
            return Err(Error::ConnectionClosed);
        }
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(Error::connection("write rejected"));
        }

        self.frames.lock().push(data.to_owned());
        trace!(bytes = data.len(), "Frame captured");
        self.written.notify_waiters();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    #[tokio::test]
    async fn test_write_records_frames() {
        let response = MemoryResponse::new();
        response.write("a").await.unwrap();
        response.write("b").await.unwrap();
        assert_eq!(response.frames(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_write_after_client_gone_fails() {
        let response = MemoryResponse::new();
        response.disconnect_client();
        assert!(!response.is_client_connected());
        assert!(matches!(response.write("a").await, Err(Error::ConnectionClosed)));
        assert_eq!(response.frame_count(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let response = MemoryResponse::new();
        response.set_fail_writes(true);
        assert!(response.write("a").await.unwrap_err().is_connection_error());
        response.set_fail_writes(false);
        response.write("a").await.unwrap();
    }

    #[test]
    fn test_buffering_toggle() {
        let response = MemoryResponse::new();
        assert!(response.is_buffering());
        response.set_buffering(false);
        assert!(!response.is_buffering());
    }

    #[tokio::test]
    async fn test_wait_for_frames() {
        let response = Arc::new(MemoryResponse::new());
        let writer = Arc::clone(&response);
        let handle = tokio::spawn(async move {
            writer.write("x").await.unwrap();
            writer.write("y").await.unwrap();
        });
        response.wait_for_frames(2).await;
        assert_eq!(response.frame_count(), 2);
        handle.await.unwrap();
    }
}
