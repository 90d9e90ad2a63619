//! Frame admission control
//!
//! One frame in flight at a time. The permit handed to the owner of an
//! admitted frame releases the gate when dropped, so every exit path
//! (success, failure, cancellation, panic unwind) releases exactly once.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Frame sequence numbers, increasing across every gate that shares them
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    last: Arc<AtomicU64>,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Single-slot gate in front of the frame pipeline
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    slot: Arc<Semaphore>,
    admitted: Arc<AtomicU64>,
    sequence: FrameSequence,
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::with_sequence(FrameSequence::new())
    }

    /// Gate numbering its frames from a sequence that outlives it
    pub fn with_sequence(sequence: FrameSequence) -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            admitted: Arc::new(AtomicU64::new(0)),
            sequence,
        }
    }

    /// Claim the slot without waiting
    pub fn try_claim(&self) -> Option<FramePermit> {
        let permit = self.slot.clone().try_acquire_owned().ok()?;
        self.admitted.fetch_add(1, Ordering::SeqCst);
        let seq = self.sequence.next();
        Some(FramePermit { _permit: permit, seq })
    }

    /// Whether a frame is currently in flight
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Number of frames admitted through this gate
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Refuse all further claims
    pub fn close(&self) {
        self.slot.close();
    }
}

/// Proof of ownership of the in-flight slot
#[derive(Debug)]
pub struct FramePermit {
    _permit: OwnedSemaphorePermit,
    seq: u64,
}

impl FramePermit {
    /// Sequence number of the admitted frame, starting at 1 for a fresh sequence
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Pending "capture and translate now" request
#[derive(Debug, Clone, Default)]
pub struct CaptureRequest {
    pending: Arc<AtomicBool>,
}

impl CaptureRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for the next available frame to be processed
    pub fn request(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Consume a pending request
    pub fn take(&self) -> bool {
        self.pending
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Which frames are processed once the gate is free
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Only frames arriving after a capture request
    #[default]
    OnDemand,
    /// Every frame that finds the gate free
    Continuous,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_one_claim_at_a_time() {
        let gate = AdmissionGate::new();
        let first = gate.try_claim().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_claim().is_none());

        drop(first);

        assert!(!gate.is_busy());
        let second = gate.try_claim().unwrap();
        assert_eq!(second.seq(), 2);
    }

    #[test]
    fn test_shared_sequence_continues_across_gates() {
        let sequence = FrameSequence::new();
        let first = AdmissionGate::with_sequence(sequence.clone());
        drop(first.try_claim().unwrap());
        drop(first.try_claim().unwrap());
        first.close();

        let second = AdmissionGate::with_sequence(sequence.clone());
        let permit = second.try_claim().unwrap();

        assert_eq!(permit.seq(), 3);
        assert_eq!(second.admitted(), 1);
    }

    #[test]
    fn test_clones_share_the_slot() {
        let gate = AdmissionGate::new();
        let other = gate.clone();
        let _permit = gate.try_claim().unwrap();
        assert!(other.try_claim().is_none());
    }

    #[test]
    fn test_release_on_panic() {
        let gate = AdmissionGate::new();
        let inner = gate.clone();
        let result = std::panic::catch_unwind(move || {
            let _permit = inner.try_claim().unwrap();
            panic!("recognition blew up");
        });
        assert!(result.is_err());
        assert!(gate.try_claim().is_some());
    }

    #[test]
    fn test_closed_gate_refuses() {
        let gate = AdmissionGate::new();
        gate.close();
        assert!(gate.try_claim().is_none());
    }

    #[test]
    fn test_capture_request_consumed_once() {
        let request = CaptureRequest::new();
        assert!(!request.take());
        request.request();
        request.request();
        assert!(request.is_pending());
        assert!(request.take());
        assert!(!request.take());
    }

    #[test]
    fn test_many_threads_single_winner() {
        let gate = AdmissionGate::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.try_claim().map(std::mem::forget).is_some()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
