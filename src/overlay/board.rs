//! Render-side overlay state and the commands that mutate it

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, HashSet};
use tracing::trace;

use crate::overlay::widgets::BalloonKind;
use crate::vision::{BlockBounds, BlockId};

/// One overlay balloon
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayEntry {
    pub id: BlockId,
    /// Bounds of the original text
    pub bounds: BlockBounds,
    /// Text currently displayed
    pub text: String,
    /// Whether `text` is a translation, the pending placeholder or the error text
    pub kind: BalloonKind,
    /// Sequence number of the frame that last wrote this entry
    pub frame_seq: u64,
}

/// Instructions marshalled onto the render thread
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayCommand {
    /// Add or update one balloon
    Upsert(OverlayEntry),
    /// Replace the set of balloons with the blocks seen in one frame
    SyncFrame { frame_seq: u64, entries: Vec<OverlayEntry> },
    /// Remove every balloon
    RemoveAll,
}

/// Sending side used by the pipeline; cheap to clone
#[derive(Debug, Clone)]
pub struct OverlayHandle {
    tx: Sender<OverlayCommand>,
}

impl OverlayHandle {
    /// Create a handle and the receiver the render context drains
    pub fn channel() -> (Self, Receiver<OverlayCommand>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }

    pub fn upsert(
        &self,
        id: BlockId,
        bounds: BlockBounds,
        text: impl Into<String>,
        kind: BalloonKind,
        frame_seq: u64,
    ) {
        self.send(OverlayCommand::Upsert(OverlayEntry {
            id,
            bounds,
            text: text.into(),
            kind,
            frame_seq,
        }));
    }

    pub fn sync_frame(&self, frame_seq: u64, entries: Vec<OverlayEntry>) {
        self.send(OverlayCommand::SyncFrame { frame_seq, entries });
    }

    pub fn remove_all(&self) {
        self.send(OverlayCommand::RemoveAll);
    }

    fn send(&self, command: OverlayCommand) {
        // The render context may already be gone during shutdown.
        if self.tx.send(command).is_err() {
            trace!("Overlay render context closed, command dropped");
        }
    }
}

/// Overlay balloons keyed by block id, owned by the render context
#[derive(Debug, Default)]
pub struct OverlayBoard {
    entries: BTreeMap<BlockId, OverlayEntry>,
    /// Newest frame applied by a sync
    synced_seq: u64,
}

impl OverlayBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one command. Writes from frames older than what the board
    /// already shows for an id are ignored.
    pub fn apply(&mut self, command: OverlayCommand) {
        match command {
            OverlayCommand::Upsert(entry) => {
                if entry.frame_seq < self.synced_seq {
                    trace!("Stale upsert for {} from frame {}", entry.id, entry.frame_seq);
                    return;
                }
                self.upsert(entry);
            }
            OverlayCommand::SyncFrame { frame_seq, entries } => {
                if frame_seq < self.synced_seq {
                    trace!("Stale sync from frame {}", frame_seq);
                    return;
                }
                self.synced_seq = frame_seq;
                let seen: HashSet<BlockId> = entries.iter().map(|e| e.id.clone()).collect();
                self.entries.retain(|id, _| seen.contains(id));
                for entry in entries {
                    self.upsert(entry);
                }
            }
            OverlayCommand::RemoveAll => self.entries.clear(),
        }
    }

    fn upsert(&mut self, entry: OverlayEntry) {
        match self.entries.get_mut(&entry.id) {
            Some(existing) if existing.frame_seq > entry.frame_seq => {}
            Some(existing) => *existing = entry,
            None => {
                self.entries.insert(entry.id.clone(), entry);
            }
        }
    }

    /// Apply everything waiting on `rx`; returns how many commands were applied
    pub fn drain(&mut self, rx: &Receiver<OverlayCommand>) -> usize {
        let mut applied = 0;
        while let Ok(command) = rx.try_recv() {
            self.apply(command);
            applied += 1;
        }
        applied
    }

    pub fn get(&self, id: &BlockId) -> Option<&OverlayEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &OverlayEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
