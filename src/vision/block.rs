//! Recognized text blocks and their frame-to-frame identity

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Default size in pixels of the grid used to coarsen block centers
pub const DEFAULT_ID_QUANTUM: i32 = 10;

/// Axis-aligned bounding box in screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockBounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BlockBounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    /// Build from an (x, y, width, height) tuple
    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Integer center of the box
    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }

    /// Smallest box containing both
    pub fn union(&self, other: &BlockBounds) -> BlockBounds {
        BlockBounds {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

/// Stable identifier of a text block across frames
///
/// Derived from the text content and the block center snapped to a grid, so
/// small jitter of the bounding box keeps the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(String);

impl BlockId {
    pub fn derive(text: &str, bounds: &BlockBounds, quantum: i32) -> Self {
        let quantum = quantum.max(1);
        let digest = Sha256::digest(text.as_bytes());
        let hash: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        let (cx, cy) = bounds.center();
        BlockId(format!(
            "{}_{}_{}",
            hash,
            cx.div_euclid(quantum),
            cy.div_euclid(quantum)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A recognized text region
#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    /// Recognized text, lines separated by `\n`
    pub text: String,
    /// Bounding box of the whole block
    pub bounds: BlockBounds,
    /// Stable identifier
    pub id: BlockId,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, bounds: BlockBounds) -> Self {
        Self::with_quantum(text, bounds, DEFAULT_ID_QUANTUM)
    }

    pub fn with_quantum(text: impl Into<String>, bounds: BlockBounds, quantum: i32) -> Self {
        let text = text.into();
        let id = BlockId::derive(&text, &bounds, quantum);
        Self { text, bounds, id }
    }
}
