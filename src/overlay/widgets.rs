//! Balloon styles for the translation overlay

/// Style configuration for a translation balloon
#[derive(Debug, Clone)]
pub struct BalloonStyle {
    /// Background color (RGBA)
    pub background: [f32; 4],
    /// Text color (RGBA)
    pub text_color: [f32; 4],
    /// Border radius
    pub corner_radius: f32,
    /// Padding
    pub padding: f32,
}

impl Default for BalloonStyle {
    fn default() -> Self {
        Self {
            background: [0.08, 0.08, 0.1, 0.88],
            text_color: [1.0, 1.0, 1.0, 1.0],
            corner_radius: 6.0,
            padding: 6.0,
        }
    }
}

/// What a balloon is currently showing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalloonKind {
    Translated,
    Pending,
    Failed,
}

/// Styles per balloon kind
#[derive(Debug, Clone)]
pub struct BalloonStyles {
    pub translated: BalloonStyle,
    pub pending: BalloonStyle,
    pub failed: BalloonStyle,
}

impl Default for BalloonStyles {
    fn default() -> Self {
        Self {
            translated: BalloonStyle::default(),
            pending: BalloonStyle {
                background: [0.2, 0.2, 0.3, 0.75],
                text_color: [0.85, 0.85, 0.95, 1.0],
                ..Default::default()
            },
            failed: BalloonStyle {
                background: [0.5, 0.1, 0.1, 0.9],
                text_color: [1.0, 0.8, 0.8, 1.0],
                ..Default::default()
            },
        }
    }
}

impl BalloonStyles {
    pub fn for_kind(&self, kind: BalloonKind) -> &BalloonStyle {
        match kind {
            BalloonKind::Translated => &self.translated,
            BalloonKind::Pending => &self.pending,
            BalloonKind::Failed => &self.failed,
        }
    }
}
