//! Tesseract OCR backend
//!
//! Runs the `tesseract` binary with TSV output and groups the word rows into
//! blocks. The image is piped through stdin as PNG, nothing touches disk.

use async_trait::async_trait;
use image::{ImageFormat, RgbaImage};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{BlockBounds, RecognitionError, TextBlock, TextRecognizer, VisionConfig};

/// TSV row level of a single word
const WORD_LEVEL: u32 = 5;

/// OCR engine backed by the Tesseract command line tool
pub struct TesseractRecognizer {
    binary: String,
    language: String,
    min_confidence: f32,
    id_quantum: i32,
}

impl TesseractRecognizer {
    pub fn new(config: &VisionConfig) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            language: config.ocr_language.clone(),
            min_confidence: config.min_confidence,
            id_quantum: config.id_quantum,
        }
    }

    /// Check that the binary can be executed
    pub async fn probe(&self) -> Result<String, RecognitionError> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| RecognitionError::Unavailable(format!("{}: {}", self.binary, e)))?;
        let banner = String::from_utf8_lossy(&output.stdout);
        Ok(banner.lines().next().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    async fn recognize(&self, image: &RgbaImage) -> Result<Vec<TextBlock>, RecognitionError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| RecognitionError::Encode(e.to_string()))?;

        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecognitionError::Unavailable(format!("{}: {}", self.binary, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| RecognitionError::Engine("stdin not captured".to_string()))?;
        stdin.write_all(&png).await?;
        drop(stdin);

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(RecognitionError::Engine(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let blocks = parse_tsv(&tsv, self.min_confidence, self.id_quantum)?;
        debug!("Tesseract: {} blocks in {}x{} image", blocks.len(), image.width(), image.height());
        Ok(blocks)
    }
}

#[derive(Default)]
struct BlockAccumulator {
    lines: BTreeMap<(u32, u32), Vec<String>>,
    bounds: Option<BlockBounds>,
}

/// Group Tesseract TSV word rows into text blocks
///
/// Words of a line are joined with spaces and lines with `\n`; the block box is
/// the union of its word boxes.
pub fn parse_tsv(
    tsv: &str,
    min_confidence: f32,
    id_quantum: i32,
) -> Result<Vec<TextBlock>, RecognitionError> {
    let mut blocks: BTreeMap<(u32, u32), BlockAccumulator> = BTreeMap::new();

    for (line_no, line) in tsv.lines().enumerate() {
        if line_no == 0 && line.starts_with("level") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        let columns: Vec<&str> = line.splitn(12, '\t').collect();
        if columns.len() < 12 {
            trace!("Skipping short TSV row {}: {:?}", line_no, line);
            continue;
        }

        let number = |index: usize| -> Result<i64, RecognitionError> {
            columns[index].trim().parse::<i64>().map_err(|_| {
                RecognitionError::Parse(format!("row {}: bad column {}", line_no, index))
            })
        };

        if number(0)? != WORD_LEVEL as i64 {
            continue;
        }
        let confidence: f32 = columns[10]
            .trim()
            .parse()
            .map_err(|_| RecognitionError::Parse(format!("row {}: bad confidence", line_no)))?;
        let text = columns[11].trim();
        if text.is_empty() || confidence < min_confidence {
            continue;
        }

        let page = number(1)? as u32;
        let block = number(2)? as u32;
        let paragraph = number(3)? as u32;
        let line_num = number(4)? as u32;
        let bounds = BlockBounds::from_xywh(
            number(6)? as i32,
            number(7)? as i32,
            number(8)? as i32,
            number(9)? as i32,
        );

        if bounds.width() <= 0 || bounds.height() <= 0 {
            trace!("Skipping empty word box on row {}", line_no);
            continue;
        }

        let acc = blocks.entry((page, block)).or_default();
        acc.lines
            .entry((paragraph, line_num))
            .or_default()
            .push(text.to_string());
        acc.bounds = Some(match acc.bounds {
            Some(existing) => existing.union(&bounds),
            None => bounds,
        });
    }

    Ok(blocks
        .into_values()
        .filter_map(|acc| {
            let bounds = acc.bounds?;
            let text = acc
                .lines
                .into_values()
                .map(|words| words.join(" "))
                .collect::<Vec<_>>()
                .join("\n");
            Some(TextBlock::with_quantum(text, bounds, id_quantum))
        })
        .collect())
}
