//! Recognition capability: the external OCR engine behind a trait, plus the
//! exclusive-access service that owns the single shared instance.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use super::PipelineError;

/// One recognized word with its confidence and position on the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizedWord {
    pub text: String,
    /// 0–100.
    pub confidence: f32,
    pub bbox: Option<WordBox>,
}

/// Bounding box for a recognized word, in processed-image pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Raw engine output for one image.
#[derive(Debug, Clone)]
pub struct RecognizedPage {
    pub text: String,
    /// Overall page confidence, 0–100.
    pub confidence: f32,
    pub words: Vec<RecognizedWord>,
}

/// OCR engine abstraction (allows mocking for tests).
///
/// Engines are stateful and not safe for concurrent use — access always goes
/// through [`EngineService`].
pub trait OcrEngine: Send {
    fn recognize(&mut self, image_bytes: &[u8]) -> Result<RecognizedPage, PipelineError>;
}

/// Builds the engine on first use.
pub type EngineFactory =
    Box<dyn Fn() -> Result<Box<dyn OcrEngine + Send>, PipelineError> + Send + Sync>;

/// Exclusive-access wrapper around one lazily-built engine instance.
///
/// The engine is constructed on the first recognition and reused for every
/// call after that. The mutex is the acquire/release point: concurrent
/// attempts serialize here, one recognition at a time.
pub struct EngineService {
    factory: EngineFactory,
    engine: Mutex<Option<Box<dyn OcrEngine + Send>>>,
}

impl EngineService {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            engine: Mutex::new(None),
        }
    }

    pub fn recognize(&self, image_bytes: &[u8]) -> Result<RecognizedPage, PipelineError> {
        let mut slot = self
            .engine
            .lock()
            .map_err(|_| PipelineError::Engine("engine lock poisoned".into()))?;

        if slot.is_none() {
            *slot = Some((self.factory)()?);
            tracing::info!("Recognition engine initialized");
        }
        let engine = slot
            .as_mut()
            .ok_or_else(|| PipelineError::Engine("engine initialization failed".into()))?;

        engine.recognize(image_bytes)
    }
}

/// Bundled Tesseract OCR engine.
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct TesseractEngine {
    tessdata_dir: std::path::PathBuf,
    lang: String,
}

#[cfg(feature = "ocr")]
impl TesseractEngine {
    pub fn new(tessdata_dir: &std::path::Path) -> Result<Self, PipelineError> {
        if !tessdata_dir.join("eng.traineddata").exists() {
            return Err(PipelineError::Engine(format!(
                "No eng.traineddata found at {}",
                tessdata_dir.display()
            )));
        }

        Ok(Self {
            tessdata_dir: tessdata_dir.to_path_buf(),
            lang: "eng".to_string(),
        })
    }

    /// Set language(s) for OCR (e.g., "eng", "eng+fra")
    pub fn with_languages(mut self, langs: &str) -> Self {
        self.lang = langs.to_string();
        self
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for TesseractEngine {
    fn recognize(&mut self, image_bytes: &[u8]) -> Result<RecognizedPage, PipelineError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| PipelineError::Engine("Invalid tessdata path".into()))?;

        let tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&self.lang))
            .map_err(|e| PipelineError::Engine(format!("{e:?}")))?;

        let mut tess = tess
            .set_image_from_mem(image_bytes)
            .map_err(|e| PipelineError::Engine(format!("{e:?}")))?;

        let text = tess
            .get_text()
            .map_err(|e| PipelineError::Engine(format!("{e:?}")))?;

        let confidence = tess.mean_text_conf().max(0) as f32;

        // Per-word confidence and bounding boxes via TSV output.
        let words = match tess.get_tsv_text(0) {
            Ok(tsv) => parse_tsv_words(&tsv),
            Err(_) => {
                // Fallback: split text with page-mean confidence (no boxes)
                text.split_whitespace()
                    .map(|w| RecognizedWord {
                        text: w.to_string(),
                        confidence,
                        bbox: None,
                    })
                    .collect()
            }
        };

        Ok(RecognizedPage {
            text,
            confidence,
            words,
        })
    }
}

/// Parse Tesseract TSV output into per-word entries.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence stays on the 0–100 scale.
fn parse_tsv_words(tsv: &str) -> Vec<RecognizedWord> {
    let mut results = Vec::new();

    for line in tsv.lines().skip(1) {
        // Skip header row
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Level 5 = word
        let level: i32 = match fields[0].parse() {
            Ok(l) => l,
            Err(_) => continue,
        };
        if level != 5 {
            continue;
        }

        let conf: i32 = match fields[10].parse() {
            Ok(c) => c,
            Err(_) => continue,
        };

        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }

        // Tesseract returns -1 for words it can't assign confidence to
        let confidence = if conf < 0 { 0.0 } else { conf as f32 };

        results.push(RecognizedWord {
            text: word.to_string(),
            confidence,
            bbox: parse_word_box(fields[6], fields[7], fields[8], fields[9]),
        });
    }

    results
}

/// Parse bounding box coordinates from TSV string fields.
/// Returns None if any field fails to parse (graceful degradation).
fn parse_word_box(left: &str, top: &str, width: &str, height: &str) -> Option<WordBox> {
    Some(WordBox {
        x: left.parse().ok()?,
        y: top.parse().ok()?,
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}

/// Mock OCR engine for unit testing without Tesseract.
pub struct MockEngine {
    pub text: String,
    pub confidence: f32,
    pub fail: bool,
}

impl MockEngine {
    pub fn new(text: &str, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            confidence,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            fail: true,
        }
    }
}

impl OcrEngine for MockEngine {
    fn recognize(&mut self, _image_bytes: &[u8]) -> Result<RecognizedPage, PipelineError> {
        if self.fail {
            return Err(PipelineError::Engine("mock recognition failure".into()));
        }

        let words = self
            .text
            .split_whitespace()
            .map(|w| RecognizedWord {
                text: w.to_string(),
                confidence: self.confidence,
                bbox: None,
            })
            .collect();

        Ok(RecognizedPage {
            text: self.text.clone(),
            confidence: self.confidence,
            words,
        })
    }
}
