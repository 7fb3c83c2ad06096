pub mod document;
pub mod enums;
pub mod ocr_result;

pub use document::{Document, NewDocument};
pub use enums::{Category, DocumentStatus};
pub use ocr_result::{NewOcrResult, OcrResult};
