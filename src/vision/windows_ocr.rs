//! Windows OCR API backend
//!
//! Uses the built-in Windows OCR (Media.Ocr). Runs on the CPU and handles
//! screen text well, so it serves as the lightweight engine.

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use tracing::{debug, info, warn};
use windows::{
    core::HSTRING,
    Foundation::IAsyncOperation,
    Globalization::Language,
    Graphics::Imaging::{BitmapPixelFormat, SoftwareBitmap},
    Media::Ocr::{OcrEngine as WinOcrEngine, OcrResult as WinOcrResult},
    Storage::Streams::{DataReader, DataWriter, InMemoryRandomAccessStream},
};

use super::ocr::{EngineError, RecognitionEngine, Recognized};

/// Lightweight engine backed by Windows OCR
pub struct WindowsOcrEngine {
    language_tag: String,
    engine: Option<WinOcrEngine>,
}

impl WindowsOcrEngine {
    /// Engine for the given BCP-47 language tag, e.g. "ja"
    pub fn new(language_tag: impl Into<String>) -> Self {
        Self {
            language_tag: language_tag.into(),
            engine: None,
        }
    }

    pub fn language(&self) -> &str {
        &self.language_tag
    }

    /// Get available OCR languages on this system
    pub fn available_languages() -> Result<Vec<String>> {
        let languages = WinOcrEngine::AvailableRecognizerLanguages()
            .context("Failed to get available languages")?;

        let mut result = Vec::new();
        for i in 0..languages.Size().context("Failed to get languages size")? {
            if let Ok(lang) = languages.GetAt(i) {
                if let Ok(tag) = lang.LanguageTag() {
                    result.push(tag.to_string());
                }
            }
        }

        Ok(result)
    }

    fn create_engine(language_tag: &str) -> Result<WinOcrEngine> {
        let language = Language::CreateLanguage(&HSTRING::from(language_tag))
            .context("Failed to create language")?;

        if !WinOcrEngine::IsLanguageSupported(&language)
            .context("Failed to check language support")?
        {
            let installed = Self::available_languages().unwrap_or_default();
            warn!(
                "OCR language '{}' is not installed (available: {:?})",
                language_tag, installed
            );
            bail!(
                "language pack '{}' not found; add it under Settings > Time & Language",
                language_tag
            );
        }

        WinOcrEngine::TryCreateFromLanguage(&language)
            .context("Failed to create OCR engine for language")
    }

    fn recognize_text(engine: &WinOcrEngine, image: &DynamicImage) -> Result<String> {
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Ok(String::new());
        }

        debug!("Windows OCR: Processing {}x{} image", width, height);

        let bgra = rgba_to_bgra(rgba.as_raw());
        let bitmap = create_software_bitmap(&bgra, width, height)?;
        let result = run_ocr_sync(engine, &bitmap)?;

        join_lines(&result)
    }
}

impl RecognitionEngine for WindowsOcrEngine {
    fn name(&self) -> &str {
        "Windows OCR (Fast)"
    }

    fn load(&mut self) -> Result<(), EngineError> {
        let engine = Self::create_engine(&self.language_tag).map_err(|e| EngineError::LoadFailed {
            engine: self.name().to_string(),
            reason: format!("{e:#}"),
        })?;

        info!("Windows OCR initialized with language: {}", self.language_tag);
        self.engine = Some(engine);
        Ok(())
    }

    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognized, EngineError> {
        let engine = self
            .engine
            .as_ref()
            .ok_or_else(|| EngineError::Backend("Windows OCR is not loaded".to_string()))?;

        let text = Self::recognize_text(engine, image)
            .map_err(|e| EngineError::Backend(format!("{e:#}")))?;

        // Windows OCR doesn't provide confidence
        Ok(Recognized::new(text.trim(), 1.0))
    }

    fn unload(&mut self) -> Result<(), EngineError> {
        self.engine = None;
        Ok(())
    }
}

/// Convert RGBA to BGRA (Windows expects BGRA)
fn rgba_to_bgra(rgba: &[u8]) -> Vec<u8> {
    let mut bgra = rgba.to_vec();
    for chunk in bgra.chunks_exact_mut(4) {
        chunk.swap(0, 2);
    }
    bgra
}

/// Create a SoftwareBitmap from BGRA data using CopyFromBuffer
fn create_software_bitmap(bgra_data: &[u8], width: u32, height: u32) -> Result<SoftwareBitmap> {
    let stream = InMemoryRandomAccessStream::new().context("Failed to create in-memory stream")?;

    let writer = DataWriter::CreateDataWriter(&stream).context("Failed to create data writer")?;
    writer.WriteBytes(bgra_data).context("Failed to write pixel data")?;
    writer
        .StoreAsync()
        .context("Failed to start store operation")?
        .get()
        .context("Failed to store data")?;
    writer
        .FlushAsync()
        .context("Failed to start flush operation")?
        .get()
        .context("Failed to flush data")?;

    stream.Seek(0).context("Failed to seek stream")?;

    let bitmap = SoftwareBitmap::Create(BitmapPixelFormat::Bgra8, width as i32, height as i32)
        .context("Failed to create SoftwareBitmap")?;

    let input_stream = stream.GetInputStreamAt(0).context("Failed to get input stream")?;
    let reader = DataReader::CreateDataReader(&input_stream).context("Failed to create data reader")?;
    reader
        .LoadAsync(bgra_data.len() as u32)
        .context("Failed to start load operation")?
        .get()
        .context("Failed to load data")?;

    let buffer = reader
        .ReadBuffer(bgra_data.len() as u32)
        .context("Failed to read buffer")?;
    bitmap
        .CopyFromBuffer(&buffer)
        .context("Failed to copy buffer to bitmap")?;

    Ok(bitmap)
}

/// Run OCR synchronously (blocks until complete)
fn run_ocr_sync(engine: &WinOcrEngine, bitmap: &SoftwareBitmap) -> Result<WinOcrResult> {
    let async_op: IAsyncOperation<WinOcrResult> = engine
        .RecognizeAsync(bitmap)
        .context("Failed to start OCR recognition")?;

    async_op.get().context("OCR recognition failed")
}

/// Concatenate line texts without separators; Japanese has no word spacing
fn join_lines(result: &WinOcrResult) -> Result<String> {
    let lines = result.Lines().context("Failed to get OCR lines")?;

    let mut text = String::new();
    for i in 0..lines.Size().context("Failed to get lines size")? {
        let line = lines.GetAt(i).context("Failed to get line")?;
        text.push_str(&line.Text().context("Failed to get line text")?.to_string());
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgba_to_bgra() {
        let bgra = rgba_to_bgra(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(bgra, vec![3, 2, 1, 4, 7, 6, 5, 8]);
    }

    #[test]
    fn test_unloaded_engine_rejects_recognition() {
        let mut engine = WindowsOcrEngine::new("ja");
        let image = DynamicImage::new_rgb8(4, 4);
        assert!(engine.recognize(&image).is_err());
    }
}
