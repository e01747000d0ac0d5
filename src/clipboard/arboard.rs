//! System clipboard through arboard
//!
//! Works on Windows, macOS, and Linux (X11/Wayland). arboard exposes no
//! change counter, so one is derived: every read of the clipboard is
//! fingerprinted and the counter moves whenever the fingerprint does.

use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbaImage};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{ClipboardError, ClipboardProvider, ClipboardSnapshot, MAX_CLIPBOARD_SIZE};
use crate::history::{ContentType, HistoryItemContent};

#[derive(Debug, Default)]
struct ChangeState {
    change_count: u64,
    fingerprint: Option<String>,
}

impl ChangeState {
    /// Advance the counter when the fingerprint differs from the last one
    fn observe(&mut self, fingerprint: String) -> u64 {
        if self.fingerprint.as_deref() != Some(fingerprint.as_str()) {
            // The first observation establishes the baseline
            if self.fingerprint.is_some() {
                self.change_count += 1;
            }
            self.fingerprint = Some(fingerprint);
        }
        self.change_count
    }
}

/// Raw clipboard payload as arboard hands it out
struct RawPayload {
    text: Option<String>,
    image: Option<(usize, usize, Vec<u8>)>,
}

/// Cross-platform clipboard adapter using arboard
///
/// arboard exposes no OS change counter, so [`ClipboardProvider::change_count`]
/// is derived from a fingerprint of the current contents. The counter only
/// moves when the contents differ: copying the same content twice in a row is
/// seen as one change and does not raise `number_of_copies`.
#[derive(Debug, Default)]
pub struct ArboardClipboard {
    state: Mutex<ChangeState>,
}

impl ArboardClipboard {
    /// Create a new adapter, checking that a clipboard is reachable
    pub fn new() -> Result<Self, ClipboardError> {
        ::arboard::Clipboard::new().map_err(platform)?;
        Ok(Self::default())
    }

    async fn read_raw() -> Result<RawPayload, ClipboardError> {
        // arboard operations are blocking, so run in spawn_blocking
        tokio::task::spawn_blocking(|| {
            let mut clipboard = ::arboard::Clipboard::new().map_err(platform)?;

            let text = match clipboard.get_text() {
                Ok(text) => Some(text),
                Err(::arboard::Error::ContentNotAvailable) => None,
                Err(e) => return Err(platform(e)),
            };
            let image = match clipboard.get_image() {
                Ok(image) => Some((image.width, image.height, image.bytes.into_owned())),
                Err(::arboard::Error::ContentNotAvailable) => None,
                Err(e) => {
                    debug!("Ignoring unreadable clipboard image: {}", e);
                    None
                }
            };

            Ok(RawPayload { text, image })
        })
        .await
        .map_err(|e| ClipboardError::Platform(format!("Task join error: {}", e)))?
    }

    fn fingerprint(raw: &RawPayload) -> String {
        let mut hasher = Sha256::new();
        if let Some(text) = &raw.text {
            hasher.update(b"text");
            hasher.update(text.as_bytes());
        }
        if let Some((width, height, bytes)) = &raw.image {
            hasher.update(b"image");
            hasher.update(width.to_le_bytes());
            hasher.update(height.to_le_bytes());
            hasher.update(bytes);
        }
        hex::encode(hasher.finalize())
    }

    fn encode_png(width: usize, height: usize, rgba: Vec<u8>) -> Result<Vec<u8>, ClipboardError> {
        let image = RgbaImage::from_raw(width as u32, height as u32, rgba)
            .ok_or_else(|| ClipboardError::Platform("Malformed clipboard image".to_string()))?;

        let mut png = Vec::new();
        DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

#[async_trait]
impl ClipboardProvider for ArboardClipboard {
    async fn change_count(&self) -> Result<u64, ClipboardError> {
        let raw = Self::read_raw().await?;
        let fingerprint = Self::fingerprint(&raw);

        let mut state = self
            .state
            .lock()
            .map_err(|_| ClipboardError::Platform("change state poisoned".to_string()))?;
        Ok(state.observe(fingerprint))
    }

    async fn read(&self) -> Result<ClipboardSnapshot, ClipboardError> {
        let raw = Self::read_raw().await?;

        let mut contents = Vec::new();
        if let Some(text) = raw.text {
            contents.push(HistoryItemContent::text(text));
        }
        if let Some((width, height, rgba)) = raw.image {
            contents.push(HistoryItemContent::image(Self::encode_png(width, height, rgba)?));
        }

        if contents.is_empty() {
            return Err(ClipboardError::NoContent);
        }
        let size: usize = contents.iter().map(HistoryItemContent::size).sum();
        if size > MAX_CLIPBOARD_SIZE {
            return Err(ClipboardError::TooLarge {
                size,
                max: MAX_CLIPBOARD_SIZE,
            });
        }

        Ok(ClipboardSnapshot {
            contents,
            application: None,
        })
    }

    async fn write(&self, contents: &[HistoryItemContent]) -> Result<(), ClipboardError> {
        let text = contents
            .iter()
            .find(|c| c.content_type == ContentType::PlainText)
            .and_then(|c| c.as_text())
            .map(str::to_string);
        let html = contents
            .iter()
            .find(|c| c.content_type == ContentType::Html)
            .and_then(|c| c.as_text())
            .map(str::to_string);
        let image = match contents.iter().find(|c| c.content_type == ContentType::Image) {
            Some(c) => Some(image::load_from_memory(&c.payload)?.to_rgba8()),
            None => None,
        };

        if text.is_none() && html.is_none() && image.is_none() {
            let mime = contents
                .first()
                .map(|c| c.content_type.as_mime().to_string())
                .unwrap_or_default();
            return Err(ClipboardError::UnsupportedType(mime));
        }

        tokio::task::spawn_blocking(move || {
            let mut clipboard = ::arboard::Clipboard::new().map_err(platform)?;

            // arboard keeps one payload per call, the richest one wins
            if let Some(image) = image {
                let (width, height) = image.dimensions();
                clipboard
                    .set_image(::arboard::ImageData {
                        width: width as usize,
                        height: height as usize,
                        bytes: image.into_raw().into(),
                    })
                    .map_err(platform)
            } else if let Some(html) = html {
                clipboard.set_html(html, text).map_err(platform)
            } else if let Some(text) = text {
                clipboard.set_text(text).map_err(platform)
            } else {
                Ok(())
            }
        })
        .await
        .map_err(|e| ClipboardError::Platform(format!("Task join error: {}", e)))?
    }

    fn name(&self) -> &str {
        "arboard"
    }
}

fn platform(e: ::arboard::Error) -> ClipboardError {
    ClipboardError::Platform(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = RawPayload {
            text: Some("one".to_string()),
            image: None,
        };
        let b = RawPayload {
            text: Some("two".to_string()),
            image: None,
        };
        assert_ne!(ArboardClipboard::fingerprint(&a), ArboardClipboard::fingerprint(&b));
        assert_eq!(
            ArboardClipboard::fingerprint(&a),
            ArboardClipboard::fingerprint(&RawPayload {
                text: Some("one".to_string()),
                image: None,
            })
        );
    }

    #[test]
    fn test_repeated_content_is_one_change() {
        let mut state = ChangeState::default();
        assert_eq!(state.observe("a".to_string()), 0);
        assert_eq!(state.observe("b".to_string()), 1);
        // Copying the same content again is invisible to the counter
        assert_eq!(state.observe("b".to_string()), 1);
        assert_eq!(state.observe("a".to_string()), 2);
    }

    #[test]
    fn test_encode_png_roundtrips_dimensions() {
        let png = ArboardClipboard::encode_png(2, 3, vec![255u8; 2 * 3 * 4]).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (2, 3));

        assert!(ArboardClipboard::encode_png(2, 3, vec![0u8; 5]).is_err());
    }

    #[tokio::test]
    async fn test_arboard_clipboard_text() {
        // Only meaningful with a display server
        if std::env::var("DISPLAY").is_err() && std::env::var("WAYLAND_DISPLAY").is_err() {
            return;
        }

        if let Ok(clipboard) = ArboardClipboard::new() {
            clipboard
                .write(&[HistoryItemContent::text("Hello from ClipKeep!")])
                .await
                .unwrap();
            let snapshot = clipboard.read().await.unwrap();
            assert_eq!(
                snapshot.contents[0].as_text(),
                Some("Hello from ClipKeep!")
            );
        }
    }
}
