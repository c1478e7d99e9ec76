//! Compressed frame input and the shared decode stage.

use std::time::SystemTime;

use image::GrayImage;

/// One compressed single-channel camera frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: SystemTime,
    /// Encoded image bytes (JPEG, PNG, ...).
    pub data: Vec<u8>,
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("frame {0}: empty payload")]
    Empty(u64),
    #[error("frame {sequence}: {source}")]
    Image {
        sequence: u64,
        #[source]
        source: image::ImageError,
    },
}

/// A decoded frame, shared by both detectors.
#[derive(Clone, Debug)]
pub struct PreparedFrame {
    pub sequence: u64,
    pub captured_at: SystemTime,
    pub image: GrayImage,
}

impl PreparedFrame {
    #[inline]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl Frame {
    pub fn new(sequence: u64, captured_at: SystemTime, data: Vec<u8>) -> Self {
        Self {
            sequence,
            captured_at,
            data,
        }
    }

    /// Decode to 8-bit grayscale.
    pub fn decode(&self) -> Result<PreparedFrame, DecodeError> {
        if self.data.is_empty() {
            return Err(DecodeError::Empty(self.sequence));
        }
        let image = image::load_from_memory(&self.data)
            .map_err(|source| DecodeError::Image {
                sequence: self.sequence,
                source,
            })?
            .to_luma8();
        Ok(PreparedFrame {
            sequence: self.sequence,
            captured_at: self.captured_at,
            image,
        })
    }
}
