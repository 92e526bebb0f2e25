//! Owned pixel buffers passed through the pipeline

use crate::error::VisionError;
use image::RgbImage;

/// Packed 8-bit RGB pixels are the only layout the pipeline carries.
pub const RGB_CHANNELS: u8 = 3;

/// One decoded image plus its position in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    channels: u8,
    /// Zero-based position of the frame in its source
    pub sequence: u64,
}

impl Frame {
    /// Wrap packed RGB bytes, checking the buffer length against the dimensions.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self, VisionError> {
        if width == 0 || height == 0 {
            return Err(VisionError::Read(format!("Invalid frame dimensions {}x{}", width, height)));
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|p| p.checked_mul(RGB_CHANNELS as usize))
            .ok_or_else(|| VisionError::Read("Frame dimensions would overflow".to_string()))?;

        if data.len() != expected {
            return Err(VisionError::Read(format!(
                "Frame buffer holds {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }

        Ok(Self {
            data,
            width,
            height,
            channels: RGB_CHANNELS,
            sequence: 0,
        })
    }

    /// Solid-colour frame, mostly useful for synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * RGB_CHANNELS as usize);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self {
            data,
            width,
            height,
            channels: RGB_CHANNELS,
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Copy the pixels into an `image` buffer for drawing or encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        // Length was validated on construction
        RgbImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            channels: RGB_CHANNELS,
            sequence: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb_rejects_short_buffer() {
        let err = Frame::from_rgb(4, 4, vec![0; 10]).unwrap_err();
        assert!(err.to_string().contains("expected 48"));
    }

    #[test]
    fn test_from_rgb_rejects_zero_dimension() {
        assert!(Frame::from_rgb(0, 4, vec![]).is_err());
    }

    #[test]
    fn test_filled_frame_layout() {
        let frame = Frame::filled(2, 3, [1, 2, 3]);
        assert_eq!(frame.as_bytes().len(), 18);
        assert_eq!(&frame.as_bytes()[3..6], &[1, 2, 3]);
        assert_eq!(frame.channels(), 3);
    }

    #[test]
    fn test_image_conversion_keeps_pixels() {
        let frame = Frame::filled(5, 4, [10, 20, 30]).with_sequence(9);
        let image = frame.to_rgb_image();
        assert_eq!(image.get_pixel(4, 3).0, [10, 20, 30]);

        let back = Frame::from_rgb_image(image);
        assert_eq!(back.as_bytes(), frame.as_bytes());
        assert_eq!(back.sequence, 0);
    }
}
