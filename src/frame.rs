//! Decoded frame values.
//!
//! - `StreamId`: the closed set of four camera streams.
//! - `Frame`: immutable, timestamped image produced once by the acquisition loop.
//! - `ImageRef`: borrowed view handed to persistence sinks.
//!
//! Color, Left and Right frames hold 3-channel 8-bit RGB (mono streams are
//! expanded at construction). Depth frames hold the raw single-channel 16-bit
//! range samples; zero means "no valid range".

use image::{ImageBuffer, Luma, RgbImage};
use std::fmt;
use std::time::Instant;

/// Raw 16-bit range image as delivered by the stereo depth node.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

// ----------------------------------------------------------------------------
// StreamId
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamId {
    Color,
    Depth,
    Left,
    Right,
}

impl StreamId {
    /// Every stream in polling order.
    pub const ALL: [StreamId; 4] = [
        StreamId::Color,
        StreamId::Depth,
        StreamId::Left,
        StreamId::Right,
    ];

    pub(crate) fn index(self) -> usize {
        match self {
            StreamId::Color => 0,
            StreamId::Depth => 1,
            StreamId::Left => 2,
            StreamId::Right => 3,
        }
    }

    /// Device output queue name for this stream.
    pub fn queue_name(self) -> &'static str {
        match self {
            StreamId::Color => "rgb",
            StreamId::Depth => "depth",
            StreamId::Left => "left",
            StreamId::Right => "right",
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.queue_name())
    }
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum Pixels {
    Rgb8(RgbImage),
    Depth16(DepthImage),
}

impl Pixels {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Pixels::Rgb8(img) => img.dimensions(),
            Pixels::Depth16(img) => img.dimensions(),
        }
    }
}

/// Borrowed image handed to a persistence sink.
#[derive(Clone, Copy, Debug)]
pub enum ImageRef<'a> {
    Rgb8(&'a RgbImage),
    Depth16(&'a DepthImage),
}

/// Immutable decoded frame. There are no setters; the cache replaces whole
/// frames behind an `Arc`.
#[derive(Clone, Debug)]
pub struct Frame {
    stream: StreamId,
    pixels: Pixels,
    captured_at: Instant,
}

impl Frame {
    pub fn new(stream: StreamId, pixels: Pixels, captured_at: Instant) -> Self {
        Self {
            stream,
            pixels,
            captured_at,
        }
    }

    pub fn stream(&self) -> StreamId {
        self.stream
    }

    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.pixels.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.pixels.dimensions().1
    }

    pub fn as_rgb(&self) -> Option<&RgbImage> {
        match &self.pixels {
            Pixels::Rgb8(img) => Some(img),
            Pixels::Depth16(_) => None,
        }
    }

    pub fn as_depth(&self) -> Option<&DepthImage> {
        match &self.pixels {
            Pixels::Depth16(img) => Some(img),
            Pixels::Rgb8(_) => None,
        }
    }

    pub fn image(&self) -> ImageRef<'_> {
        match &self.pixels {
            Pixels::Rgb8(img) => ImageRef::Rgb8(img),
            Pixels::Depth16(img) => ImageRef::Depth16(img),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_index_their_slots() {
        let indices: Vec<usize> = StreamId::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        assert_eq!(StreamId::Color.to_string(), "rgb");
    }

    #[test]
    fn frame_exposes_only_its_own_pixel_kind() {
        let depth = DepthImage::from_pixel(4, 2, Luma([500]));
        let frame = Frame::new(StreamId::Depth, Pixels::Depth16(depth), Instant::now());

        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert!(frame.as_depth().is_some());
        assert!(frame.as_rgb().is_none());
        assert!(matches!(frame.image(), ImageRef::Depth16(_)));
    }
}
