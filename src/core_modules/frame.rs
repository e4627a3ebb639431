// THEORY:
// The `frame` module is the boundary between the outside world (a camera driver,
// a decoded video) and the analysis engine. A frame arrives as a flat, row-major,
// 8-bit, 3-channel buffer whose channel order is dictated by whoever produced it.
// Everything downstream wants one of two derived views of it:
//
// 1.  **Intensity**: a single-channel luma image, used only for locating the
//     sample region (edges and contours do not care about colour).
// 2.  **Working colour model**: HSV in the 8-bit camera convention, used for the
//     colour statistics that are actually monitored.
//
// The frame itself is a "dumb" container. It is normalised to RGB on entry so the
// rest of the engine never has to reason about channel order again.

use crate::error::{MonitorError, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};

pub type Channel = u8;
pub type Luminance = f64;

/// Largest hue value in the 8-bit HSV convention (degrees halved).
pub const HUE_RANGE: u16 = 180;

/// Order of the three colour channels in a raw frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    /// Blue-green-red, as most capture libraries hand out.
    Bgr,
}

/// A single captured video frame, stored as RGB.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    /// Builds a frame from a raw row-major buffer of `width * height * 3` bytes.
    pub fn from_raw(width: u32, height: u32, mut data: Vec<u8>, order: ChannelOrder) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(MonitorError::FrameSizeMismatch {
                expected,
                got: data.len(),
            });
        }
        if order == ChannelOrder::Bgr {
            for pixel in data.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
        }
        let image = RgbImage::from_raw(width, height, data).ok_or(MonitorError::FrameSizeMismatch {
            expected,
            got: 0,
        })?;
        Ok(Self { image })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Single-channel intensity view (Rec. 601 luma).
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let Rgb([r, g, b]) = *self.image.get_pixel(x, y);
            Luma([luminance(r, g, b).round().clamp(0.0, 255.0) as Channel])
        })
    }

    /// Converts the frame into the working colour model.
    pub fn to_hsv(&self) -> HsvFrame {
        let mut hsv = RgbImage::new(self.width(), self.height());
        for (source, target) in self.image.pixels().zip(hsv.pixels_mut()) {
            let Rgb([r, g, b]) = *source;
            *target = Rgb(rgb_to_hsv(r, g, b));
        }
        HsvFrame { image: hsv }
    }
}

/// A frame in the working colour model. Channel 0 is hue in `[0, 180)`,
/// channel 1 saturation and channel 2 value, both in `[0, 255]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HsvFrame {
    image: RgbImage,
}

impl HsvFrame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// `[h, s, v]` triples in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = [Channel; 3]> + '_ {
        self.image.pixels().map(|p| p.0)
    }
}

/// Perceived brightness as a weighted sum of RGB (Rec. 601 luma).
pub fn luminance(red: Channel, green: Channel, blue: Channel) -> Luminance {
    0.299_f64 * red as f64 + 0.587_f64 * green as f64 + 0.114_f64 * blue as f64
}

/// Converts one RGB pixel to 8-bit HSV.
///
/// - Value is the largest channel.
/// - Saturation is `255 * chroma / value`, zero for black.
/// - Hue is the colour-wheel angle halved so it fits a byte; achromatic pixels get 0.
pub fn rgb_to_hsv(red: Channel, green: Channel, blue: Channel) -> [Channel; 3] {
    let r = red as f64;
    let g = green as f64;
    let b = blue as f64;
    let maximum_channel = r.max(g.max(b));
    let minimum_channel = r.min(g.min(b));
    let chroma = maximum_channel - minimum_channel;

    let saturation = if maximum_channel > 0.0 {
        (255.0 * chroma / maximum_channel).round()
    } else {
        0.0
    };

    let hue = if chroma <= 0.0 {
        0.0
    } else {
        let (base_difference, sector_offset) = if maximum_channel == r {
            (g - b, 0.0)
        } else if maximum_channel == g {
            (b - r, 120.0)
        } else {
            (r - g, 240.0)
        };
        let mut hue_degrees = 60.0 * base_difference / chroma + sector_offset;
        if hue_degrees < 0.0 {
            hue_degrees += 360.0;
        }
        let halved = (hue_degrees / 2.0).round() as u16;
        (halved % HUE_RANGE) as f64
    };

    [hue as Channel, saturation as Channel, maximum_channel as Channel]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_colours_map_to_expected_hues() {
        assert_eq!(rgb_to_hsv(255, 0, 0), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 255, 0), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(0, 0, 255), [120, 255, 255]);
    }

    #[test]
    fn greys_have_no_hue_or_saturation() {
        assert_eq!(rgb_to_hsv(0, 0, 0), [0, 0, 0]);
        assert_eq!(rgb_to_hsv(128, 128, 128), [0, 0, 128]);
    }

    #[test]
    fn hue_just_below_red_wraps_into_range() {
        // 359.x degrees halves to 180 after rounding and must wrap to 0.
        let [h, _, _] = rgb_to_hsv(255, 0, 1);
        assert!(h < 180);
    }

    #[test]
    fn bgr_buffers_are_normalised_to_rgb() {
        let frame = Frame::from_raw(1, 1, vec![10, 20, 30], ChannelOrder::Bgr).unwrap();
        assert_eq!(frame.image().get_pixel(0, 0).0, [30, 20, 10]);
    }

    #[test]
    fn wrong_buffer_length_is_rejected() {
        let err = Frame::from_raw(2, 2, vec![0; 11], ChannelOrder::Rgb).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::FrameSizeMismatch { expected: 12, got: 11 }
        ));
    }
}
