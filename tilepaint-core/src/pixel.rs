//! # Pixel formats
//!
//! Every store holds pixels of exactly one [`PixelFormat`]. All math in the crate happens on
//! premultiplied `[f32; 4]` values, so each format only needs to know how to get there and back.

/// A premultiplied `[r, g, b, a]` pixel in the working space of the compositor.
pub type Premul = [f32; 4];

#[derive(
    strum::AsRefStr,
    strum::EnumIter,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    Debug,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum PixelFormat {
    /// 8 bits per channel, color channels premultiplied by alpha.
    #[default]
    Rgba8Premultiplied,
    /// 8 bits per channel, straight alpha.
    Rgba8,
    /// Native-endian `f32` per channel, premultiplied.
    RgbaF32Premultiplied,
}

/// Convert a unit float to a u8, rounding to nearest. NaN becomes zero.
fn unorm8(value: f32) -> u8 {
    if value.is_nan() {
        0
    } else {
        // In 0..=255, never NaN.
        az::saturating_cast((value.clamp(0.0, 1.0) * 255.0).round())
    }
}

impl PixelFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8Premultiplied | Self::Rgba8 => 4,
            Self::RgbaF32Premultiplied => 16,
        }
    }
    /// Read a pixel. `bytes` must be at least [`Self::bytes_per_pixel`] long.
    ///
    /// Non-finite float channels are read as zero, so garbage input cannot poison later math.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Premul {
        match self {
            Self::Rgba8Premultiplied => {
                [bytes[0], bytes[1], bytes[2], bytes[3]].map(|c| f32::from(c) / 255.0)
            }
            Self::Rgba8 => {
                let alpha = f32::from(bytes[3]) / 255.0;
                let [r, g, b] = [bytes[0], bytes[1], bytes[2]].map(|c| f32::from(c) / 255.0 * alpha);
                [r, g, b, alpha]
            }
            Self::RgbaF32Premultiplied => {
                let px: [f32; 4] = bytemuck::pod_read_unaligned(&bytes[..16]);
                px.map(|c| if c.is_finite() { c } else { 0.0 })
            }
        }
    }
    /// Write a pixel. `out` must be at least [`Self::bytes_per_pixel`] long.
    pub fn encode(self, px: Premul, out: &mut [u8]) {
        match self {
            Self::Rgba8Premultiplied => {
                let alpha = unorm8(px[3]);
                // Premultiplied colors may never exceed their alpha.
                let [r, g, b] = [px[0], px[1], px[2]].map(|c| unorm8(c).min(alpha));
                out[..4].copy_from_slice(&[r, g, b, alpha]);
            }
            Self::Rgba8 => {
                let alpha = unorm8(px[3]);
                if alpha == 0 {
                    out[..4].fill(0);
                } else {
                    let a = px[3].clamp(0.0, 1.0);
                    let [r, g, b] = [px[0], px[1], px[2]].map(|c| unorm8(c / a));
                    out[..4].copy_from_slice(&[r, g, b, alpha]);
                }
            }
            Self::RgbaF32Premultiplied => {
                let px = px.map(|c| if c.is_finite() { c } else { 0.0 });
                out[..16].copy_from_slice(bytemuck::bytes_of(&px));
            }
        }
    }
    /// Check whether a stored pixel is fully transparent.
    #[must_use]
    pub fn is_transparent(self, bytes: &[u8]) -> bool {
        match self {
            Self::Rgba8Premultiplied | Self::Rgba8 => bytes[3] == 0,
            Self::RgbaF32Premultiplied => self.decode(bytes)[3] <= 0.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::PixelFormat;

    #[test]
    fn rgba8_premul_exact() {
        // Every byte value survives decode->encode.
        for v in 0..=255u8 {
            let bytes = [v, v / 2, 0, 255];
            let mut out = [0u8; 4];
            let fmt = PixelFormat::Rgba8Premultiplied;
            fmt.encode(fmt.decode(&bytes), &mut out);
            assert_eq!(out, bytes);
        }
    }
    #[test]
    fn straight_alpha() {
        let fmt = PixelFormat::Rgba8;
        let px = fmt.decode(&[255, 0, 0, 51]);
        assert!((px[0] - 0.2).abs() < 1e-6);
        assert!((px[3] - 0.2).abs() < 1e-6);
        let mut out = [0u8; 4];
        fmt.encode(px, &mut out);
        assert_eq!(out, [255, 0, 0, 51]);
        // Zero alpha drops color entirely.
        fmt.encode([0.5, 0.5, 0.5, 0.0], &mut out);
        assert_eq!(out, [0; 4]);
    }
    #[test]
    fn float_sanitized() {
        let fmt = PixelFormat::RgbaF32Premultiplied;
        let mut bytes = [0u8; 16];
        fmt.encode([0.25, f32::NAN, 0.0, 0.5], &mut bytes);
        assert_eq!(fmt.decode(&bytes), [0.25, 0.0, 0.0, 0.5]);
        assert!(!fmt.is_transparent(&bytes));
    }
}
