use crate::util::{FiniteF32, FiniteF32Error};

/// A premultiplied, linear color.
/// All transparent values (alpha == 0) are normalized to transparent black.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, bytemuck::Zeroable, Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct Color([FiniteF32; 4]);
impl Color {
    pub const TRANSPARENT: Self = Self([FiniteF32::ZERO; 4]);
    pub const WHITE: Self = Self([FiniteF32::ONE; 4]);
    pub const BLACK: Self = Self([
        FiniteF32::ZERO,
        FiniteF32::ZERO,
        FiniteF32::ZERO,
        FiniteF32::ONE,
    ]);
    /// Create a new color from premul linear channels. Normalizes all fully transparent colors to 0.0.
    pub fn new_lossy(r: f32, g: f32, b: f32, a: f32) -> Result<Self, FiniteF32Error> {
        let raw = Self([
            FiniteF32::new(r)?,
            FiniteF32::new(g)?,
            FiniteF32::new(b)?,
            FiniteF32::new(a)?,
        ]);
        if raw.0[3].get() == 0.0 {
            Ok(Self::TRANSPARENT)
        } else {
            Ok(raw)
        }
    }
    /// Create a new color from premul linear channels. Normalizes all fully transparent colors to 0.0.
    pub fn from_array_lossy([r, g, b, a]: [f32; 4]) -> Result<Self, FiniteF32Error> {
        Self::new_lossy(r, g, b, a)
    }
    /// Create from straight (non-premultiplied) channels.
    pub fn from_straight(r: f32, g: f32, b: f32, a: f32) -> Result<Self, FiniteF32Error> {
        Self::new_lossy(r * a, g * a, b * a, a)
    }
    /// An opaque color from 8-bit channels.
    #[must_use]
    pub fn opaque_rgb8(r: u8, g: u8, b: u8) -> Self {
        let [r, g, b] = [r, g, b].map(|c| f32::from(c) / 255.0);
        // Always finite, from a u8.
        Self::new_lossy(r, g, b, 1.0).unwrap_or(Self::BLACK)
    }
    /// Scale every channel, as if viewing the color through the given opacity.
    #[must_use]
    pub fn with_opacity(self, opacity: f32) -> Self {
        let opacity = if opacity.is_nan() {
            0.0
        } else {
            opacity.clamp(0.0, 1.0)
        };
        Self::from_array_lossy(self.as_array().map(|c| c * opacity)).unwrap_or(Self::TRANSPARENT)
    }
    #[must_use]
    pub fn as_array(&self) -> [f32; 4] {
        [
            self.0[0].get(),
            self.0[1].get(),
            self.0[2].get(),
            self.0[3].get(),
        ]
    }
    #[must_use]
    pub fn alpha(&self) -> f32 {
        self.0[3].get()
    }
    #[must_use]
    pub fn is_transparent(&self) -> bool {
        self.alpha() <= 0.0
    }
}

impl TryFrom<[f32; 4]> for Color {
    type Error = FiniteF32Error;
    fn try_from(value: [f32; 4]) -> Result<Self, Self::Error> {
        Self::from_array_lossy(value)
    }
}
impl From<Color> for [f32; 4] {
    fn from(value: Color) -> Self {
        value.as_array()
    }
}

#[cfg(test)]
mod test {
    use super::Color;
    #[test]
    fn transparent_normalizes() {
        let c = Color::new_lossy(0.3, 0.2, 0.1, 0.0).unwrap();
        assert_eq!(c, Color::TRANSPARENT);
        assert!(Color::new_lossy(f32::NAN, 0.0, 0.0, 1.0).is_err());
    }
    #[test]
    fn straight_premultiplies() {
        let c = Color::from_straight(1.0, 0.5, 0.0, 0.5).unwrap();
        assert_eq!(c.as_array(), [0.5, 0.25, 0.0, 0.5]);
        assert_eq!(c.with_opacity(0.5).as_array(), [0.25, 0.125, 0.0, 0.25]);
    }
}
