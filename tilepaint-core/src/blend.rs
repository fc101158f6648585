//! # Blending
//!
//! All operators act on premultiplied pixels. Separable modes follow the W3C compositing
//! formulas, `Rc = Sc·(1 - Da) + Dc·(1 - Sa) + Sa·Da·B(cs, cd)`.

use crate::pixel::Premul;

#[derive(
    strum::AsRefStr,
    PartialEq,
    Eq,
    strum::EnumIter,
    Copy,
    Clone,
    Hash,
    Debug,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
#[repr(u8)]
pub enum BlendMode {
    /// Source-over.
    #[default]
    Normal,
    Add,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    /// Destination-out. The source's alpha punches a hole in the destination.
    Erase,
}

impl BlendMode {
    /// Blend a premultiplied `src` onto a premultiplied `dst`.
    #[must_use]
    pub fn apply(self, src: Premul, dst: Premul) -> Premul {
        let sa = src[3];
        let out = match self {
            Self::Normal => [0, 1, 2, 3].map(|i| src[i] + dst[i] * (1.0 - sa)),
            Self::Add => [0, 1, 2, 3].map(|i| (src[i] + dst[i]).min(1.0)),
            Self::Erase => dst.map(|c| c * (1.0 - sa)),
            Self::Multiply => separable(src, dst, |cs, cd| cs * cd),
            Self::Screen => separable(src, dst, |cs, cd| cs + cd - cs * cd),
            Self::Overlay => separable(src, dst, |cs, cd| {
                if cd <= 0.5 {
                    2.0 * cs * cd
                } else {
                    1.0 - 2.0 * (1.0 - cs) * (1.0 - cd)
                }
            }),
            Self::Darken => separable(src, dst, f32::min),
            Self::Lighten => separable(src, dst, f32::max),
        };
        out.map(|c| if c.is_finite() { c } else { 0.0 })
    }
}

fn separable(src: Premul, dst: Premul, mix: impl Fn(f32, f32) -> f32) -> Premul {
    let (sa, da) = (src[3], dst[3]);
    let unpremul = |c: f32, a: f32| if a > 0.0 { c / a } else { 0.0 };
    let color = |i: usize| {
        let cs = unpremul(src[i], sa);
        let cd = unpremul(dst[i], da);
        src[i] * (1.0 - da) + dst[i] * (1.0 - sa) + sa * da * mix(cs, cd)
    };
    [color(0), color(1), color(2), sa + da - sa * da]
}

/// Blend mode for an object, including a mode, opacity modulate, and alpha clip
#[derive(Copy, Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Blend {
    pub mode: BlendMode,
    pub opacity: f32,
    /// If alpha clip enabled, it should not affect background alpha, krita style!
    pub alpha_clip: bool,
}
impl Default for Blend {
    fn default() -> Self {
        Self {
            mode: BlendMode::default(),
            opacity: 1.0,
            alpha_clip: false,
        }
    }
}
impl Blend {
    /// Opacity clamped into `[0, 1]`, with NaN treated as fully transparent.
    #[must_use]
    pub fn clamped_opacity(&self) -> f32 {
        if self.opacity.is_nan() {
            0.0
        } else {
            self.opacity.clamp(0.0, 1.0)
        }
    }
    /// Blend `src` onto `dst` with this mode, opacity, and clip.
    #[must_use]
    pub fn apply(&self, src: Premul, dst: Premul) -> Premul {
        let opacity = self.clamped_opacity();
        let src = src.map(|c| c * opacity);
        let out = self.mode.apply(src, dst);
        if !self.alpha_clip {
            return out;
        }
        // Keep the straight color of the result, but force the destination's alpha.
        let (out_alpha, dst_alpha) = (out[3], dst[3]);
        if out_alpha <= 0.0 || dst_alpha <= 0.0 {
            return dst;
        }
        let scale = dst_alpha / out_alpha;
        [out[0] * scale, out[1] * scale, out[2] * scale, dst_alpha]
    }
}
