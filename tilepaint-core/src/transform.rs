//! # Transforms
//!
//! Layers are placed into the document by an affine [`Matrix`]. In practice, these are built from a
//! [`Similarity`], as the compositor assumes uniform scale (see [`Matrix::uniform_scale`]).

use crate::util::Rect;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformError {
    #[error("matrix is not invertible")]
    Singular,
    #[error("matrix contains non-finite elements")]
    NotFinite,
}

/// A transform consisting of an optional horizontal flip, then uniform scale,
/// then rotation, then translation.
///
/// This transform maintains the "Similarity" of shapes and their image, maintaining
/// all angles and the ratios between all lengths.
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable, PartialEq, PartialOrd)]
#[repr(C)]
pub struct Similarity {
    /// Special interpretation: Negative bit set == hflip.
    /// Uniform scale should occur as abs(scale).
    pub flip_scale: f32,
    /// Rotation, in radians *CW* from positive X
    pub rotation: f32,
    /// Translation, in pixels. 0,0 is top left, +X Right, +Y down.
    pub translation: [f32; 2],
}

impl Similarity {
    #[must_use]
    pub fn scale(&self) -> f32 {
        self.flip_scale.abs()
    }
}

impl Default for Similarity {
    fn default() -> Self {
        Self {
            flip_scale: 1.0,
            rotation: 0.0,
            translation: [0.0; 2],
        }
    }
}

/// An arbitrary 2D affine transform.
///
/// Maps `[x, y]` to `x * elements[0] + y * elements[1] + elements[2]`.
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable, PartialEq, PartialOrd)]
#[repr(C)]
pub struct Matrix {
    /// Column-major matrix elements
    pub elements: [[f32; 2]; 3],
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Self = Self {
        elements: [[1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
    };
    #[must_use]
    pub const fn translation(x: f32, y: f32) -> Self {
        Self {
            elements: [[1.0, 0.0], [0.0, 1.0], [x, y]],
        }
    }
    #[must_use]
    pub const fn scale(factor: f32) -> Self {
        Self {
            elements: [[factor, 0.0], [0.0, factor], [0.0, 0.0]],
        }
    }
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.elements.iter().flatten().all(|e| e.is_finite())
    }
    #[must_use]
    pub fn determinant(&self) -> f32 {
        let [[a, b], [c, d], _] = self.elements;
        a * d - b * c
    }
    /// Compute the inverse transform.
    /// # Errors
    /// If the matrix collapses space (zero determinant) or holds non-finite values.
    pub fn invert(&self) -> Result<Self, TransformError> {
        if !self.is_finite() {
            return Err(TransformError::NotFinite);
        }
        let det = self.determinant();
        if det == 0.0 || !det.is_normal() {
            return Err(TransformError::Singular);
        }
        let [[a, b], [c, d], [e, f]] = self.elements;
        let inv_det = det.recip();
        let (ia, ib, ic, id) = (d * inv_det, -b * inv_det, -c * inv_det, a * inv_det);
        let inverse = Self {
            elements: [[ia, ib], [ic, id], [-(ia * e + ic * f), -(ib * e + id * f)]],
        };
        if inverse.is_finite() {
            Ok(inverse)
        } else {
            Err(TransformError::Singular)
        }
    }
    /// Create a transform that applies `self`, then `next`. (i.e. `next ∘ self`)
    #[must_use]
    pub fn then(&self, next: &Matrix) -> Matrix {
        let [x_axis, y_axis, translate] = self.elements;
        Matrix {
            elements: [
                next.transform_vector(x_axis),
                next.transform_vector(y_axis),
                next.transform_point(translate),
            ],
        }
    }
    #[must_use]
    pub fn transform_point(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        let [[a, b], [c, d], [e, f]] = self.elements;
        [a * x + c * y + e, b * x + d * y + f]
    }
    /// Transform ignoring translation.
    #[must_use]
    pub fn transform_vector(&self, [x, y]: [f32; 2]) -> [f32; 2] {
        let [[a, b], [c, d], _] = self.elements;
        [a * x + c * y, b * x + d * y]
    }
    /// Transform all four corners of the rect, and find the integer rect that covers the result.
    /// None if the result is empty or not finite.
    #[must_use]
    pub fn transform_rect(&self, rect: &Rect) -> Option<Rect> {
        if rect.is_empty() {
            return None;
        }
        // f32 is exact for the integer ranges a canvas will realistically see.
        #[allow(clippy::cast_precision_loss)]
        let (l, t, r, b) = (
            rect.left as f32,
            rect.top as f32,
            rect.right as f32,
            rect.bottom as f32,
        );
        let corners = [[l, t], [r, t], [l, b], [r, b]].map(|p| self.transform_point(p));
        let min = corners
            .iter()
            .fold([f32::INFINITY; 2], |acc, p| [acc[0].min(p[0]), acc[1].min(p[1])]);
        let max = corners
            .iter()
            .fold([f32::NEG_INFINITY; 2], |acc, p| [acc[0].max(p[0]), acc[1].max(p[1])]);
        Rect::enclosing(min, max)
    }
    /// The scale factor of this transform, taken as the length of the transformed X axis.
    ///
    /// Only meaningful for uniform-scale transforms, where both axes agree.
    #[must_use]
    pub fn uniform_scale(&self) -> f32 {
        let [a, b] = self.elements[0];
        a.hypot(b)
    }
    /// Check if this transform is a plain translation by a whole number of pixels.
    /// Such transforms map pixel centers exactly onto pixel centers.
    #[must_use]
    pub fn is_integer_translation(&self) -> bool {
        let [x_axis, y_axis, [e, f]] = self.elements;
        x_axis == [1.0, 0.0] && y_axis == [0.0, 1.0] && e.fract() == 0.0 && f.fract() == 0.0
    }
}

impl From<Similarity> for Matrix {
    fn from(value: Similarity) -> Self {
        // The flip bit is already stored in the sign of `flip_scale`!
        let h_scale = value.flip_scale;
        let v_scale = value.scale();

        let (sin, cos) = value.rotation.sin_cos();

        Self {
            // Scale times rotation, and then translate.
            elements: [
                [h_scale * cos, h_scale * sin],
                [v_scale * -sin, v_scale * cos],
                value.translation,
            ],
        }
    }
}

impl From<[[f32; 2]; 3]> for Matrix {
    fn from(elements: [[f32; 2]; 3]) -> Self {
        Self { elements }
    }
}

impl From<Matrix> for [[f32; 2]; 3] {
    fn from(value: Matrix) -> Self {
        value.elements
    }
}
