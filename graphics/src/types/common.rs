//! Common types shared across the graphics system.

/// 3D extent for textures and render targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3d {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Depth in pixels (1 for 2D textures).
    pub depth: u32,
}

impl Extent3d {
    /// Create a new 2D extent.
    pub fn new_2d(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: 1,
        }
    }

    /// Extent of mip `level`: each dimension halves per level, never below 1.
    pub fn mip(&self, level: u32) -> Self {
        let shrink = |v: u32| v.checked_shr(level).unwrap_or(0).max(1);
        Self {
            width: shrink(self.width),
            height: shrink(self.height),
            depth: shrink(self.depth),
        }
    }

    /// Scale width and height, rounding down but never below 1.
    pub fn scaled(&self, scale: f32) -> Self {
        let apply = |v: u32| ((v as f32 * scale) as u32).max(1);
        Self {
            width: apply(self.width),
            height: apply(self.height),
            depth: self.depth.max(1),
        }
    }
}
