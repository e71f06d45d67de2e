//! Producer-facing quad type.

use smol_str::SmolStr;

use crate::error::Result;

/// Default tint: the sprite bitmap is used unmodified.
pub const WHITE: u32 = 0xFF_FF_FF;

/// One planar, textured four-corner face as emitted by a sampler.
///
/// Corners need not be wound consistently; the assembler re-orders them.
#[derive(Debug, Clone, PartialEq)]
pub struct Quad {
    /// Grouping key; one mesh/material/node triple is emitted per key.
    pub material: SmolStr,
    pub sprite: SmolStr,
    pub overlay_sprite: Option<SmolStr>,
    /// `x, y, z` for each of the 4 corners.
    pub positions: [f32; 12],
    /// Primary UV (`u, v` per corner) in sprite space.
    pub uv0: [f32; 8],
    /// Secondary UV (`u, v` per corner).
    pub uv1: [f32; 8],
    /// Face normal.
    pub normal: [f32; 3],
    /// `r, g, b, a` per corner.
    pub colors: [f32; 16],
    /// `0xRRGGBB` tint applied to the sprite bitmap.
    pub tint: u32,
    pub double_sided: bool,
}

impl Quad {
    /// A white, single-sided quad with an up-facing normal and zeroed secondary UV.
    pub fn new(
        material: impl Into<SmolStr>,
        sprite: impl Into<SmolStr>,
        positions: [f32; 12],
        uv0: [f32; 8],
    ) -> Self {
        Self {
            material: material.into(),
            sprite: sprite.into(),
            overlay_sprite: None,
            positions,
            uv0,
            uv1: [0.0; 8],
            normal: [0.0, 1.0, 0.0],
            colors: [1.0; 16],
            tint: WHITE,
            double_sided: false,
        }
    }

    pub fn with_overlay(mut self, overlay: impl Into<SmolStr>) -> Self {
        self.overlay_sprite = Some(overlay.into());
        self
    }

    pub fn with_uv1(mut self, uv1: [f32; 8]) -> Self {
        self.uv1 = uv1;
        self
    }

    pub fn with_normal(mut self, normal: [f32; 3]) -> Self {
        self.normal = normal;
        self
    }

    pub fn with_colors(mut self, colors: [f32; 16]) -> Self {
        self.colors = colors;
        self
    }

    pub fn with_tint(mut self, tint: u32) -> Self {
        self.tint = tint & WHITE;
        self
    }

    pub fn with_double_sided(mut self, double_sided: bool) -> Self {
        self.double_sided = double_sided;
        self
    }

    /// Quads without a material group or sprite carry nothing to export.
    pub fn is_addressable(&self) -> bool {
        !self.material.is_empty() && !self.sprite.is_empty()
    }
}

/// Destination for sampled quads.
///
/// Implementations must accept calls from any number of threads.
pub trait QuadSink: Send + Sync {
    fn add_quad(&self, quad: Quad) -> Result<()>;
}
