// Stereo renderer module
// wgpu-based per-eye rendering and GPU context lifecycle

mod lifecycle;
mod stereo;

pub use lifecycle::{ViewerEvent, ViewerHandle, ViewerWindow};
pub use stereo::StereoRenderer;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("GPU context init failed: {0}")]
    ContextInit(String),
    #[error("Shading program init failed: {0}")]
    Program(String),
    #[error("Render failed: {0}")]
    Render(String),
    #[error("Window error: {0}")]
    Window(String),
}

/// Renderer lifecycle. Transitions only move forward; `Destroyed` is
/// terminal and reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RenderState {
    Uninitialized,
    ContextReady,
    ProgramReady,
    Rendering,
    Destroyed,
}

/// Split the output surface into the two per-eye halves.
///
/// Each viewport is `(x, y, width, height)` in pixels; together they tile
/// the full surface with no gap, seam, or letterbox.
pub fn eye_viewports(surface_width: u32, surface_height: u32) -> [(f32, f32, f32, f32); 2] {
    let half = surface_width as f32 / 2.0;
    let height = surface_height as f32;
    [(0.0, 0.0, half, height), (half, 0.0, half, height)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewports_tile_the_surface() {
        let [left, right] = eye_viewports(1920, 1080);
        assert_eq!(left, (0.0, 0.0, 960.0, 1080.0));
        assert_eq!(right, (960.0, 0.0, 960.0, 1080.0));
        // No gap, no overlap
        assert_eq!(left.0 + left.2, right.0);
        assert_eq!(left.2 + right.2, 1920.0);
    }

    #[test]
    fn lifecycle_states_order_forward() {
        let progression = [
            RenderState::Uninitialized,
            RenderState::ContextReady,
            RenderState::ProgramReady,
            RenderState::Rendering,
            RenderState::Destroyed,
        ];
        for pair in progression.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        // Destroyed is terminal: nothing orders after it
        assert!(progression.iter().all(|s| *s <= RenderState::Destroyed));
    }

    #[test]
    fn odd_width_leaves_no_uncovered_pixel() {
        let [left, right] = eye_viewports(101, 50);
        assert_eq!(left.2 + right.2, 101.0);
        assert_eq!(right.0 + right.2, 101.0);
    }
}
