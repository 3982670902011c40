// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use tracing::info;

pub use winit;

use winit::{
    dpi::PhysicalSize,
    event_loop::ActiveEventLoop,
    window::{Window, WindowAttributes},
};

/// What the app asks the windowing system for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSpec {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowSpec {
    fn default() -> Self {
        WindowSpec {
            title: "trigon".to_owned(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

impl WindowSpec {
    pub fn attributes(&self) -> WindowAttributes {
        Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(self.width.max(1), self.height.max(1)))
            .with_resizable(self.resizable)
    }
}

pub fn create_window(event_loop: &ActiveEventLoop, spec: &WindowSpec) -> Result<Window> {
    let window = event_loop
        .create_window(spec.attributes())
        .context("create_window")?;
    let size = window.inner_size();
    info!(
        "window '{}' created ({}x{}, resizable={})",
        spec.title, size.width, size.height, spec.resizable
    );
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_spec_is_resizable_tutorial_size() {
        let spec = WindowSpec::default();
        assert_eq!((spec.width, spec.height), (800, 600));
        assert!(spec.resizable);
    }

    #[test]
    fn test_attributes_never_request_zero_area() {
        let spec = WindowSpec {
            width: 0,
            height: 0,
            ..WindowSpec::default()
        };
        let attrs = spec.attributes();
        let size = attrs.inner_size.expect("inner size set");
        let physical: PhysicalSize<u32> = size.to_physical(1.0);
        assert_eq!(physical, PhysicalSize::new(1, 1));
    }
}
