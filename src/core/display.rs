use std::sync::Arc;

use anyhow::{Context, Result};
use bevy_ecs::system::Resource;
use winit::{dpi::PhysicalSize, window::WindowBuilder};

use crate::{libs::device::Resolution, EventLoop};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Resource)]
pub struct AppWindow {
	// Window needs to be an arc so that a surface can be created from it safely
	pub winit_window: Arc<winit::window::Window>,

	pub title: String,
}

impl AppWindow {
	pub fn new(event_loop: &EventLoop, title: &str, size: Resolution) -> Result<Self> {
		let window = WindowBuilder::new()
			.with_title(title)
			.with_inner_size(PhysicalSize::new(size.w, size.h))
			.build(event_loop)
			.context("Couldn't build winit window from event loop")?;

		// Center the window
		if let Some(monitor) = window.current_monitor() {
			let screen_size = monitor.size();
			let window_size = window.outer_size();

			window.set_outer_position(winit::dpi::PhysicalPosition {
				x: f64::from(screen_size.width.saturating_sub(window_size.width)) / 2.
					+ f64::from(monitor.position().x),
				y: f64::from(screen_size.height.saturating_sub(window_size.height)) / 2.
					+ f64::from(monitor.position().y),
			});
		}

		Ok(Self {
			winit_window: Arc::new(window),
			title: title.to_owned(),
		})
	}

	pub fn size(&self) -> Resolution {
		let size = self.winit_window.inner_size();
		Resolution::new(size.width, size.height)
	}

	/// Shows progress next to the title.
	pub fn set_status(&self, status: &str) {
		self.winit_window.set_title(&format!("{} | {}", self.title, status));
	}
}
