use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bevy_ecs::{
	schedule::{ExecutorKind, IntoSystemConfigs, Schedule, ScheduleLabel},
	system::{NonSend, NonSendMut, Res, ResMut, Resource},
	world::World,
};
use log::{debug, info, trace};
use winit::event::{Event, WindowEvent};

use crate::{
	core::{
		config::{OffscreenConfig, TracerConfig},
		display::AppWindow,
		gpu::Gpu,
	},
	libs::device::{
		wgpu_device::{Screen, WgpuDevice},
		Resolution,
	},
	tracer::Tracer,
	EventLoop,
};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// The schedule that runs before every frame, meant for keeping track of time
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Update;

/// The schedule that runs every frame, meant for rendering
#[derive(ScheduleLabel, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Render;

/// Frames between two status updates in the window title.
const STATUS_INTERVAL: u64 = 30;

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

#[derive(Resource, Debug, Copy, Clone)]
pub struct Time {
	start_time: Instant,
	pub current_time: Duration,

	last_frame_time: Instant,
	pub dt: Duration,

	pub counter_frame: u64,

	pub fps: f32,
	pub smooth_fps: f32,
}

impl Time {
	const SMOOTH_RESPONSIVENESS: f32 = 0.05;

	pub fn smoothed(&self, smoothed: f32, raw: f32) -> f32 {
		(1.0 - Self::SMOOTH_RESPONSIVENESS) * smoothed + Self::SMOOTH_RESPONSIVENESS * raw
	}
}

impl Default for Time {
	fn default() -> Self {
		Self {
			start_time: Instant::now(),
			current_time: Default::default(),
			last_frame_time: Instant::now(),
			dt: Default::default(),
			counter_frame: Default::default(),
			fps: Default::default(),
			smooth_fps: Default::default(),
		}
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Opens a window and traces into it until it is closed.
pub fn run(config: &TracerConfig) -> Result<()> {
	let event_loop = EventLoop::new().context("Couldn't create winit event loop")?;
	let app_window = AppWindow::new(&event_loop, &config.title, config.resolution)?;

	let gpu = pollster::block_on(Gpu::new())?;
	let surface = gpu
		.instance
		.create_surface(app_window.winit_window.clone())
		.context("Couldn't create surface from window")?;

	let size = app_window.size();
	let screen = WgpuDevice::surface_screen(&gpu, surface, size)?;
	let device = WgpuDevice::new(gpu, screen, config.filter.into())?;

	let mut tracer = Tracer::new(device, config)?;
	// The window may not have gotten the size it asked for
	tracer.resize(size);

	let mut world = World::new();
	world.insert_resource(Time::default());
	world.insert_resource(app_window);
	world.insert_non_send_resource(tracer);

	let mut update = Schedule::new(Update);
	update.set_executor_kind(ExecutorKind::SingleThreaded);
	update.add_systems(advance_time);
	world.add_schedule(update);

	let mut render = Schedule::new(Render);
	render.set_executor_kind(ExecutorKind::SingleThreaded);
	render.add_systems((trace_frame, show_status).chain());
	world.add_schedule(render);

	start_event_loop(world, event_loop)
}

/// Traces a fixed number of frames without a window and saves the last one.
pub fn run_offscreen(config: &TracerConfig, offscreen: &OffscreenConfig) -> Result<()> {
	let gpu = pollster::block_on(Gpu::new())?;
	let device = WgpuDevice::new(gpu, Screen::Offscreen(config.resolution), config.filter.into())?;
	let mut tracer = Tracer::new(device, config)?;

	let start = Instant::now();
	for frame in 0..offscreen.frames {
		// Every frame gets its own noise
		tracer.frame(frame as f32 / 60.0);
		trace!("Traced frame {}", frame + 1);
	}

	let image = tracer.device.read_screen()?;
	image
		.save(&offscreen.output)
		.with_context(|| format!("Couldn't save {}", offscreen.output.display()))?;

	info!(
		"Saved {} frame(s) to {} in {:.2}s",
		offscreen.frames,
		offscreen.output.display(),
		start.elapsed().as_secs_f32()
	);

	Ok(())
}

fn start_event_loop(mut world: World, event_loop: EventLoop) -> Result<()> {
	trace!("Starting event loop");

	world.resource::<AppWindow>().winit_window.request_redraw();

	event_loop
		.run(move |event, target| {
			let Event::WindowEvent { event, .. } = event else {
				return;
			};

			match event {
				WindowEvent::CloseRequested => {
					trace!("Winit event: Event::WindowEvent::CloseRequested");
					target.exit();
				}

				WindowEvent::Resized(physical_size) if physical_size.width > 0 && physical_size.height > 0 => {
					trace!("Winit event: Event::WindowEvent::Resized");
					let size = Resolution::new(physical_size.width, physical_size.height);

					let mut tracer = world.non_send_resource_mut::<Tracer<WgpuDevice>>();
					tracer.device.resize_screen(size);
					tracer.resize(size);
				}

				WindowEvent::RedrawRequested => {
					let _ = world.try_run_schedule(Update);
					let _ = world.try_run_schedule(Render);
					world.resource::<AppWindow>().winit_window.request_redraw();
				}

				_ => {}
			}
		})
		.context("The event loop stopped unexpectedly")
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

fn advance_time(mut time: ResMut<Time>) {
	let now = Instant::now();

	time.dt = now - time.last_frame_time;
	time.current_time = now - time.start_time;
	time.last_frame_time = now;
	time.counter_frame += 1;

	if !time.dt.is_zero() {
		time.fps = 1. / time.dt.as_secs_f32();
		time.smooth_fps = time.smoothed(time.smooth_fps, time.fps);
	}
}

fn trace_frame(time: Res<Time>, mut tracer: NonSendMut<Tracer<WgpuDevice>>) {
	tracer.frame(time.current_time.as_secs_f32());
}

fn show_status(time: Res<Time>, tracer: NonSend<Tracer<WgpuDevice>>, app_window: Res<AppWindow>) {
	if time.counter_frame % STATUS_INTERVAL != 0 {
		return;
	}

	let status = format!("{} frames | {:.1} fps", tracer.frames_accumulated(), time.smooth_fps);
	debug!("{}", status);
	app_window.set_status(&status);
}
