use log::{debug, trace};

use super::{CompiledPass, FrameCarry, PassPipeline, Presenter, PREV_UNIT, SRC_UNIT};
use crate::libs::{
	binding::{BindingValue, Parameters},
	device::{PassDevice, TextureId, UniformArgs},
};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

impl PassPipeline {
	/// Draws every compiled pass once, in pass order, then presents the last pass's
	/// output. Meant to be called once per display refresh.
	pub fn render<D, P>(&mut self, device: &mut D, host: &P)
	where
		D: PassDevice + ?Sized,
		P: Parameters + ?Sized,
	{
		if self.passes.is_empty() {
			debug!("Nothing to render, no pass is compiled");
			return;
		}

		let carry = self.config.carry;

		for i in 0..self.passes.len() {
			let src = self.predecessor_output(i);
			self.passes[i].draw(device, host, src, carry);
		}

		if let Some(output) = self.output() {
			match &self.presenter {
				Some(presenter) => presenter.draw(device, output),
				None => device.present(output),
			}
		}

		device.end_frame();
		self.frame += 1;
	}

	/// The fresh output of the pass right before the `i`th compiled pass, if that pass
	/// compiled.
	fn predecessor_output(&self, i: usize) -> Option<TextureId> {
		let index = self.passes[i].index;
		if index == 0 {
			return None;
		}

		i.checked_sub(1)
			.map(|j| &self.passes[j])
			.filter(|previous| previous.index + 1 == index)
			.map(|previous| previous.output(self.config.carry))
	}
}

impl CompiledPass {
	fn draw<D, P>(&mut self, device: &mut D, host: &P, src: Option<TextureId>, carry: FrameCarry)
	where
		D: PassDevice + ?Sized,
		P: Parameters + ?Sized,
	{
		trace!("Drawing pass {}", self.index);

		let target = self.color_target();
		let prev = self.prev_target();

		device.bind_framebuffer(Some(target.framebuffer));
		device.use_program(self.program);

		if self.index > 0 {
			match src {
				Some(texture) => device.bind_texture(SRC_UNIT, texture),
				None => {
					trace!("Pass {} has no preceding output to read as `src`", self.index);
					device.unbind_texture(SRC_UNIT);
				}
			}

			if let Some(location) = self.src {
				device.set_uniform(location, UniformArgs::Sampler(SRC_UNIT));
			}
		}

		device.bind_texture(PREV_UNIT, prev.texture);
		if let Some(location) = self.prev {
			device.set_uniform(location, UniformArgs::Sampler(PREV_UNIT));
		}

		for uniform in &self.uniforms {
			let Some(binding) = uniform.spec.read(&uniform.field, host) else {
				continue;
			};

			if let BindingValue::Args(args) = binding.value {
				device.set_uniform(uniform.location, args);
			}
		}

		for texture in &self.textures {
			device.bind_texture(texture.unit, texture.texture);
			if let Some(location) = texture.location {
				device.set_uniform(location, UniformArgs::Sampler(texture.unit));
			}
		}

		device.draw_quad(self.quad);

		match carry {
			FrameCarry::Swap => self.current = 1 - self.current,
			FrameCarry::Copy => device.copy_texture(target.texture, prev.texture),
		}
	}
}

impl Presenter {
	fn draw<D>(&self, device: &mut D, output: TextureId)
	where
		D: PassDevice + ?Sized,
	{
		device.bind_framebuffer(None);
		device.use_program(self.program);

		device.bind_texture(SRC_UNIT, output);
		if let Some(location) = self.src {
			device.set_uniform(location, UniformArgs::Sampler(SRC_UNIT));
		}

		device.draw_quad(self.quad);
	}
}
