use glam::{Mat4, Vec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Number of floats per sphere in the parameter block read by `path.wgsl`.
pub const SPHERE_STRIDE: usize = 16;

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Sphere {
	pub position: Vec3,
	pub radius: f32,
	pub albedo: Vec3,
	pub specular: Vec3,
	pub emission: Vec3,
	pub smoothness: Vec3,
}

impl Sphere {
	pub fn new(position: Vec3, radius: f32, albedo: Vec3, emission: Vec3) -> Self {
		Self {
			position,
			radius,
			albedo,
			emission,
			..Default::default()
		}
	}

	/// Appends `position, radius, albedo, specular, emission, smoothness`.
	pub fn write_params(&self, out: &mut Vec<f32>) {
		out.extend_from_slice(&self.position.to_array());
		out.push(self.radius);
		out.extend_from_slice(&self.albedo.to_array());
		out.extend_from_slice(&self.specular.to_array());
		out.extend_from_slice(&self.emission.to_array());
		out.extend_from_slice(&self.smoothness.to_array());
	}

	/// Distance along a normalized ray to the sphere's surface.
	pub fn intersect(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
		let d = origin - self.position;
		let p1 = -direction.dot(d);
		let p2sqr = p1 * p1 - d.length_squared() + self.radius * self.radius;
		if p2sqr < 0.0 {
			return None;
		}

		let p2 = p2sqr.sqrt();
		let t = if p1 - p2 > 0.0 { p1 - p2 } else { p1 + p2 };
		(t > 0.0).then_some(t)
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// A checkered ground plane at `y = 0` with spheres on it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Scene {
	pub spheres: Vec<Sphere>,
}

impl Scene {
	/// Three fixed spheres (a large grey one, a small red one and a light) and `count`
	/// random ones around the origin. The same seed always gives the same scene.
	pub fn generate(seed: u64, count: usize) -> Self {
		let mut spheres = vec![
			Sphere::new(Vec3::new(0.0, 0.0, -10.0), 1.5, Vec3::splat(0.4), Vec3::ZERO),
			Sphere::new(Vec3::new(0.0, 0.4, -4.0), 0.4, Vec3::new(0.9, 0.2, 0.2), Vec3::ZERO),
			Sphere::new(Vec3::new(-0.5, 0.8, -8.0), 0.3, Vec3::ONE, Vec3::splat(10.0)),
		];

		let mut rng = StdRng::seed_from_u64(seed);
		for _ in 0..count {
			let position = Vec3::new(rng.gen::<f32>() * 4.0 - 2.0, rng.gen(), rng.gen::<f32>() * 4.0 - 2.0);
			let radius = rng.gen::<f32>() * 0.3 + 0.2;
			let albedo = Vec3::new(rng.gen(), rng.gen(), rng.gen());
			// Roughly a third of them glow
			let emission = if rng.gen::<f32>() > 0.3 {
				Vec3::ZERO
			} else {
				Vec3::new(rng.gen(), rng.gen(), rng.gen()) * 10.0
			};

			spheres.push(Sphere::new(position, radius, albedo, emission));
		}

		Self { spheres }
	}

	/// Every sphere's parameters back to back.
	pub fn sphere_params(&self) -> Vec<f32> {
		let mut params = Vec::with_capacity(self.spheres.len() * SPHERE_STRIDE);
		for sphere in &self.spheres {
			sphere.write_params(&mut params);
		}
		params
	}

	/// Distance to the closest surface along the ray, ground included.
	pub fn focus_distance(&self, origin: Vec3, direction: Vec3) -> Option<f32> {
		let direction = direction.normalize_or_zero();

		let ground = (direction.y.abs() > f32::EPSILON)
			.then(|| -origin.y / direction.y)
			.filter(|t| *t > 0.0);

		self.spheres
			.iter()
			.filter_map(|sphere| sphere.intersect(origin, direction))
			.chain(ground)
			.min_by(f32::total_cmp)
	}
}

/*
--------------------------------------------------------------------------------
||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||||
--------------------------------------------------------------------------------
*/

/// Where the camera stands and where it looks. The camera looks down `-Z` before
/// rotating.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CameraRig {
	pub translation: Vec3,
	/// Pitch
	pub rx: f32,
	/// Yaw
	pub ry: f32,
}

impl Default for CameraRig {
	fn default() -> Self {
		Self {
			translation: Vec3::new(0.0, 0.7, 1.5),
			rx: -0.05,
			ry: 0.0,
		}
	}
}

impl CameraRig {
	pub fn transform(&self) -> Mat4 {
		Mat4::from_translation(self.translation) * Mat4::from_rotation_y(self.ry) * Mat4::from_rotation_x(self.rx)
	}

	/// Column-major, as the shader expects it.
	pub fn matrix(&self) -> [f32; 16] {
		self.transform().to_cols_array()
	}

	pub fn forward(&self) -> Vec3 {
		self.transform().transform_vector3(Vec3::NEG_Z).normalize()
	}
}
