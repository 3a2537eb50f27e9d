//! Point-to-point kinematics
//!
//! A [`Kinematics`] maps a point of virtual (kinematic) space to the
//! positions of the physical axes feeding the transform, and back. Both
//! directions are pure functions of their input.

use printkit_settings::KinematicsSettings;

/// Stateless virtual/physical mapping
pub trait Kinematics: Send + Sync {
    /// Number of axes on both sides
    fn num_axes(&self) -> usize;

    /// Physical positions for a virtual point. Unreachable points yield
    /// NaN, which axis clamping resolves.
    fn virt_to_phys(&self, virt: &[f64], phys: &mut [f64]);

    /// Virtual point for physical positions
    fn phys_to_virt(&self, phys: &[f64], virt: &mut [f64]);
}

/// Build the configured kinematics
pub fn from_settings(settings: &KinematicsSettings) -> Box<dyn Kinematics> {
    match settings {
        KinematicsSettings::Delta {
            diagonal_rod,
            tower_radius,
        } => Box::new(DeltaKinematics::new(*diagonal_rod, *tower_radius)),
    }
}

/// Linear delta: three vertical towers at 90, 210 and 330 degrees, each
/// carriage joined to the effector by a rod of fixed length
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaKinematics {
    rod2: f64,
    towers: [(f64, f64); 3],
}

impl DeltaKinematics {
    pub fn new(diagonal_rod: f64, tower_radius: f64) -> Self {
        let tower = |deg: f64| {
            let rad = deg.to_radians();
            (tower_radius * rad.cos(), tower_radius * rad.sin())
        };
        Self {
            rod2: diagonal_rod * diagonal_rod,
            towers: [tower(90.0), tower(210.0), tower(330.0)],
        }
    }
}

impl Kinematics for DeltaKinematics {
    fn num_axes(&self) -> usize {
        3
    }

    fn virt_to_phys(&self, virt: &[f64], phys: &mut [f64]) {
        let (x, y, z) = (virt[0], virt[1], virt[2]);
        for (out, (tx, ty)) in phys.iter_mut().zip(self.towers.iter()) {
            let dx = tx - x;
            let dy = ty - y;
            // sqrt of a negative gives NaN for unreachable points
            *out = z + (self.rod2 - dx * dx - dy * dy).sqrt();
        }
    }

    fn phys_to_virt(&self, phys: &[f64], virt: &mut [f64]) {
        // Trilateration of three spheres of radius rod centered on the
        // carriage joints, choosing the lower intersection.
        let p1 = [self.towers[0].0, self.towers[0].1, phys[0]];
        let p2 = [self.towers[1].0, self.towers[1].1, phys[1]];
        let p3 = [self.towers[2].0, self.towers[2].1, phys[2]];

        let sub = |a: [f64; 3], b: [f64; 3]| [a[0] - b[0], a[1] - b[1], a[2] - b[2]];
        let dot = |a: [f64; 3], b: [f64; 3]| a[0] * b[0] + a[1] * b[1] + a[2] * b[2];
        let scale = |a: [f64; 3], s: f64| [a[0] * s, a[1] * s, a[2] * s];
        let cross = |a: [f64; 3], b: [f64; 3]| {
            [
                a[1] * b[2] - a[2] * b[1],
                a[2] * b[0] - a[0] * b[2],
                a[0] * b[1] - a[1] * b[0],
            ]
        };

        let p12 = sub(p2, p1);
        let d = dot(p12, p12).sqrt();
        let ex = scale(p12, 1.0 / d);
        let p13 = sub(p3, p1);
        let i = dot(ex, p13);
        let ey_raw = sub(p13, scale(ex, i));
        let ey = scale(ey_raw, 1.0 / dot(ey_raw, ey_raw).sqrt());
        let mut ez = cross(ex, ey);
        if ez[2] < 0.0 {
            ez = scale(ez, -1.0);
        }
        let j = dot(ey, p13);

        let x = d / 2.0;
        let y = (i * i + j * j) / (2.0 * j) - i / j * x;
        let z = -(self.rod2 - x * x - y * y).sqrt();

        for (k, out) in virt.iter_mut().enumerate().take(3) {
            *out = p1[k] + ex[k] * x + ey[k] * y + ez[k] * z;
        }
    }
}
