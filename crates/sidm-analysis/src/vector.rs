//! Four-vector kinematics on Cartesian `(x, y, z, t)` components.

use std::f64::consts::PI;
use std::ops::{Add, Sub};

/// Lorentz vector in Cartesian coordinates (`t` is the energy).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LorentzVector {
    /// x component.
    pub x: f64,
    /// y component.
    pub y: f64,
    /// z component.
    pub z: f64,
    /// Time component (energy).
    pub t: f64,
}

impl LorentzVector {
    /// Build from components.
    pub fn new(x: f64, y: f64, z: f64, t: f64) -> Self {
        Self { x, y, z, t }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> f64 {
        pt(self.x, self.y)
    }

    /// Squared transverse momentum.
    pub fn pt2(&self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    /// Pseudorapidity.
    pub fn eta(&self) -> f64 {
        eta(self.x, self.y, self.z)
    }

    /// Rapidity, used by the jet distance measure.
    pub fn rapidity(&self) -> f64 {
        if self.t == self.z.abs() && self.pt2() == 0.0 {
            // massless along the beam axis
            return self.z.signum() * f64::MAX.ln();
        }
        0.5 * ((self.t + self.z) / (self.t - self.z)).ln()
    }

    /// Azimuth in `[-π, π]`.
    pub fn phi(&self) -> f64 {
        phi(self.x, self.y)
    }

    /// Invariant mass (negative for space-like vectors).
    pub fn mass(&self) -> f64 {
        mass(self.x, self.y, self.z, self.t)
    }

    /// Energy.
    pub fn energy(&self) -> f64 {
        self.t
    }

    /// Momentum magnitude.
    pub fn p(&self) -> f64 {
        r(self.x, self.y, self.z)
    }

    /// `ΔR` to another vector.
    pub fn delta_r(&self, other: &Self) -> f64 {
        delta_r(self.eta(), self.phi(), other.eta(), other.phi())
    }
}

impl Add for LorentzVector {
    type Output = Self;

    fn add(self, o: Self) -> Self {
        Self { x: self.x + o.x, y: self.y + o.y, z: self.z + o.z, t: self.t + o.t }
    }
}

impl Sub for LorentzVector {
    type Output = Self;

    fn sub(self, o: Self) -> Self {
        Self { x: self.x - o.x, y: self.y - o.y, z: self.z - o.z, t: self.t - o.t }
    }
}

impl std::iter::Sum for LorentzVector {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Transverse magnitude `sqrt(x² + y²)` (also the cylindrical `rho`).
pub fn pt(x: f64, y: f64) -> f64 {
    x.hypot(y)
}

/// Pseudorapidity of a three-vector. Zero-length vectors give 0.
pub fn eta(x: f64, y: f64, z: f64) -> f64 {
    let pt = pt(x, y);
    if pt == 0.0 {
        if z == 0.0 {
            return 0.0;
        }
        return z.signum() * f64::INFINITY;
    }
    (z / pt).asinh()
}

/// Azimuthal angle.
pub fn phi(x: f64, y: f64) -> f64 {
    y.atan2(x)
}

/// Spherical magnitude `sqrt(x² + y² + z²)`.
pub fn r(x: f64, y: f64, z: f64) -> f64 {
    (x * x + y * y + z * z).sqrt()
}

/// Invariant mass. Space-like vectors return `-sqrt(-m²)`.
pub fn mass(x: f64, y: f64, z: f64, t: f64) -> f64 {
    let m2 = t * t - (x * x + y * y + z * z);
    if m2 >= 0.0 { m2.sqrt() } else { -(-m2).sqrt() }
}

/// `phi1 - phi2` wrapped to `[-π, π)`.
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    (phi1 - phi2 + PI).rem_euclid(2.0 * PI) - PI
}

/// Angular separation `sqrt(Δη² + Δφ²)`.
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    let deta = eta1 - eta2;
    let dphi = delta_phi(phi1, phi2);
    (deta * deta + dphi * dphi).sqrt()
}

/// Transverse distance between a production vertex and a decay vertex.
pub fn lxy(vtx: (f64, f64), dauvtx: (f64, f64)) -> f64 {
    pt(dauvtx.0 - vtx.0, dauvtx.1 - vtx.1)
}
