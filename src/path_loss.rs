//! Signal propagation calculations.
//!
//! Contains helpers for:
//! - Euclidean distance between radio positions
//! - Five path-loss models (free space, log-distance, log-normal shadowing,
//!   ITU indoor, two-ray ground)
//! - A fading sample drawn from a 12-fold Irwin-Hall sum
//!
//! Units:
//! - Power and loss: dB / dBm (integer results, truncated toward zero)
//! - Distance: meters
//! - Frequency: MHz as stored on interfaces; converted to Hz where a model
//!   requires it

use rand::Rng;

/// Speed of light in a vacuum [meter/sec].
pub const SPEED_OF_LIGHT: f64 = 2.997_924_58e8;

/// Channel-1 reference frequency [Hz], substituted for unset frequencies.
pub const FREQ_CHANNEL_1_HZ: f64 = 2.412e9;

/// Lower clamp for pair distances so coincident positions produce a large
/// finite loss instead of -inf from `log10(0)`.
const MIN_DISTANCE_M: f64 = 1e-3;

/// Position of a radio in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Displacement applied to a position on every move tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Direction {
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

impl Position {
    pub fn translate(&mut self, dir: Direction) {
        self.x += dir.dx;
        self.y += dir.dy;
        self.z += dir.dz;
    }
}

/// Full 3D distance between two positions, clamped away from zero.
pub fn distance(a: Position, b: Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    (dx * dx + dy * dy + dz * dz).sqrt().max(MIN_DISTANCE_M)
}

/// Ground-plane distance. The two-ray ground model treats the z coordinates
/// as antenna heights, not as part of the separation.
pub fn planar_distance(a: Position, b: Position) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt().max(MIN_DISTANCE_M)
}

/// A path-loss model with its parameters, selected per medium at
/// configuration time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathLossModel {
    /// Friis free-space loss with a linear system-loss factor.
    FreeSpace { system_loss: i32 },
    /// Free-space loss at 1 m, then `10 n log10(d)` plus a fixed offset.
    LogDistance { path_loss_exponent: f64, xg: f64 },
    /// Log-distance with a shadowing term. The shadowing value is the
    /// constant 1.0 rather than a Gaussian draw; see DESIGN.md.
    LogNormalShadowing { path_loss_exponent: f64, system_loss: i32 },
    /// ITU indoor propagation. The distance-power coefficient defaults to 28
    /// (38 beyond 16 m) unless overridden by a non-zero
    /// `power_loss_coefficient`.
    Itu {
        n_floors: i32,
        floor_pen_factor: i32,
        power_loss_coefficient: i32,
    },
    /// Two-ray ground reflection using the z coordinates as antenna heights.
    TwoRayGround { system_loss: i32 },
}

/// Convert an interface frequency in MHz to Hz, substituting the channel-1
/// reference when unset.
fn freq_hz(freq_mhz: f64) -> f64 {
    let f = freq_mhz * 1e6;
    if f < 0.1 { FREQ_CHANNEL_1_HZ } else { f }
}

impl PathLossModel {
    /// Path loss in dB between a transmitter and a receiver, truncated
    /// toward zero.
    ///
    /// `freq_mhz` is the transmitter's current frequency; unset (zero)
    /// frequencies fall back to channel 1.
    pub fn loss_db(&self, src: Position, dst: Position, freq_mhz: f64) -> i32 {
        match *self {
            PathLossModel::FreeSpace { system_loss } => {
                let f = freq_hz(freq_mhz);
                let d = distance(src, dst);
                let lambda = SPEED_OF_LIGHT / f;
                let numerator = (4.0 * std::f64::consts::PI * d).powi(2) * f64::from(system_loss);
                let denominator = lambda.powi(2);
                (10.0 * (numerator / denominator).log10()) as i32
            }
            PathLossModel::LogDistance {
                path_loss_exponent,
                xg,
            } => {
                let f = freq_hz(freq_mhz);
                let d = distance(src, dst);
                let pl0 = reference_loss_db(f);
                (pl0 + 10.0 * path_loss_exponent * d.log10() + xg) as i32
            }
            PathLossModel::LogNormalShadowing {
                path_loss_exponent,
                system_loss: _,
            } => {
                let f = freq_hz(freq_mhz);
                let d = distance(src, dst);
                let pl0 = reference_loss_db(f);
                let shadowing = 1.0;
                (pl0 + 10.0 * path_loss_exponent * d.log10() - shadowing) as i32
            }
            PathLossModel::Itu {
                n_floors,
                floor_pen_factor,
                power_loss_coefficient,
            } => {
                // ITU works on MHz directly.
                let f = if freq_mhz < 0.1 {
                    FREQ_CHANNEL_1_HZ
                } else {
                    freq_mhz
                };
                let d = distance(src, dst);
                let mut n = 28.0;
                if d > 16.0 {
                    n = 38.0;
                }
                if power_loss_coefficient != 0 {
                    n = f64::from(power_loss_coefficient);
                }
                (20.0 * f.log10() + n * d.log10()
                    + f64::from(floor_pen_factor) * f64::from(n_floors)
                    - 28.0) as i32
            }
            PathLossModel::TwoRayGround { system_loss } => {
                let d = planar_distance(src, dst);
                (10.0 * (src.z * dst.z).powi(2).log10() - 10.0 * d.powi(4).log10()
                    - 10.0 * f64::from(system_loss).log10()) as i32
            }
        }
    }
}

/// Free-space loss at the 1 m reference distance.
fn reference_loss_db(freq_hz: f64) -> f64 {
    20.0 * (4.0 * std::f64::consts::PI * 1.0 * freq_hz / SPEED_OF_LIGHT).log10()
}

/// Random fading power [dB].
///
/// The sample is `coefficient * (sum of 12 uniform [0,1) draws - 6)`, an
/// Irwin-Hall approximation of a unit normal. A zero coefficient disables
/// fading entirely.
pub fn fading_sample<R: Rng>(coefficient: i32, rng: &mut R) -> i32 {
    if coefficient == 0 {
        return 0;
    }
    let mut normal = -6.0_f64;
    for _ in 0..12 {
        normal += rng.gen_range(0.0..1.0);
    }
    (f64::from(coefficient) * normal) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    fn p(x: f64, y: f64, z: f64) -> Position {
        Position { x, y, z }
    }

    #[test]
    fn free_space_matches_friis_at_ten_meters() {
        let model = PathLossModel::FreeSpace { system_loss: 1 };
        // 2.412 GHz, 10 m: 20*log10(4*pi*10/lambda) ~= 60.09 dB
        assert_eq!(model.loss_db(p(0.0, 0.0, 0.0), p(10.0, 0.0, 0.0), 2412.0), 60);
    }

    #[test]
    fn free_space_loss_grows_with_distance_and_frequency() {
        let model = PathLossModel::FreeSpace { system_loss: 1 };
        let near = model.loss_db(p(0.0, 0.0, 0.0), p(5.0, 0.0, 0.0), 2412.0);
        let far = model.loss_db(p(0.0, 0.0, 0.0), p(50.0, 0.0, 0.0), 2412.0);
        assert!(far > near);

        let low = model.loss_db(p(0.0, 0.0, 0.0), p(10.0, 0.0, 0.0), 2412.0);
        let high = model.loss_db(p(0.0, 0.0, 0.0), p(10.0, 0.0, 0.0), 5180.0);
        assert!(high > low);
    }

    #[test]
    fn unset_frequency_falls_back_to_channel_one() {
        let model = PathLossModel::FreeSpace { system_loss: 1 };
        let defaulted = model.loss_db(p(0.0, 0.0, 0.0), p(10.0, 0.0, 0.0), 0.0);
        let channel_1 = model.loss_db(p(0.0, 0.0, 0.0), p(10.0, 0.0, 0.0), 2412.0);
        assert_eq!(defaulted, channel_1);
    }

    #[test]
    fn coincident_positions_stay_finite() {
        let model = PathLossModel::LogDistance {
            path_loss_exponent: 3.0,
            xg: 0.0,
        };
        // Distance clamps to 1 mm: 40.09 + 30 * log10(1e-3) = -49.9
        let loss = model.loss_db(p(1.0, 2.0, 3.0), p(1.0, 2.0, 3.0), 2412.0);
        assert_eq!(loss, -49);
    }

    #[test]
    fn itu_coefficient_switches_at_sixteen_meters() {
        let model = PathLossModel::Itu {
            n_floors: 0,
            floor_pen_factor: 0,
            power_loss_coefficient: 0,
        };
        // N jumps from 28 to 38 past 16 m, so the loss must grow by more
        // than the pure distance term.
        let at_16 = model.loss_db(p(0.0, 0.0, 0.0), p(16.0, 0.0, 0.0), 2412.0);
        let at_17 = model.loss_db(p(0.0, 0.0, 0.0), p(17.0, 0.0, 0.0), 2412.0);
        assert!(at_17 - at_16 >= 11);

        let overridden = PathLossModel::Itu {
            n_floors: 0,
            floor_pen_factor: 0,
            power_loss_coefficient: 28,
        };
        let at_17_fixed = overridden.loss_db(p(0.0, 0.0, 0.0), p(17.0, 0.0, 0.0), 2412.0);
        assert!(at_17_fixed < at_17);
    }

    #[test]
    fn two_ray_ground_uses_planar_distance_and_heights() {
        let model = PathLossModel::TwoRayGround { system_loss: 1 };
        // 10*log10((h_t*h_r)^2) - 10*log10(d^4), h=2, d=100 -> 12.04 - 80
        let loss = model.loss_db(p(0.0, 0.0, 2.0), p(100.0, 0.0, 2.0), 2412.0);
        assert_eq!(loss, -67);
    }

    #[test]
    fn fading_disabled_at_zero_coefficient() {
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(fading_sample(0, &mut rng), 0);
    }

    #[test]
    fn fading_stays_within_coefficient_bounds() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..1000 {
            let s = fading_sample(3, &mut rng);
            // Irwin-Hall sum of 12 uniforms lies in [-6, 6].
            assert!((-18..=18).contains(&s));
        }
    }
}
