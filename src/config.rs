//! Configuration loading and validation.
//!
//! The configuration file is a JSON document with a top-level `medium` list.
//! Loading is a pure function from text to a list of fully-validated,
//! immutable [`MediumPlan`] records; the engine consumes plans and owns all
//! runtime state, so nothing in here is touched again after startup.
//!
//! Unknown keys are ignored. Missing required keys, wrong value types,
//! out-of-range values and duplicate ids or MAC addresses are fatal.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::frame::MacAddress;
use crate::link::{DEFAULT_NOISE_LEVEL, LinkModel};
use crate::path_loss::{Direction, PathLossModel, Position};

/// SNR assigned to pairs a `snr` model leaves unlisted [dB].
const DEFAULT_LINK_SNR: i32 = -100;
/// Probability assigned to pairs a `prob` model leaves unlisted.
const DEFAULT_LINK_PROB: f64 = 1.0;
/// Seconds between move ticks when the configuration does not say.
const DEFAULT_MOVE_INTERVAL: f64 = 5.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration syntax: {0}")]
    Syntax(#[from] serde_json::Error),
    #[error("medium {medium}: {reason}")]
    Medium { medium: i32, reason: String },
    #[error("{0}")]
    Invalid(String),
}

fn invalid(medium: i32, reason: impl Into<String>) -> ConfigError {
    ConfigError::Medium {
        medium,
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Raw serde layer

#[derive(Deserialize)]
struct RawConfig {
    medium: Vec<RawMedium>,
}

#[derive(Deserialize)]
struct RawMedium {
    id: i32,
    interfaces: Vec<String>,
    model: RawModel,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawModel {
    #[serde(rename = "snr")]
    Snr {
        default_snr: Option<i32>,
        links: Option<Vec<(usize, usize, i32)>>,
    },
    #[serde(rename = "prob")]
    Prob {
        default_probability: Option<f64>,
        links: Option<Vec<(usize, usize, f64)>>,
    },
    #[serde(rename = "path_loss")]
    PathLoss {
        positions: Vec<(f64, f64, f64)>,
        tx_powers: Vec<i32>,
        model_name: String,
        model_params: RawModelParams,
        simulate_interference: Option<bool>,
        noise_level: Option<i32>,
        fading_coefficient: Option<i32>,
        move_interval: Option<f64>,
        directions: Option<Vec<(f64, f64, f64)>>,
        antenna_gain: Option<Vec<i32>>,
        isnodeaps: Option<Vec<bool>>,
    },
}

#[derive(Deserialize, Default)]
struct RawModelParams {
    system_loss: Option<i32>,
    path_loss_exponent: Option<f64>,
    xg: Option<f64>,
    n_floors: Option<i32>,
    floor_pen_factor: Option<i32>,
    power_loss_coefficient: Option<i32>,
}

// ---------------------------------------------------------------------------
// Validated plans

/// Immutable description of one interface within a medium.
#[derive(Debug, Clone)]
pub struct InterfacePlan {
    pub addr: MacAddress,
    pub position: Position,
    pub direction: Direction,
    pub tx_power: i32,
    pub antenna_gain: i32,
    pub is_ap: bool,
}

/// Link model of a medium as configured.
#[derive(Debug, Clone)]
pub enum ModelPlan {
    /// Pre-filled N x N SNR matrix.
    Snr { snr_matrix: Vec<i32> },
    /// Pre-filled N x N error-probability matrix.
    Prob { prob_matrix: Vec<f64> },
    /// Geometry-derived SNR; `mobility` is set when directions were given.
    PathLoss {
        model: PathLossModel,
        mobility: bool,
    },
}

/// Validated, immutable description of one medium.
#[derive(Debug, Clone)]
pub struct MediumPlan {
    pub id: i32,
    pub interfaces: Vec<InterfacePlan>,
    pub model: ModelPlan,
    pub noise_level: i32,
    pub fading_coefficient: i32,
    pub move_interval_s: f64,
    /// Parsed and retained, but reserved: the engine ignores it.
    pub simulate_interference: bool,
}

impl MediumPlan {
    /// Build the medium's link model, deriving the initial SNR matrix from
    /// geometry in path-loss mode.
    pub fn link_model(&self) -> LinkModel {
        let n = self.interfaces.len();
        match &self.model {
            ModelPlan::Snr { snr_matrix } => LinkModel::Snr {
                snr_matrix: snr_matrix.clone(),
            },
            ModelPlan::Prob { prob_matrix } => LinkModel::Probability {
                prob_matrix: prob_matrix.clone(),
            },
            ModelPlan::PathLoss { model, .. } => LinkModel::PathLoss {
                model: *model,
                snr_matrix: vec![0; n * n],
            },
        }
    }

    pub fn mobility(&self) -> bool {
        matches!(
            self.model,
            ModelPlan::PathLoss { mobility: true, .. }
        )
    }
}

/// Read and validate a configuration file.
pub fn load(path: &Path) -> Result<Vec<MediumPlan>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse(&text)
}

/// Validate configuration text into immutable medium plans.
pub fn parse(text: &str) -> Result<Vec<MediumPlan>, ConfigError> {
    let raw: RawConfig = serde_json::from_str(text)?;
    if raw.medium.is_empty() {
        return Err(ConfigError::Invalid(
            "\"medium\" must contain at least one element".into(),
        ));
    }

    let mut plans = Vec::with_capacity(raw.medium.len());
    let mut seen_ids = HashSet::new();
    let mut seen_macs: HashSet<MacAddress> = HashSet::new();

    for medium in raw.medium {
        let plan = validate_medium(medium)?;
        if !seen_ids.insert(plan.id) {
            return Err(invalid(plan.id, "repeated medium id"));
        }
        for itf in &plan.interfaces {
            if !seen_macs.insert(itf.addr) {
                return Err(invalid(
                    plan.id,
                    format!("repeated mac address {}", format_mac(&itf.addr)),
                ));
            }
        }
        plans.push(plan);
    }
    Ok(plans)
}

fn validate_medium(raw: RawMedium) -> Result<MediumPlan, ConfigError> {
    let id = raw.id;
    if raw.interfaces.is_empty() {
        return Err(invalid(id, "\"interfaces\" must not be empty"));
    }
    let macs = raw
        .interfaces
        .iter()
        .map(|s| parse_mac(s).ok_or_else(|| invalid(id, format!("invalid mac address {s:?}"))))
        .collect::<Result<Vec<_>, _>>()?;
    let n = macs.len();

    let mut interfaces: Vec<InterfacePlan> = macs
        .into_iter()
        .map(|addr| InterfacePlan {
            addr,
            position: Position::default(),
            direction: Direction::default(),
            tx_power: 0,
            antenna_gain: 0,
            is_ap: false,
        })
        .collect();

    let mut noise_level = DEFAULT_NOISE_LEVEL;
    let mut fading_coefficient = 0;
    let mut move_interval_s = DEFAULT_MOVE_INTERVAL;
    let mut simulate_interference = false;

    let model = match raw.model {
        RawModel::Snr { default_snr, links } => {
            let fill = default_snr.unwrap_or(DEFAULT_LINK_SNR);
            let mut snr_matrix = vec![fill; n * n];
            for (src, dst, snr) in links.unwrap_or_default() {
                if src >= n || dst >= n {
                    return Err(invalid(id, format!("link ({src}, {dst}) out of range")));
                }
                snr_matrix[src * n + dst] = snr;
            }
            ModelPlan::Snr { snr_matrix }
        }
        RawModel::Prob {
            default_probability,
            links,
        } => {
            let fill = default_probability.unwrap_or(DEFAULT_LINK_PROB);
            if !(0.0..=1.0).contains(&fill) {
                return Err(invalid(id, "\"default_probability\" must be within [0, 1]"));
            }
            let mut prob_matrix = vec![fill; n * n];
            for (src, dst, prob) in links.unwrap_or_default() {
                if src >= n || dst >= n {
                    return Err(invalid(id, format!("link ({src}, {dst}) out of range")));
                }
                if !(0.0..=1.0).contains(&prob) {
                    return Err(invalid(
                        id,
                        format!("link ({src}, {dst}) probability must be within [0, 1]"),
                    ));
                }
                prob_matrix[src * n + dst] = prob;
            }
            ModelPlan::Prob { prob_matrix }
        }
        RawModel::PathLoss {
            positions,
            tx_powers,
            model_name,
            model_params,
            simulate_interference: sim_intf,
            noise_level: noise,
            fading_coefficient: fading,
            move_interval,
            directions,
            antenna_gain,
            isnodeaps,
        } => {
            per_interface_len(id, "positions", positions.len(), n)?;
            per_interface_len(id, "tx_powers", tx_powers.len(), n)?;
            for (itf, ((x, y, z), tx_power)) in interfaces
                .iter_mut()
                .zip(positions.into_iter().zip(tx_powers))
            {
                itf.position = Position { x, y, z };
                itf.tx_power = tx_power;
            }
            if let Some(gains) = antenna_gain {
                per_interface_len(id, "antenna_gain", gains.len(), n)?;
                for (itf, antenna_gain) in interfaces.iter_mut().zip(gains) {
                    itf.antenna_gain = antenna_gain;
                }
            }
            if let Some(aps) = isnodeaps {
                per_interface_len(id, "isnodeaps", aps.len(), n)?;
                for (itf, is_ap) in interfaces.iter_mut().zip(aps) {
                    itf.is_ap = is_ap;
                }
            }
            let mobility = directions.is_some();
            if let Some(dirs) = directions {
                per_interface_len(id, "directions", dirs.len(), n)?;
                for (itf, (dx, dy, dz)) in interfaces.iter_mut().zip(dirs) {
                    itf.direction = Direction { dx, dy, dz };
                }
            }

            simulate_interference = sim_intf.unwrap_or(false);
            noise_level = noise.unwrap_or(DEFAULT_NOISE_LEVEL);
            if let Some(fading) = fading {
                if fading < 1 {
                    return Err(invalid(id, "\"fading_coefficient\" must be >= 1"));
                }
                fading_coefficient = fading;
            }
            if let Some(interval) = move_interval {
                if interval <= 0.0 {
                    return Err(invalid(id, "\"move_interval\" must be > 0.0"));
                }
                move_interval_s = interval;
            }

            ModelPlan::PathLoss {
                model: validate_model_params(id, &model_name, &model_params)?,
                mobility,
            }
        }
    };

    Ok(MediumPlan {
        id,
        interfaces,
        model,
        noise_level,
        fading_coefficient,
        move_interval_s,
        simulate_interference,
    })
}

fn per_interface_len(
    id: i32,
    name: &str,
    actual: usize,
    expected: usize,
) -> Result<(), ConfigError> {
    if actual != expected {
        return Err(invalid(
            id,
            format!("\"{name}\" must have an entry for each interface ({actual} != {expected})"),
        ));
    }
    Ok(())
}

fn validate_model_params(
    id: i32,
    model_name: &str,
    params: &RawModelParams,
) -> Result<PathLossModel, ConfigError> {
    let require_int = |value: Option<i32>, name: &str| {
        value.ok_or_else(|| {
            invalid(
                id,
                format!("setting \"{name}\" is required by model \"{model_name}\""),
            )
        })
    };
    let require_float = |value: Option<f64>, name: &str| {
        value.ok_or_else(|| {
            invalid(
                id,
                format!("setting \"{name}\" is required by model \"{model_name}\""),
            )
        })
    };

    match model_name {
        "free_space" => Ok(PathLossModel::FreeSpace {
            system_loss: require_int(params.system_loss, "system_loss")?,
        }),
        "itu" => Ok(PathLossModel::Itu {
            n_floors: require_int(params.n_floors, "n_floors")?,
            floor_pen_factor: require_int(params.floor_pen_factor, "floor_pen_factor")?,
            power_loss_coefficient: require_int(
                params.power_loss_coefficient,
                "power_loss_coefficient",
            )?,
        }),
        "log_distance" => Ok(PathLossModel::LogDistance {
            path_loss_exponent: require_float(params.path_loss_exponent, "path_loss_exponent")?,
            xg: require_float(params.xg, "xg")?,
        }),
        "two_ray_ground" => Ok(PathLossModel::TwoRayGround {
            system_loss: require_int(params.system_loss, "system_loss")?,
        }),
        "log_normal_shadowing" => Ok(PathLossModel::LogNormalShadowing {
            path_loss_exponent: require_float(params.path_loss_exponent, "path_loss_exponent")?,
            system_loss: require_int(params.system_loss, "system_loss")?,
        }),
        other => Err(invalid(id, format!("unknown model_name {other:?}"))),
    }
}

fn parse_mac(text: &str) -> Option<MacAddress> {
    let mut out = [0u8; 6];
    let mut parts = text.split(':');
    for octet in &mut out {
        *octet = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(out)
}

pub fn format_mac(addr: &MacAddress) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        addr[0], addr[1], addr[2], addr[3], addr[4], addr[5]
    )
}
