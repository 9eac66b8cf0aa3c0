//! Per-medium link quality.
//!
//! At configuration time each medium binds one of three link models; the
//! scheduler only ever asks two questions of it: the SNR of an ordered
//! interface pair, and the error probability of a single transmission
//! attempt. The path-loss variant keeps its SNR matrix up to date through
//! [`LinkModel::refresh`], which the mobility driver invokes after every
//! position change.

use crate::path_loss::PathLossModel;
use crate::rates;

/// Noise floor applied when the configuration does not override it [dBm].
pub const DEFAULT_NOISE_LEVEL: i32 = -91;

/// Receivers below this signal level do not even sense the frame [dBm].
pub const CCA_THRESHOLD: i32 = -90;

/// SNR assumed when no per-pair value exists (probability mode, multicast or
/// unknown destinations): a 20 dBm signal over the default noise floor.
pub const DEFAULT_SNR: i32 = 20 - DEFAULT_NOISE_LEVEL;

/// Positions, powers and frequency of one interface as the link model needs
/// them for a matrix refresh.
pub struct LinkEndpoint {
    pub position: crate::path_loss::Position,
    pub tx_power: i32,
    pub antenna_gain: i32,
    pub freq_mhz: f64,
}

/// Link model of one medium, bound at configure time.
#[derive(Debug, Clone)]
pub enum LinkModel {
    /// Fixed SNR per ordered pair.
    Snr { snr_matrix: Vec<i32> },
    /// Fixed error probability per ordered pair; SNR is the constant default.
    Probability { prob_matrix: Vec<f64> },
    /// SNR derived from geometry; refreshed after every move tick.
    PathLoss {
        model: PathLossModel,
        snr_matrix: Vec<i32>,
    },
}

impl LinkModel {
    /// SNR of the ordered pair `(src, dst)` in dB.
    pub fn snr(&self, src: usize, dst: usize, n: usize) -> i32 {
        match self {
            LinkModel::Snr { snr_matrix } | LinkModel::PathLoss { snr_matrix, .. } => {
                snr_matrix[src * n + dst]
            }
            LinkModel::Probability { .. } => DEFAULT_SNR,
        }
    }

    /// Error probability of one transmission attempt.
    ///
    /// In probability mode the matrix value is authoritative and the path
    /// arguments are ignored; a missing destination (multicast) yields 0.0
    /// there, since the caller discards the value for no-ack traffic. The
    /// other modes evaluate the SNR curve.
    pub fn error_prob(
        &self,
        snr: f64,
        rate_idx: usize,
        freq_mhz: u32,
        frame_len: usize,
        src: usize,
        dst: Option<usize>,
        n: usize,
    ) -> f64 {
        match self {
            LinkModel::Probability { prob_matrix } => match dst {
                Some(dst) => prob_matrix[src * n + dst],
                None => 0.0,
            },
            LinkModel::Snr { .. } | LinkModel::PathLoss { .. } => {
                rates::error_prob_from_snr(snr, rate_idx, freq_mhz, frame_len)
            }
        }
    }

    /// Recompute the SNR matrix from interface geometry:
    /// `snr[i][j] = tx_power[i] + gain[i] + gain[j] - PL(i, j) - noise`.
    /// No-op for the table-driven modes.
    pub fn refresh(&mut self, endpoints: &[LinkEndpoint], noise_level: i32) {
        let LinkModel::PathLoss { model, snr_matrix } = self else {
            return;
        };
        let n = endpoints.len();
        for (i, src) in endpoints.iter().enumerate() {
            for (j, dst) in endpoints.iter().enumerate() {
                if i == j {
                    continue;
                }
                let loss = model.loss_db(src.position, dst.position, src.freq_mhz);
                let gains = src.tx_power + src.antenna_gain + dst.antenna_gain;
                snr_matrix[i * n + j] = gains - loss - noise_level;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_loss::Position;

    fn endpoint(x: f64, tx_power: i32) -> LinkEndpoint {
        LinkEndpoint {
            position: Position { x, y: 0.0, z: 0.0 },
            tx_power,
            antenna_gain: 0,
            freq_mhz: 2412.0,
        }
    }

    #[test]
    fn snr_mode_reads_the_matrix() {
        let model = LinkModel::Snr {
            snr_matrix: vec![0, 40, 25, 0],
        };
        assert_eq!(model.snr(0, 1, 2), 40);
        assert_eq!(model.snr(1, 0, 2), 25);
    }

    #[test]
    fn probability_mode_uses_constant_snr_and_matrix_prob() {
        let model = LinkModel::Probability {
            prob_matrix: vec![0.0, 0.25, 0.75, 0.0],
        };
        assert_eq!(model.snr(0, 1, 2), DEFAULT_SNR);
        assert_eq!(model.error_prob(0.0, 0, 2412, 100, 0, Some(1), 2), 0.25);
        assert_eq!(model.error_prob(0.0, 0, 2412, 100, 1, Some(0), 2), 0.75);
        // Multicast destination: value is discarded by the caller anyway.
        assert_eq!(model.error_prob(0.0, 0, 2412, 100, 0, None, 2), 0.0);
    }

    #[test]
    fn refresh_recomputes_the_path_loss_matrix() {
        let mut model = LinkModel::PathLoss {
            model: PathLossModel::FreeSpace { system_loss: 1 },
            snr_matrix: vec![0; 4],
        };
        let endpoints = [endpoint(0.0, 20), endpoint(10.0, 20)];
        model.refresh(&endpoints, DEFAULT_NOISE_LEVEL);
        // Free-space loss at 10 m / 2.412 GHz truncates to 60 dB:
        // 20 + 0 + 0 - 60 - (-91) = 51.
        assert_eq!(model.snr(0, 1, 2), 51);
        assert_eq!(model.snr(1, 0, 2), 51);
    }

    #[test]
    fn refresh_ignores_table_modes() {
        let mut model = LinkModel::Snr {
            snr_matrix: vec![0, 40, 40, 0],
        };
        model.refresh(&[endpoint(0.0, 20), endpoint(10.0, 20)], DEFAULT_NOISE_LEVEL);
        assert_eq!(model.snr(0, 1, 2), 40);
    }
}
