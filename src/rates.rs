//! Legacy bitrates and the SNR to packet-error-rate curve.
//!
//! The kernel offers each frame with up to four `(rate index, attempt count)`
//! entries. Rate indexes address the legacy table below; on 5 GHz channels
//! the four DSSS rates are unavailable and the index shifts past them.

/// Number of legacy rates the simulation knows about.
pub const AVAILABLE_RATES: usize = 12;

/// Maximum entries in a frame's multi-rate retry set.
pub const TX_MAX_RATES: usize = 4;

/// Legacy bitrates in units of 100 kbps: DSSS 1/2/5.5/11, then OFDM 6..54.
const RATES_100KBPS: [u32; AVAILABLE_RATES] = [10, 20, 55, 110, 60, 90, 120, 180, 240, 360, 480, 540];

/// Per-rate SNR breakpoints of the error curve, sampled at 1024-octet
/// frames: below the first value every frame is lost, above the second every
/// frame survives, linear in between. The ladder follows the usual
/// DSSS/OFDM receiver sensitivity ordering.
const PER_BREAKPOINTS: [(f64, f64); AVAILABLE_RATES] = [
    (0.0, 4.0),   // 1 Mbps
    (1.0, 5.0),   // 2 Mbps
    (3.0, 7.0),   // 5.5 Mbps
    (5.0, 10.0),  // 11 Mbps
    (4.0, 8.0),   // 6 Mbps
    (5.0, 9.0),   // 9 Mbps
    (7.0, 11.0),  // 12 Mbps
    (9.0, 13.0),  // 18 Mbps
    (12.0, 16.0), // 24 Mbps
    (16.0, 20.0), // 36 Mbps
    (20.0, 24.0), // 48 Mbps
    (21.0, 25.0), // 54 Mbps
];

/// Reference frame length the breakpoints were sampled at.
const PER_REFERENCE_LEN: f64 = 1024.0;

fn effective_index(index: usize, freq_mhz: u32) -> usize {
    let mut idx = index;
    if freq_mhz > 5000 {
        // 5 GHz has no DSSS rates; index 0 starts at OFDM 6 Mbps.
        idx += 4;
    }
    idx.min(AVAILABLE_RATES - 1)
}

/// Map a kernel rate index to a bitrate in 100 kbps units.
pub fn index_to_rate(index: usize, freq_mhz: u32) -> u32 {
    RATES_100KBPS[effective_index(index, freq_mhz)]
}

/// Error probability for one transmission attempt.
///
/// Looks up the modulation selected by `(rate_idx, freq_mhz)`, interpolates
/// the 1024-octet curve linearly at `snr`, and rescales to `frame_len`
/// octets via `1 - (1 - p)^(len/1024)`.
pub fn error_prob_from_snr(snr: f64, rate_idx: usize, freq_mhz: u32, frame_len: usize) -> f64 {
    let (floor, clear) = PER_BREAKPOINTS[effective_index(rate_idx, freq_mhz)];
    let per_reference = if snr <= floor {
        1.0
    } else if snr >= clear {
        0.0
    } else {
        (clear - snr) / (clear - floor)
    };
    1.0 - (1.0 - per_reference).powf(frame_len as f64 / PER_REFERENCE_LEN)
}

/// Integer round-up division.
fn div_round(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Frame transmission duration in microseconds.
///
/// Preamble + signal + `t_sym * n_sym`; `rate` is in 100 kbps units.
pub fn pkt_duration_us(len: usize, rate: u32) -> u64 {
    16 + 4 + 4 * div_round((16 + 8 * len as u64 + 6) * 10, 4 * u64::from(rate))
}
