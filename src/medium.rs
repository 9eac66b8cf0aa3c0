//! Per-medium simulation state and scheduling.
//!
//! One [`Medium`] owns everything a transmission environment needs: its
//! interfaces, the link model, four QoS queues, the current-transmission
//! slot and the timestamp at which it ends. The type is a plain state
//! machine driven by two entry points — [`Medium::enqueue`] for every frame
//! arriving from the kernel and [`Medium::on_delivery_timer`] when the
//! delivery deadline fires — so the whole scheduler can be exercised in
//! tests with synthetic instants and a seeded RNG, without any I/O.

use embassy_time::{Duration, Instant};
use rand::Rng;
use rand::rngs::SmallRng;
use std::collections::VecDeque;

use crate::config::{MediumPlan, ModelPlan};
use crate::frame::{AccessCategory, Frame, HWSIM_TX_STAT_ACK, MacAddress, is_multicast};
use crate::link::{CCA_THRESHOLD, DEFAULT_SNR, LinkEndpoint, LinkModel};
use crate::path_loss::{Direction, Position, fading_sample};
use crate::rates::{index_to_rate, pkt_duration_us};

pub const SLOT_TIME_US: u64 = 9;
pub const SIFS_US: u64 = 16;
pub const DIFS_US: u64 = 2 * SLOT_TIME_US + SIFS_US;

/// Delay before the first move tick, so endpoints get to associate first.
pub const MOVE_STARTUP_DELAY: Duration = Duration::from_secs(20);

/// A simulated radio within one medium.
#[derive(Debug, Clone)]
pub struct Interface {
    /// Virtual interface MAC address (frame addresses match against this).
    pub addr: MacAddress,
    /// Hardware address of the backing radio, assigned by the kernel on the
    /// first transmitted frame.
    pub hwaddr: MacAddress,
    pub position: Position,
    pub direction: Direction,
    pub tx_power: i32,
    pub antenna_gain: i32,
    /// Current frequency [MHz], overwritten by each transmitted frame.
    pub freq_mhz: f64,
    pub is_ap: bool,
}

struct Wqueue {
    frames: VecDeque<Frame>,
    cw_min: u32,
    cw_max: u32,
}

impl Wqueue {
    fn new(cw_min: u32, cw_max: u32) -> Wqueue {
        Wqueue {
            frames: VecDeque::new(),
            cw_min,
            cw_max,
        }
    }
}

/// One receiver of a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receiver {
    pub hwaddr: MacAddress,
    pub signal: i32,
}

/// Everything the RX-info reply needs for one delivered frame.
#[derive(Debug)]
pub struct Delivery {
    pub transmitter: MacAddress,
    pub rx_rate: u32,
    pub receivers: Vec<Receiver>,
    pub frame: Frame,
}

/// An isolated transmission environment.
pub struct Medium {
    id: i32,
    interfaces: Vec<Interface>,
    link: LinkModel,
    noise_level: i32,
    fading_coefficient: i32,
    move_interval: Duration,
    mobility: bool,
    queues: [Wqueue; 4],
    current: Option<Frame>,
    end_transmission: Instant,
    rng: SmallRng,
}

impl Medium {
    pub fn from_plan(plan: &MediumPlan, rng: SmallRng) -> Medium {
        let interfaces = plan
            .interfaces
            .iter()
            .map(|itf| Interface {
                addr: itf.addr,
                hwaddr: itf.addr,
                position: itf.position,
                direction: itf.direction,
                tx_power: itf.tx_power,
                antenna_gain: itf.antenna_gain,
                freq_mhz: 0.0,
                is_ap: itf.is_ap,
            })
            .collect();
        let mut medium = Medium {
            id: plan.id,
            interfaces,
            link: plan.link_model(),
            noise_level: plan.noise_level,
            fading_coefficient: plan.fading_coefficient,
            move_interval: Duration::from_micros((plan.move_interval_s * 1_000_000.0) as u64),
            mobility: plan.mobility(),
            queues: [
                Wqueue::new(3, 7),     // voice
                Wqueue::new(7, 15),    // video
                Wqueue::new(15, 1023), // best effort
                Wqueue::new(15, 1023), // background
            ],
            current: None,
            end_transmission: Instant::from_micros(0),
            rng,
        };
        if matches!(plan.model, ModelPlan::PathLoss { .. }) {
            medium.refresh_links();
        }
        medium
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn interface_by_addr(&self, addr: &MacAddress) -> Option<usize> {
        self.interfaces.iter().position(|itf| itf.addr == *addr)
    }

    /// Record the hardware address the kernel reported for a transmitting
    /// interface.
    pub fn note_transmitter(&mut self, iface: usize, hwaddr: MacAddress) {
        self.interfaces[iface].hwaddr = hwaddr;
    }

    pub fn mobility_enabled(&self) -> bool {
        self.mobility
    }

    pub fn move_interval(&self) -> Duration {
        self.move_interval
    }

    /// SNR of an ordered interface pair under the current link model.
    pub fn link_snr(&self, src: usize, dst: usize) -> i32 {
        self.link.snr(src, dst, self.interfaces.len())
    }

    pub fn current_transmission(&self) -> Option<&Frame> {
        self.current.as_ref()
    }

    pub fn queue_len(&self, ac: AccessCategory) -> usize {
        self.queues[ac as usize].frames.len()
    }

    // -----------------------------------------------------------------------
    // Frame intake

    /// Simulate the outcome of a freshly arrived frame, then either start
    /// transmitting it or queue it behind the current transmission.
    ///
    /// Returns the delivery deadline when the frame took the empty slot;
    /// the caller arms its timer to that absolute instant. A `None` means
    /// the existing deadline is unchanged.
    pub fn enqueue(&mut self, mut frame: Frame, now: Instant) -> Option<Instant> {
        self.interfaces[frame.sender].freq_mhz = f64::from(frame.freq);
        let ac = frame.header.access_category();
        self.simulate_outcome(&mut frame, ac);

        if self.current.is_none() {
            self.end_transmission = now + Duration::from_micros(frame.duration_us);
            self.current = Some(frame);
            Some(self.end_transmission)
        } else {
            self.queues[ac as usize].frames.push_back(frame);
            None
        }
    }

    /// Walk the frame's multi-rate retry set against the error model until
    /// it is acked or the set is exhausted, accumulating medium occupancy.
    fn simulate_outcome(&mut self, frame: &mut Frame, ac: AccessCategory) {
        let n = self.interfaces.len();
        let dest = frame.header.addr1();
        let dest_idx = if is_multicast(&dest) {
            None
        } else {
            self.interface_by_addr(&dest)
        };

        let mut snr = DEFAULT_SNR;
        if let Some(dst) = dest_idx {
            let fading = fading_sample(self.fading_coefficient, &mut self.rng);
            snr = self.link.snr(frame.sender, dst, n) + fading;
        }
        frame.signal = snr + self.noise_level;

        let no_ack = frame.no_ack();
        let (cw_min, cw_max) = {
            let q = &self.queues[ac as usize];
            (q.cw_min, q.cw_max)
        };
        let mut cw = cw_min;
        let ack_time = pkt_duration_us(14, index_to_rate(0, frame.freq)) + SIFS_US;

        let mut send_time = 0u64;
        let mut acked = false;
        let mut used = (0usize, 0u8);

        'rate_set: for (i, entry) in frame.tx_rates.iter().enumerate() {
            if entry.idx < 0 {
                break;
            }
            let error_prob = self.link.error_prob(
                f64::from(snr),
                entry.idx as usize,
                frame.freq,
                frame.frame_len,
                frame.sender,
                dest_idx,
                n,
            );
            for attempt in 0..entry.count {
                send_time += DIFS_US
                    + pkt_duration_us(frame.frame_len, index_to_rate(entry.idx as usize, frame.freq));

                // noack frames skip ack, backoff and retries entirely
                if no_ack {
                    acked = true;
                    used = (i, attempt);
                    break 'rate_set;
                }

                if attempt > 0 {
                    send_time += (u64::from(cw) * SLOT_TIME_US) / 2;
                    cw = (2 * cw + 1).min(cw_max);
                }

                if self.rng.gen_range(0.0..1.0) > error_prob {
                    acked = true;
                }
                send_time += ack_time;
                if acked {
                    used = (i, attempt);
                    break 'rate_set;
                }
            }
        }

        if acked {
            let (i, attempt) = used;
            frame.tx_rates[i].count = attempt + 1;
            for entry in frame.tx_rates[i + 1..].iter_mut() {
                entry.idx = -1;
                entry.count = 0;
            }
            frame.flags |= HWSIM_TX_STAT_ACK;
        }
        frame.duration_us = send_time;
    }

    // -----------------------------------------------------------------------
    // Delivery

    /// The delivery timer fired: hand out the finished transmission, promote
    /// queued frames, and catch up on any whose end already passed.
    ///
    /// Transmissions are butted tail-to-head — each promoted frame ends at
    /// the previous end plus its own duration — so medium throughput is
    /// preserved even when this wakeup runs late. Frames whose end is still
    /// in the past are delivered immediately; the loop stops at the first
    /// end in the future, which becomes the new timer deadline. `None`
    /// disarms the timer.
    pub fn on_delivery_timer(&mut self, now: Instant) -> (Vec<Delivery>, Option<Instant>) {
        let mut deliveries = Vec::new();
        let Some(finished) = self.current.take() else {
            return (deliveries, None);
        };
        deliveries.push(self.build_delivery(finished));

        while let Some(next) = self.pop_highest_priority() {
            self.end_transmission += Duration::from_micros(next.duration_us);
            if self.end_transmission >= now {
                self.current = Some(next);
                return (deliveries, Some(self.end_transmission));
            }
            deliveries.push(self.build_delivery(next));
        }
        (deliveries, None)
    }

    fn pop_highest_priority(&mut self) -> Option<Frame> {
        self.queues
            .iter_mut()
            .find_map(|queue| queue.frames.pop_front())
    }

    /// Decide which interfaces receive a finished frame.
    ///
    /// Unacked frames produce an empty receiver list. For acked unicast the
    /// destination receives unconditionally — the sender-side rate walk
    /// already represented link loss. Multicast runs a reverse-link test per
    /// receiver: below the CCA threshold the radio never senses the frame,
    /// and an error draw against the receiver's own link may still drop it.
    fn build_delivery(&mut self, frame: Frame) -> Delivery {
        let n = self.interfaces.len();
        let sender = frame.sender;
        let dest = frame.header.addr1();
        let mut receivers = Vec::new();
        let mut rx_rate = 0u32;
        let first_rate = frame.tx_rates.first().map(|r| r.idx.max(0)).unwrap_or(0) as u32;

        if frame.acked() {
            for r in 0..n {
                if is_multicast(&dest) {
                    if r == sender {
                        continue;
                    }
                    let fading = fading_sample(self.fading_coefficient, &mut self.rng);
                    let snr = self.link.snr(sender, r, n) + fading;
                    let signal = snr + self.noise_level;
                    if signal < CCA_THRESHOLD {
                        continue;
                    }
                    let error_prob = self.link.error_prob(
                        f64::from(snr),
                        first_rate as usize,
                        frame.freq,
                        frame.frame_len,
                        sender,
                        Some(r),
                        n,
                    );
                    if self.rng.gen_range(0.0..1.0) <= error_prob {
                        log::debug!(
                            "medium {}: multicast drop at receiver {}",
                            self.id,
                            crate::config::format_mac(&self.interfaces[r].addr)
                        );
                        continue;
                    }
                    rx_rate = first_rate;
                    receivers.push(Receiver {
                        hwaddr: self.interfaces[r].hwaddr,
                        signal: frame.signal,
                    });
                } else if self.interfaces[r].addr == dest {
                    rx_rate = first_rate;
                    receivers.push(Receiver {
                        hwaddr: self.interfaces[r].hwaddr,
                        signal: frame.signal,
                    });
                }
            }
        }

        Delivery {
            transmitter: self.interfaces[sender].hwaddr,
            rx_rate,
            receivers,
            frame,
        }
    }

    // -----------------------------------------------------------------------
    // Mobility

    /// Advance every interface by its direction vector and rebuild the SNR
    /// matrix from the new geometry.
    pub fn move_tick(&mut self) {
        for itf in &mut self.interfaces {
            itf.position.translate(itf.direction);
        }
        self.refresh_links();
    }

    fn refresh_links(&mut self) {
        let endpoints: Vec<LinkEndpoint> = self
            .interfaces
            .iter()
            .map(|itf| LinkEndpoint {
                position: itf.position,
                tx_power: itf.tx_power,
                antenna_gain: itf.antenna_gain,
                freq_mhz: itf.freq_mhz,
            })
            .collect();
        self.link.refresh(&endpoints, self.noise_level);
    }
}
