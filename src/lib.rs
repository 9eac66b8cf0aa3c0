//! User-space wireless medium simulator for the Linux `mac80211_hwsim`
//! virtual-radio module.
//!
//! The kernel hands every outgoing radio frame to this daemon over generic
//! netlink. Per frame the simulation decides whether transmission succeeds at
//! each attempted rate, how long the shared medium is occupied, and which
//! peer radios hear the frame with what signal strength, then reports the
//! verdict back so the kernel can deliver the frame to the chosen receivers.
//!
//! ## Module organization
//!
//! - `path_loss`: distance, the five path-loss formulas and the fading sample
//! - `rates`: legacy bitrate table and the SNR → packet-error-rate curve
//! - `link`: per-medium link model bound at configuration time
//! - `frame`: frame objects and the 802.11 header classifier
//! - `medium`: the per-medium scheduler (occupancy, QoS queues, retries,
//!   receiver sets, mobility)
//! - `config`: configuration schema and validation into immutable plans
//! - `hwsim`: TX-info/RX-info netlink attribute codecs
//! - `netlink`: the generic netlink socket and message framing
//! - `runtime`: executor wiring, intake channels and the dispatcher loop

pub mod config;
pub mod frame;
pub mod hwsim;
pub mod link;
pub mod medium;
pub mod netlink;
pub mod path_loss;
pub mod rates;
pub mod runtime;
