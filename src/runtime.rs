//! Executor wiring: intake channels, per-medium tasks and the dispatcher.
//!
//! Two components run concurrently:
//!
//! 1. **Medium tasks.** One async task per medium owns that medium's state,
//!    delivery timer and move timer. In single-threaded mode every task runs
//!    on one Embassy executor thread; with `-t` each medium gets a dedicated
//!    executor thread. Either way a medium's state is touched by exactly one
//!    task, so no locks guard it.
//! 2. **The dispatcher.** A plain blocking loop on the main thread reads the
//!    netlink socket, decodes TX-info records, resolves the sending medium
//!    by the frame's transmitter address and hands the frame into that
//!    medium's bounded intake channel.
//!
//! Channels and executors obtain `'static` lifetimes through `Box::leak`;
//! they live for the whole process and are reclaimed on exit.

use anyhow::Context;
use embassy_executor::Executor;
use embassy_futures::select::{Either3, select3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Instant, Timer};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use crate::config::{MediumPlan, format_mac};
use crate::frame::{Frame, FrameHeader, MacAddress};
use crate::hwsim::{self, CodecError, RxInfo, TxInfo};
use crate::medium::{Delivery, MOVE_STARTUP_DELAY, Medium};
use crate::netlink::{Message, NetlinkSocket, TransportError};

/// Upper bound on simultaneously configured mediums (task pool size).
pub const MAX_MEDIUMS: usize = 32;

/// Depth of each medium's frame-intake channel. Bursts beyond this are
/// transport drops, matching the frame-level error policy.
pub const INTAKE_QUEUE_SIZE: usize = 64;

/// Frames drained per intake wake, so the delivery and move timers get a
/// turn between bursts.
pub const INTAKE_DRAIN_LIMIT: usize = 5;

/// One decoded TX-info record routed to its medium.
pub struct MediumInput {
    /// Hardware address the kernel reported for the sending radio.
    pub hwaddr: MacAddress,
    pub frame: Frame,
}

/// Bounded channel from the dispatcher into one medium task.
pub type IntakeQueue =
    embassy_sync::channel::Channel<CriticalSectionRawMutex, MediumInput, INTAKE_QUEUE_SIZE>;
/// Receiver side, owned by the medium task.
pub type IntakeReceiver = embassy_sync::channel::Receiver<
    'static,
    CriticalSectionRawMutex,
    MediumInput,
    INTAKE_QUEUE_SIZE,
>;
/// Sender side, held by the dispatcher per interface address.
pub type IntakeSender = embassy_sync::channel::Sender<
    'static,
    CriticalSectionRawMutex,
    MediumInput,
    INTAKE_QUEUE_SIZE,
>;

/// Where a transmitting interface's frames are routed.
struct Route {
    iface: usize,
    sender: IntakeSender,
}

/// Shared handle medium tasks use to emit RX-info replies.
#[derive(Clone)]
pub struct ReplySink {
    socket: Arc<NetlinkSocket>,
    family: u16,
}

impl ReplySink {
    pub fn new(socket: Arc<NetlinkSocket>, family: u16) -> ReplySink {
        ReplySink { socket, family }
    }

    /// Encode and send one delivery verdict. Transport failures are logged
    /// and the reply is dropped; the simulation keeps running.
    fn send_rx_info(&self, medium_id: i32, delivery: &Delivery) {
        let frame = &delivery.frame;
        let attrs = RxInfo {
            transmitter: delivery.transmitter,
            frame_id: frame.cookie,
            rx_rate: delivery.rx_rate,
            freq: frame.freq,
            signal: frame.signal,
            flags: frame.flags,
            tx_rates: &frame.tx_rates,
            receivers: &delivery.receivers,
        }
        .encode();
        match self
            .socket
            .send(self.family, hwsim::CMD_RX_INFO, hwsim::PROTOCOL_VERSION, &attrs)
        {
            Ok(()) => log::trace!(
                "medium {}: frame {} delivered to {} radios",
                medium_id,
                frame.cookie,
                delivery.receivers.len()
            ),
            Err(err) => log::error!("medium {medium_id}: failed to send rx-info: {err}"),
        }
    }
}

/// Per-medium worker: drains the intake channel, runs the delivery timer and
/// the move timer. Owns the medium state exclusively.
#[embassy_executor::task(pool_size = MAX_MEDIUMS)]
async fn medium_task(mut medium: Medium, intake: IntakeReceiver, sink: ReplySink) {
    let mut delivery_deadline: Option<Instant> = None;
    let mut move_deadline: Option<Instant> = medium
        .mobility_enabled()
        .then(|| Instant::now() + MOVE_STARTUP_DELAY);

    log::info!(
        "medium {}: worker running ({} interfaces, mobility {})",
        medium.id(),
        medium.interfaces().len(),
        if move_deadline.is_some() { "on" } else { "off" }
    );

    loop {
        let delivery_at = delivery_deadline;
        let move_at = move_deadline;
        let result = select3(
            intake.receive(),
            async move {
                match delivery_at {
                    Some(at) => Timer::at(at).await,
                    None => core::future::pending().await,
                }
            },
            async move {
                match move_at {
                    Some(at) => Timer::at(at).await,
                    None => core::future::pending().await,
                }
            },
        )
        .await;

        match result {
            Either3::First(input) => {
                handle_intake(&mut medium, input, &mut delivery_deadline);
                // Bounded drain: leave room for the timers under bursts.
                for _ in 1..INTAKE_DRAIN_LIMIT {
                    match intake.try_receive() {
                        Ok(input) => handle_intake(&mut medium, input, &mut delivery_deadline),
                        Err(_) => break,
                    }
                }
            }
            Either3::Second(()) => {
                let (deliveries, next) = medium.on_delivery_timer(Instant::now());
                delivery_deadline = next;
                for delivery in &deliveries {
                    sink.send_rx_info(medium.id(), delivery);
                }
            }
            Either3::Third(()) => {
                medium.move_tick();
                // Absolute re-arm from the scheduled fire time, so wakeup
                // latency does not accumulate as drift.
                move_deadline = move_at.map(|at| at + medium.move_interval());
            }
        }
    }
}

fn handle_intake(medium: &mut Medium, input: MediumInput, delivery_deadline: &mut Option<Instant>) {
    medium.note_transmitter(input.frame.sender, input.hwaddr);
    if let Some(deadline) = medium.enqueue(input.frame, Instant::now()) {
        *delivery_deadline = Some(deadline);
    }
}

/// Spawn the medium workers, register with the kernel and run the dispatch
/// loop until the socket fails.
pub fn run(
    plans: Vec<MediumPlan>,
    socket: Arc<NetlinkSocket>,
    family: u16,
    threaded: bool,
) -> anyhow::Result<()> {
    if plans.len() > MAX_MEDIUMS {
        anyhow::bail!(
            "{} mediums configured, at most {MAX_MEDIUMS} supported",
            plans.len()
        );
    }

    let mut routes: HashMap<MacAddress, Route> = HashMap::new();
    let mut workers = Vec::new();
    for plan in &plans {
        let channel: &'static IntakeQueue = Box::leak(Box::new(IntakeQueue::new()));
        for (iface, itf) in plan.interfaces.iter().enumerate() {
            routes.insert(
                itf.addr,
                Route {
                    iface,
                    sender: channel.sender(),
                },
            );
        }
        let medium = Medium::from_plan(plan, SmallRng::from_entropy());
        workers.push((medium, channel.receiver()));
    }

    if threaded {
        for (medium, intake) in workers {
            let sink = ReplySink::new(socket.clone(), family);
            let name = format!("medium-{}", medium.id());
            let _worker = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
                    executor.run(|spawner| {
                        let _ = spawner.spawn(medium_task(medium, intake, sink));
                    });
                })
                .with_context(|| format!("failed to spawn worker thread {name}"))?;
        }
    } else {
        let sink = ReplySink::new(socket.clone(), family);
        let _worker = thread::Builder::new()
            .name("medium-workers".to_string())
            .spawn(move || {
                let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
                executor.run(move |spawner| {
                    for (medium, intake) in workers {
                        let _ = spawner.spawn(medium_task(medium, intake, sink.clone()));
                    }
                });
            })
            .context("failed to spawn worker thread")?;
    }

    socket
        .send(family, hwsim::CMD_REGISTER, hwsim::PROTOCOL_VERSION, &[])
        .context("failed to register with the kernel")?;
    log::info!("registered with the kernel, waiting for frames");

    let err = dispatch_loop(&socket, family, &routes);
    Err(err).context("netlink receive loop terminated")
}

/// Blocking socket read loop: decode, route, hand off.
fn dispatch_loop(
    socket: &NetlinkSocket,
    family: u16,
    routes: &HashMap<MacAddress, Route>,
) -> TransportError {
    loop {
        let messages = match socket.receive(family) {
            Ok(messages) => messages,
            Err(err) => return err,
        };
        for message in messages {
            match message {
                Message::Family {
                    cmd: hwsim::CMD_TX_INFO,
                    attrs,
                } => dispatch_tx_info(&attrs, routes),
                Message::Family { cmd, .. } => {
                    log::trace!("ignoring hwsim command {cmd}");
                }
                Message::Error { code } => {
                    log::error!("kernel reported netlink error: errno {}", -code);
                }
            }
        }
    }
}

fn dispatch_tx_info(attrs: &[u8], routes: &HashMap<MacAddress, Route>) {
    let tx = match TxInfo::parse(attrs) {
        Ok(tx) => tx,
        // Malformed frame: dropped silently per the error policy.
        Err(CodecError::ShortFrame) => return,
        Err(err) => {
            log::error!("failed to parse tx-info: {err}");
            return;
        }
    };
    let Some(header) = FrameHeader::from_bytes(&tx.frame_header) else {
        return;
    };

    let src = header.addr2();
    let Some(route) = routes.get(&src) else {
        log::error!("unable to find sender interface {}", format_mac(&src));
        return;
    };

    let frame = Frame::new(
        route.iface,
        header,
        tx.frame_len as usize,
        tx.flags,
        tx.cookie,
        tx.freq,
        tx.tx_rates,
    );
    let input = MediumInput {
        hwaddr: tx.transmitter,
        frame,
    };
    if route.sender.try_send(input).is_err() {
        log::warn!(
            "intake queue full, dropping frame from {}",
            format_mac(&src)
        );
    }
}
