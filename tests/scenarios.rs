//! End-to-end scenarios over the pure engine: configuration text in,
//! deliveries out, with seeded randomness and synthetic clock instants.

use embassy_time::{Duration, Instant};
use rand::SeedableRng;
use rand::rngs::SmallRng;

use airmedium::config::parse;
use airmedium::frame::{AccessCategory, Frame, FrameHeader, TxRate};
use airmedium::medium::{DIFS_US, Medium, SIFS_US, SLOT_TIME_US};
use airmedium::rates::{index_to_rate, pkt_duration_us};

const A: [u8; 6] = [0x02, 0, 0, 0, 0, 1];
const B: [u8; 6] = [0x02, 0, 0, 0, 0, 2];
const BROADCAST: [u8; 6] = [0xff; 6];

fn medium_from(config: &str) -> Medium {
    let plans = parse(config).unwrap();
    Medium::from_plan(&plans[0], SmallRng::seed_from_u64(0x5eed))
}

fn two_station_snr(default_snr: i32) -> Medium {
    medium_from(&format!(
        r#"{{
            "medium": [{{
                "id": 0,
                "interfaces": ["02:00:00:00:00:01", "02:00:00:00:00:02"],
                "model": {{ "type": "snr", "default_snr": {default_snr} }}
            }}]
        }}"#
    ))
}

fn data_frame(src: [u8; 6], dest: [u8; 6], cookie: u64, rates: Vec<TxRate>) -> Frame {
    let mut bytes = vec![0u8; 24];
    bytes[0] = 0x08; // data
    bytes[4..10].copy_from_slice(&dest);
    bytes[10..16].copy_from_slice(&src);
    Frame::new(
        0,
        FrameHeader::from_bytes(&bytes).unwrap(),
        100,
        0,
        cookie,
        2412,
        rates,
    )
}

fn ack_time_us() -> u64 {
    pkt_duration_us(14, index_to_rate(0, 2412)) + SIFS_US
}

/// S1: unicast with guaranteed delivery in SNR mode.
#[test]
fn s1_unicast_guaranteed_delivery() {
    let mut medium = two_station_snr(40);
    let t0 = Instant::from_micros(0);

    let frame = data_frame(A, B, 1, vec![TxRate { idx: 0, count: 1 }]);
    let deadline = medium.enqueue(frame, t0).expect("medium was idle");

    let expected_duration = DIFS_US + pkt_duration_us(100, index_to_rate(0, 2412)) + ack_time_us();
    {
        let current = medium.current_transmission().unwrap();
        assert!(current.acked());
        assert_eq!(current.duration_us, expected_duration);
        assert_eq!(current.signal, 40 + -91);
        // One attempt at the first rate survived, nothing else offered.
        assert_eq!(current.tx_rates, vec![TxRate { idx: 0, count: 1 }]);
    }
    assert_eq!(deadline, t0 + Duration::from_micros(expected_duration));

    let (deliveries, next) = medium.on_delivery_timer(deadline);
    assert!(next.is_none());
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].receivers.len(), 1);
    assert_eq!(deliveries[0].receivers[0].hwaddr, B);
    assert_eq!(deliveries[0].receivers[0].signal, -51);
}

/// S2: multicast is no-ack but still reaches peers above the CCA threshold.
#[test]
fn s2_multicast_dissemination() {
    let mut medium = two_station_snr(40);
    let t0 = Instant::from_micros(0);

    let frame = data_frame(A, BROADCAST, 2, vec![TxRate { idx: 0, count: 1 }]);
    let deadline = medium.enqueue(frame, t0).unwrap();

    let expected_duration = DIFS_US + pkt_duration_us(100, index_to_rate(0, 2412));
    {
        let current = medium.current_transmission().unwrap();
        assert!(current.acked());
        assert_eq!(current.duration_us, expected_duration);
    }

    let (deliveries, _) = medium.on_delivery_timer(deadline);
    // B hears the frame: 40 + (-91) = -51 >= -90, and the reverse-link
    // error probability at 40 dB SNR is zero.
    assert_eq!(deliveries[0].receivers.len(), 1);
    assert_eq!(deliveries[0].receivers[0].hwaddr, B);
}

/// S3: a certain-loss probability model exhausts every offered retry.
#[test]
fn s3_exhausted_retries_in_prob_mode() {
    let mut medium = medium_from(
        r#"{
            "medium": [{
                "id": 0,
                "interfaces": ["02:00:00:00:00:01", "02:00:00:00:00:02"],
                "model": { "type": "prob", "default_probability": 1.0 }
            }]
        }"#,
    );
    let t0 = Instant::from_micros(0);
    let offered = vec![TxRate { idx: 0, count: 4 }, TxRate { idx: 1, count: 4 }];
    medium.enqueue(data_frame(A, B, 3, offered.clone()), t0).unwrap();

    let current = medium.current_transmission().unwrap();
    assert!(!current.acked());
    // The retry set comes back unchanged: every count was consumed.
    assert_eq!(current.tx_rates, offered);

    // Eight transmission attempts plus ack waits plus best-effort backoff
    // (contention window doubling 15 -> 511 across the six retries).
    let attempts = 4 * (DIFS_US + pkt_duration_us(100, index_to_rate(0, 2412)) + ack_time_us())
        + 4 * (DIFS_US + pkt_duration_us(100, index_to_rate(1, 2412)) + ack_time_us());
    let backoff: u64 = [15u64, 31, 63, 127, 255, 511]
        .iter()
        .map(|cw| cw * SLOT_TIME_US / 2)
        .sum();
    assert_eq!(current.duration_us, attempts + backoff);
}

/// S4: a frame arriving during occupancy queues and is promoted with its
/// end butted against the previous end of transmission.
#[test]
fn s4_queued_during_occupancy() {
    let mut medium = two_station_snr(40);
    let t0 = Instant::from_micros(0);

    let f1 = data_frame(A, B, 41, vec![TxRate { idx: 0, count: 1 }]);
    let deadline = medium.enqueue(f1, t0).unwrap();
    let d1 = medium.current_transmission().unwrap().duration_us;

    // Second sender transmits 200 us in, while the medium is occupied.
    let mut f2_bytes = vec![0u8; 24];
    f2_bytes[0] = 0x08;
    f2_bytes[4..10].copy_from_slice(&A);
    f2_bytes[10..16].copy_from_slice(&B);
    let f2 = Frame::new(
        1,
        FrameHeader::from_bytes(&f2_bytes).unwrap(),
        100,
        0,
        42,
        2412,
        vec![TxRate { idx: 0, count: 1 }],
    );
    let t_arrive = t0 + Duration::from_micros(200);
    assert!(medium.enqueue(f2, t_arrive).is_none());
    assert_eq!(medium.queue_len(AccessCategory::BestEffort), 1);

    let (deliveries, next) = medium.on_delivery_timer(deadline);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].frame.cookie, 41);

    let current = medium.current_transmission().unwrap();
    assert_eq!(current.cookie, 42);
    let expected_end = t0 + Duration::from_micros(d1 + current.duration_us);
    assert_eq!(next.unwrap(), expected_end);
}

/// S5: mobility recomputes the SNR matrix from free-space geometry.
#[test]
fn s5_mobility_free_space() {
    let mut medium = medium_from(
        r#"{
            "medium": [{
                "id": 0,
                "interfaces": ["02:00:00:00:00:01", "02:00:00:00:00:02"],
                "model": {
                    "type": "path_loss",
                    "positions": [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]],
                    "directions": [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
                    "tx_powers": [20, 20],
                    "antenna_gain": [0, 0],
                    "move_interval": 1.0,
                    "model_name": "free_space",
                    "model_params": { "system_loss": 1 }
                }
            }]
        }"#,
    );
    assert!(medium.mobility_enabled());
    assert_eq!(medium.move_interval(), Duration::from_secs(1));

    // Free-space loss truncates to 60 dB at 10 m and 2.412 GHz, so
    // snr = 20 + 0 + 0 - 60 - (-91) = 51 before any movement.
    assert_eq!(medium.link_snr(0, 1), 51);

    // Distance grows by one meter per tick; the matrix follows the model.
    let model = airmedium::path_loss::PathLossModel::FreeSpace { system_loss: 1 };
    for tick in 1..=10 {
        medium.move_tick();
        let d = 10.0 + tick as f64;
        assert_eq!(medium.interfaces()[1].position.x, d);
        let expected = 20
            - model.loss_db(
                airmedium::path_loss::Position::default(),
                airmedium::path_loss::Position {
                    x: d,
                    y: 0.0,
                    z: 0.0,
                },
                0.0,
            )
            + 91;
        assert_eq!(medium.link_snr(0, 1), expected, "tick {tick}");
    }
}

/// S6: with the medium busy, a queued voice frame outranks best effort.
#[test]
fn s6_priority_promotion() {
    let mut medium = two_station_snr(40);
    let t0 = Instant::from_micros(0);

    let occupant = data_frame(A, B, 60, vec![TxRate { idx: 0, count: 1 }]);
    let deadline = medium.enqueue(occupant, t0).unwrap();

    let best_effort = data_frame(A, B, 61, vec![TxRate { idx: 0, count: 1 }]);
    medium.enqueue(best_effort, t0);

    // Management traffic rides the voice queue.
    let mut mgmt_bytes = vec![0u8; 24];
    mgmt_bytes[0] = 0x80;
    mgmt_bytes[4..10].copy_from_slice(&B);
    mgmt_bytes[10..16].copy_from_slice(&A);
    let voice = Frame::new(
        0,
        FrameHeader::from_bytes(&mgmt_bytes).unwrap(),
        50,
        0,
        62,
        2412,
        vec![TxRate { idx: 0, count: 1 }],
    );
    medium.enqueue(voice, t0);

    assert_eq!(medium.queue_len(AccessCategory::BestEffort), 1);
    assert_eq!(medium.queue_len(AccessCategory::Voice), 1);

    let (_, next) = medium.on_delivery_timer(deadline);
    assert!(next.is_some());
    assert_eq!(medium.current_transmission().unwrap().cookie, 62);
    assert_eq!(medium.queue_len(AccessCategory::Voice), 0);
    assert_eq!(medium.queue_len(AccessCategory::BestEffort), 1);
}
