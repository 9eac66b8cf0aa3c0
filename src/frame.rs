//! Frame objects and 802.11 header classification.
//!
//! The kernel ships at most the first 32 octets of each frame: enough header
//! to cover the optional fourth address and the QoS control field, which is
//! all the simulation needs to pick an access class and recognise
//! management, multicast and no-ack traffic.

use crate::rates::TX_MAX_RATES;

pub const ETH_ALEN: usize = 6;

pub type MacAddress = [u8; ETH_ALEN];

/// Require TX status callback for this frame.
pub const HWSIM_TX_CTL_REQ_TX_STATUS: u32 = 1;
/// The transmitter does not expect an ack for this frame.
pub const HWSIM_TX_CTL_NO_ACK: u32 = 1 << 1;
/// Frame was acknowledged (set by the simulation on success).
pub const HWSIM_TX_STAT_ACK: u32 = 1 << 2;

/// Most header octets the kernel forwards per frame.
pub const FRAME_HEADER_MAX: usize = 32;
/// Two MAC addresses plus frame control and duration.
pub const FRAME_HEADER_MIN: usize = 16;

// Frame-control masks, first octet.
const FCTL_FTYPE: u8 = 0x0c;
const FTYPE_MGMT: u8 = 0x00;
const FTYPE_DATA: u8 = 0x08;
const STYPE_QOS_DATA: u8 = 0x80;
// Frame-control masks, second octet.
const FCTL_TODS: u8 = 0x01;
const FCTL_FROMDS: u8 = 0x02;

const QOS_CTL_TAG1D_MASK: u8 = 0x07;

/// One entry of a frame's multi-rate retry set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxRate {
    /// Rate index, or -1 for an unused entry.
    pub idx: i8,
    /// Attempts to make (input) or attempts used (output).
    pub count: u8,
}

/// QoS access classes in dequeue priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCategory {
    Voice = 0,
    Video = 1,
    BestEffort = 2,
    Background = 3,
}

/// 802.1d priority tag to access class.
const TAG1D_TO_AC: [AccessCategory; 8] = [
    AccessCategory::BestEffort,
    AccessCategory::Background,
    AccessCategory::Background,
    AccessCategory::BestEffort,
    AccessCategory::Video,
    AccessCategory::Video,
    AccessCategory::Voice,
    AccessCategory::Voice,
];

/// The leading octets of an 802.11 MAC header, as forwarded by the kernel.
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    bytes: [u8; FRAME_HEADER_MAX],
    len: usize,
}

impl FrameHeader {
    /// Copy in up to 32 header octets. Returns `None` when fewer than the
    /// 16-octet minimum are present.
    pub fn from_bytes(data: &[u8]) -> Option<FrameHeader> {
        if data.len() < FRAME_HEADER_MIN {
            return None;
        }
        let len = data.len().min(FRAME_HEADER_MAX);
        let mut bytes = [0u8; FRAME_HEADER_MAX];
        bytes[..len].copy_from_slice(&data[..len]);
        Some(FrameHeader { bytes, len })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// Destination address.
    pub fn addr1(&self) -> MacAddress {
        self.bytes[4..10].try_into().unwrap()
    }

    /// Transmitter address, used to find the sending interface.
    pub fn addr2(&self) -> MacAddress {
        self.bytes[10..16].try_into().unwrap()
    }

    fn has_a4(&self) -> bool {
        self.bytes[1] & (FCTL_TODS | FCTL_FROMDS) == (FCTL_TODS | FCTL_FROMDS)
    }

    pub fn is_mgmt(&self) -> bool {
        self.bytes[0] & FCTL_FTYPE == FTYPE_MGMT
    }

    pub fn is_data(&self) -> bool {
        self.bytes[0] & FCTL_FTYPE == FTYPE_DATA
    }

    pub fn is_data_qos(&self) -> bool {
        self.bytes[0] & (FCTL_FTYPE | STYPE_QOS_DATA) == (FTYPE_DATA | STYPE_QOS_DATA)
    }

    /// The QoS control octet, at offset 30 for four-address frames and 24
    /// otherwise. `None` when the forwarded header is too short to hold it.
    fn qos_control(&self) -> Option<u8> {
        let offset = if self.has_a4() { 30 } else { 24 };
        (self.len > offset).then(|| self.bytes[offset])
    }

    /// QoS access class the frame queues under: management and control
    /// frames ride Voice, non-QoS data rides BestEffort, QoS data maps its
    /// 802.1d tag through the fixed table.
    pub fn access_category(&self) -> AccessCategory {
        if !self.is_data() {
            return AccessCategory::Voice;
        }
        if !self.is_data_qos() {
            return AccessCategory::BestEffort;
        }
        let priority = self.qos_control().unwrap_or(0) & QOS_CTL_TAG1D_MASK;
        TAG1D_TO_AC[priority as usize]
    }
}

/// Group-addressed destination: low-order bit of the first octet.
pub fn is_multicast(addr: &MacAddress) -> bool {
    addr[0] & 0x01 != 0
}

/// One transmission attempt, decoded from a TX-info record and owned by its
/// medium until delivered.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Index of the sending interface within its medium.
    pub sender: usize,
    pub header: FrameHeader,
    /// Total frame length in octets, including the body not forwarded.
    pub frame_len: usize,
    pub flags: u32,
    /// Kernel-assigned identifier, echoed in the RX-info reply.
    pub cookie: u64,
    /// Channel frequency [MHz].
    pub freq: u32,
    /// Multi-rate retry set; truncated in place once the outcome is known.
    pub tx_rates: Vec<TxRate>,
    /// Received signal strength [dBm], filled by the simulation.
    pub signal: i32,
    /// Medium occupancy [us], filled by the simulation.
    pub duration_us: u64,
}

impl Frame {
    pub fn new(
        sender: usize,
        header: FrameHeader,
        frame_len: usize,
        flags: u32,
        cookie: u64,
        freq: u32,
        mut tx_rates: Vec<TxRate>,
    ) -> Frame {
        tx_rates.truncate(TX_MAX_RATES);
        Frame {
            sender,
            header,
            frame_len,
            flags,
            cookie,
            freq,
            tx_rates,
            signal: 0,
            duration_us: 0,
        }
    }

    pub fn no_ack(&self) -> bool {
        self.header.is_mgmt() || is_multicast(&self.header.addr1())
    }

    pub fn acked(&self) -> bool {
        self.flags & HWSIM_TX_STAT_ACK != 0
    }
}
