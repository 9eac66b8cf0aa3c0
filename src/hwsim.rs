//! TX-info and RX-info attribute codecs for the `MAC80211_HWSIM` family.
//!
//! Attributes travel as netlink TLVs: a 4-octet header carrying the total
//! attribute length and the type, then the payload padded to a 4-octet
//! boundary. The codec walks and builds those buffers directly; the
//! surrounding generic-netlink framing lives in [`crate::netlink`].

use thiserror::Error;

use crate::frame::{ETH_ALEN, MacAddress, TxRate};
use crate::medium::Receiver;
use crate::rates::TX_MAX_RATES;

/// Version of the communication protocol with the kernel module.
pub const PROTOCOL_VERSION: u8 = 2;

/// Generic netlink family name of the kernel virtual-radio module.
pub const FAMILY_NAME: &str = "MAC80211_HWSIM";

// Commands.
pub const CMD_REGISTER: u8 = 1;
pub const CMD_TX_INFO: u8 = 7;
pub const CMD_RX_INFO: u8 = 8;

// Attributes.
pub const ATTR_ADDR_TRANSMITTER: u16 = 2;
pub const ATTR_FLAGS: u16 = 4;
pub const ATTR_RX_RATE: u16 = 5;
pub const ATTR_SIGNAL: u16 = 6;
pub const ATTR_TX_INFO: u16 = 7;
pub const ATTR_FREQ: u16 = 19;
pub const ATTR_FRAME_HEADER: u16 = 25;
pub const ATTR_FRAME_LENGTH: u16 = 26;
pub const ATTR_FRAME_ID: u16 = 27;
pub const ATTR_RECEIVER_INFO: u16 = 28;

const NLA_HDRLEN: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated attribute stream at offset {0}")]
    Truncated(usize),
    #[error("attribute {0} has a malformed payload")]
    Malformed(&'static str),
    #[error("missing required attribute {0}")]
    Missing(&'static str),
    #[error("frame header shorter than 16 octets")]
    ShortFrame,
}

/// Round a length up to the netlink attribute alignment boundary.
pub fn nla_align(len: usize) -> usize {
    (len + NLA_HDRLEN - 1) & !(NLA_HDRLEN - 1)
}

/// Append one attribute, padding the payload to the alignment boundary.
fn put_attr(buf: &mut Vec<u8>, attr_type: u16, payload: &[u8]) {
    let nla_len = (NLA_HDRLEN + payload.len()) as u16;
    buf.extend_from_slice(&nla_len.to_ne_bytes());
    buf.extend_from_slice(&attr_type.to_ne_bytes());
    buf.extend_from_slice(payload);
    buf.resize(nla_align(buf.len()), 0);
}

fn attr_u32(payload: &[u8], name: &'static str) -> Result<u32, CodecError> {
    Ok(u32::from_ne_bytes(
        payload
            .try_into()
            .map_err(|_| CodecError::Malformed(name))?,
    ))
}

fn attr_u64(payload: &[u8], name: &'static str) -> Result<u64, CodecError> {
    Ok(u64::from_ne_bytes(
        payload
            .try_into()
            .map_err(|_| CodecError::Malformed(name))?,
    ))
}

/// A decoded TX-info record: one frame the kernel wants simulated.
#[derive(Debug, Clone, PartialEq)]
pub struct TxInfo {
    /// Hardware address of the transmitting radio.
    pub transmitter: MacAddress,
    /// Up to 32 octets of 802.11 header.
    pub frame_header: Vec<u8>,
    /// Total frame length including the body that was not forwarded.
    pub frame_len: u32,
    pub flags: u32,
    pub cookie: u64,
    pub freq: u32,
    pub tx_rates: Vec<TxRate>,
}

impl TxInfo {
    /// Parse the attribute stream of a TX-info message.
    ///
    /// Frames shorter than the 16-octet header minimum are rejected with
    /// [`CodecError::ShortFrame`]; per the drop policy the caller discards
    /// those silently.
    pub fn parse(attrs: &[u8]) -> Result<TxInfo, CodecError> {
        let mut transmitter = None;
        let mut frame_header = None;
        let mut frame_len = None;
        let mut flags = None;
        let mut cookie = None;
        let mut freq = None;
        let mut tx_rates = None;

        let mut offset = 0;
        while offset < attrs.len() {
            if attrs.len() - offset < NLA_HDRLEN {
                return Err(CodecError::Truncated(offset));
            }
            let nla_len =
                u16::from_ne_bytes(attrs[offset..offset + 2].try_into().unwrap()) as usize;
            let nla_type = u16::from_ne_bytes(attrs[offset + 2..offset + 4].try_into().unwrap());
            if nla_len < NLA_HDRLEN || offset + nla_len > attrs.len() {
                return Err(CodecError::Truncated(offset));
            }
            let payload = &attrs[offset + NLA_HDRLEN..offset + nla_len];

            match nla_type {
                ATTR_ADDR_TRANSMITTER => {
                    let addr: MacAddress = payload
                        .try_into()
                        .map_err(|_| CodecError::Malformed("ADDR_TRANSMITTER"))?;
                    transmitter = Some(addr);
                }
                ATTR_FRAME_HEADER => frame_header = Some(payload.to_vec()),
                ATTR_FRAME_LENGTH => frame_len = Some(attr_u32(payload, "FRAME_LENGTH")?),
                ATTR_FLAGS => flags = Some(attr_u32(payload, "FLAGS")?),
                ATTR_FRAME_ID => cookie = Some(attr_u64(payload, "FRAME_ID")?),
                ATTR_FREQ => freq = Some(attr_u32(payload, "FREQ")?),
                ATTR_TX_INFO => {
                    let rates = payload
                        .chunks_exact(2)
                        .take(TX_MAX_RATES)
                        .map(|pair| TxRate {
                            idx: pair[0] as i8,
                            count: pair[1],
                        })
                        .collect();
                    tx_rates = Some(rates);
                }
                _ => {} // unknown attributes are skipped
            }
            offset += nla_align(nla_len);
        }

        let frame_len = frame_len.ok_or(CodecError::Missing("FRAME_LENGTH"))?;
        let frame_header = frame_header.ok_or(CodecError::Missing("FRAME_HEADER"))?;
        if frame_len < 16 || frame_header.len() < 16 {
            return Err(CodecError::ShortFrame);
        }
        Ok(TxInfo {
            transmitter: transmitter.ok_or(CodecError::Missing("ADDR_TRANSMITTER"))?,
            frame_header,
            frame_len,
            flags: flags.ok_or(CodecError::Missing("FLAGS"))?,
            cookie: cookie.ok_or(CodecError::Missing("FRAME_ID"))?,
            freq: freq.ok_or(CodecError::Missing("FREQ"))?,
            tx_rates: tx_rates.ok_or(CodecError::Missing("TX_INFO"))?,
        })
    }
}

/// One RX-info reply: the verdict for a delivered frame.
#[derive(Debug)]
pub struct RxInfo<'a> {
    pub transmitter: MacAddress,
    pub frame_id: u64,
    pub rx_rate: u32,
    pub freq: u32,
    pub signal: i32,
    pub flags: u32,
    pub tx_rates: &'a [TxRate],
    pub receivers: &'a [Receiver],
}

impl RxInfo<'_> {
    /// Encode into an attribute stream for the RX-info message.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96 + self.receivers.len() * 12);
        put_attr(&mut buf, ATTR_ADDR_TRANSMITTER, &self.transmitter);
        put_attr(&mut buf, ATTR_FRAME_ID, &self.frame_id.to_ne_bytes());
        put_attr(&mut buf, ATTR_RX_RATE, &self.rx_rate.to_ne_bytes());
        put_attr(&mut buf, ATTR_FREQ, &self.freq.to_ne_bytes());
        put_attr(&mut buf, ATTR_SIGNAL, &(self.signal as u32).to_ne_bytes());
        put_attr(&mut buf, ATTR_FLAGS, &self.flags.to_ne_bytes());

        let mut rates = Vec::with_capacity(self.tx_rates.len() * 2);
        for rate in self.tx_rates {
            rates.push(rate.idx as u8);
            rates.push(rate.count);
        }
        put_attr(&mut buf, ATTR_TX_INFO, &rates);

        // Packed array of { u8 mac[6]; u32 signal; }, alignment 1.
        let mut receivers = Vec::with_capacity(self.receivers.len() * (ETH_ALEN + 4));
        for receiver in self.receivers {
            receivers.extend_from_slice(&receiver.hwaddr);
            receivers.extend_from_slice(&(receiver.signal as u32).to_ne_bytes());
        }
        put_attr(&mut buf, ATTR_RECEIVER_INFO, &receivers);
        buf
    }
}
