//! Generic netlink transport.
//!
//! A thin wrapper over an `AF_NETLINK`/`NETLINK_GENERIC` datagram socket:
//! message framing (`nlmsghdr` + `genlmsghdr` + attributes), family-id
//! resolution through the generic netlink controller, and send/receive.
//!
//! Framing is built and parsed as plain byte buffers so the whole layer is
//! testable without a kernel; only [`NetlinkSocket`] touches syscalls.
//! Sends are serialised by an internal mutex — medium workers share the
//! socket for RX-info replies while the dispatcher thread blocks in
//! `recv` — which is safe because netlink datagrams are atomic.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Mutex;
use thiserror::Error;

const NLMSG_HDRLEN: usize = 16;
const GENL_HDRLEN: usize = 4;
const NLA_HDRLEN: usize = 4;

const NLM_F_REQUEST: u16 = 1;

const NLMSG_NOOP: u16 = 1;
const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;

const RECV_BUFFER_LEN: usize = 32 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("netlink socket setup failed: {0}")]
    Socket(io::Error),
    #[error("netlink send failed: {0}")]
    Send(io::Error),
    #[error("netlink receive failed: {0}")]
    Receive(io::Error),
    #[error("generic netlink family {0:?} not registered")]
    FamilyNotFound(String),
    #[error("malformed netlink message")]
    Malformed,
}

/// One received generic netlink message, reduced to what the daemon needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A message of the resolved hwsim family: command plus attribute bytes.
    Family { cmd: u8, attrs: Vec<u8> },
    /// A kernel-reported error for one of our requests (negative errno).
    Error { code: i32 },
}

/// Build one complete netlink message around a generic netlink payload.
pub fn build_message(
    family: u16,
    seq: u32,
    pid: u32,
    cmd: u8,
    version: u8,
    attrs: &[u8],
) -> Vec<u8> {
    let len = NLMSG_HDRLEN + GENL_HDRLEN + attrs.len();
    let mut buf = Vec::with_capacity(len);
    buf.extend_from_slice(&(len as u32).to_ne_bytes());
    buf.extend_from_slice(&family.to_ne_bytes());
    buf.extend_from_slice(&NLM_F_REQUEST.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&pid.to_ne_bytes());
    buf.push(cmd);
    buf.push(version);
    buf.extend_from_slice(&0u16.to_ne_bytes()); // reserved
    buf.extend_from_slice(attrs);
    buf
}

/// Split a receive buffer into the messages relevant to `family`.
pub fn parse_messages(buf: &[u8], family: u16) -> Result<Vec<Message>, TransportError> {
    let mut messages = Vec::new();
    let mut offset = 0;
    while offset + NLMSG_HDRLEN <= buf.len() {
        let msg_len = u32::from_ne_bytes(buf[offset..offset + 4].try_into().unwrap()) as usize;
        let msg_type = u16::from_ne_bytes(buf[offset + 4..offset + 6].try_into().unwrap());
        if msg_len < NLMSG_HDRLEN || offset + msg_len > buf.len() {
            return Err(TransportError::Malformed);
        }
        let payload = &buf[offset + NLMSG_HDRLEN..offset + msg_len];

        if msg_type == NLMSG_ERROR {
            if payload.len() < 4 {
                return Err(TransportError::Malformed);
            }
            let code = i32::from_ne_bytes(payload[..4].try_into().unwrap());
            // An "error" of 0 is just an acknowledgment.
            if code != 0 {
                messages.push(Message::Error { code });
            }
        } else if msg_type == family && payload.len() >= GENL_HDRLEN {
            messages.push(Message::Family {
                cmd: payload[0],
                attrs: payload[GENL_HDRLEN..].to_vec(),
            });
        } else if msg_type != NLMSG_NOOP && msg_type != NLMSG_DONE {
            log::trace!("ignoring netlink message type {msg_type}");
        }

        // Messages are aligned to 4 octets within the datagram.
        offset += (msg_len + 3) & !3;
    }
    Ok(messages)
}

/// Find an attribute's payload in a flat attribute stream.
fn find_attr(attrs: &[u8], wanted: u16) -> Option<&[u8]> {
    let mut offset = 0;
    while offset + NLA_HDRLEN <= attrs.len() {
        let nla_len = u16::from_ne_bytes(attrs[offset..offset + 2].try_into().unwrap()) as usize;
        let nla_type = u16::from_ne_bytes(attrs[offset + 2..offset + 4].try_into().unwrap());
        if nla_len < NLA_HDRLEN || offset + nla_len > attrs.len() {
            return None;
        }
        if nla_type == wanted {
            return Some(&attrs[offset + NLA_HDRLEN..offset + nla_len]);
        }
        offset += (nla_len + 3) & !3;
    }
    None
}

/// A connected `NETLINK_GENERIC` socket.
pub struct NetlinkSocket {
    fd: RawFd,
    pid: u32,
    seq: Mutex<u32>,
}

impl NetlinkSocket {
    /// Open and bind a generic netlink socket.
    pub fn connect() -> Result<NetlinkSocket, TransportError> {
        // SAFETY: plain socket/bind/getsockname syscalls on a fresh fd with
        // properly sized sockaddr_nl structures.
        unsafe {
            let fd = libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                libc::NETLINK_GENERIC,
            );
            if fd < 0 {
                return Err(TransportError::Socket(io::Error::last_os_error()));
            }

            let mut addr: libc::sockaddr_nl = std::mem::zeroed();
            addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
            let ret = libc::bind(
                fd,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            );
            if ret < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(TransportError::Socket(err));
            }

            // Learn the port id the kernel assigned.
            let mut bound: libc::sockaddr_nl = std::mem::zeroed();
            let mut len = std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;
            let ret = libc::getsockname(
                fd,
                &mut bound as *mut libc::sockaddr_nl as *mut libc::sockaddr,
                &mut len,
            );
            if ret < 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(TransportError::Socket(err));
            }

            Ok(NetlinkSocket {
                fd,
                pid: bound.nl_pid,
                seq: Mutex::new(1),
            })
        }
    }

    /// Send one generic netlink message. Serialised internally so medium
    /// workers can share the socket.
    pub fn send(&self, family: u16, cmd: u8, version: u8, attrs: &[u8]) -> Result<(), TransportError> {
        let mut seq = self.seq.lock().expect("netlink send mutex poisoned");
        *seq = seq.wrapping_add(1);
        let msg = build_message(family, *seq, self.pid, cmd, version, attrs);
        // SAFETY: buffer pointer and length describe a live Vec.
        let ret = unsafe { libc::send(self.fd, msg.as_ptr().cast(), msg.len(), 0) };
        if ret < 0 {
            return Err(TransportError::Send(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Block for the next datagram and split it into family messages.
    pub fn receive(&self, family: u16) -> Result<Vec<Message>, TransportError> {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        // SAFETY: buffer pointer and length describe a live Vec.
        let ret = unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
        if ret < 0 {
            return Err(TransportError::Receive(io::Error::last_os_error()));
        }
        buf.truncate(ret as usize);
        parse_messages(&buf, family)
    }

    /// Resolve a generic netlink family name to its id via the controller.
    pub fn resolve_family(&self, name: &str) -> Result<u16, TransportError> {
        let mut attrs = Vec::new();
        let mut name_z = name.as_bytes().to_vec();
        name_z.push(0);
        let nla_len = (NLA_HDRLEN + name_z.len()) as u16;
        attrs.extend_from_slice(&nla_len.to_ne_bytes());
        attrs.extend_from_slice(&CTRL_ATTR_FAMILY_NAME.to_ne_bytes());
        attrs.extend_from_slice(&name_z);
        attrs.resize((attrs.len() + 3) & !3, 0);

        self.send(GENL_ID_CTRL, CTRL_CMD_GETFAMILY, 1, &attrs)?;

        for message in self.receive(GENL_ID_CTRL)? {
            match message {
                Message::Family { attrs, .. } => {
                    if let Some(payload) = find_attr(&attrs, CTRL_ATTR_FAMILY_ID) {
                        if payload.len() >= 2 {
                            return Ok(u16::from_ne_bytes(payload[..2].try_into().unwrap()));
                        }
                    }
                }
                Message::Error { code } => {
                    log::error!("family lookup failed: errno {}", -code);
                }
            }
        }
        Err(TransportError::FamilyNotFound(name.to_string()))
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this struct and closed exactly once.
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message_lays_out_headers() {
        let msg = build_message(0x23, 7, 99, 2, 1, &[1, 2, 3, 4]);
        assert_eq!(msg.len(), NLMSG_HDRLEN + GENL_HDRLEN + 4);
        // nlmsghdr: len, type, flags, seq, pid
        assert_eq!(u32::from_ne_bytes(msg[0..4].try_into().unwrap()), 24);
        assert_eq!(u16::from_ne_bytes(msg[4..6].try_into().unwrap()), 0x23);
        assert_eq!(u16::from_ne_bytes(msg[6..8].try_into().unwrap()), NLM_F_REQUEST);
        assert_eq!(u32::from_ne_bytes(msg[8..12].try_into().unwrap()), 7);
        assert_eq!(u32::from_ne_bytes(msg[12..16].try_into().unwrap()), 99);
        // genlmsghdr: cmd, version, reserved
        assert_eq!(msg[16], 2);
        assert_eq!(msg[17], 1);
        assert_eq!(&msg[20..], &[1, 2, 3, 4]);
    }

    #[test]
    fn parse_splits_family_and_error_messages() {
        let family = 0x23;
        let mut buf = build_message(family, 1, 0, 7, 2, &[9, 9, 9, 9]);
        // Append an error message: nlmsghdr + errno code.
        let mut error = Vec::new();
        error.extend_from_slice(&20u32.to_ne_bytes());
        error.extend_from_slice(&NLMSG_ERROR.to_ne_bytes());
        error.extend_from_slice(&0u16.to_ne_bytes());
        error.extend_from_slice(&2u32.to_ne_bytes());
        error.extend_from_slice(&0u32.to_ne_bytes());
        error.extend_from_slice(&(-95i32).to_ne_bytes());
        buf.extend_from_slice(&error);

        let messages = parse_messages(&buf, family).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            Message::Family {
                cmd: 7,
                attrs: vec![9, 9, 9, 9]
            }
        );
        assert_eq!(messages[1], Message::Error { code: -95 });
    }

    #[test]
    fn parse_skips_foreign_and_ack_messages() {
        let foreign = build_message(0x99, 1, 0, 1, 1, &[]);
        let messages = parse_messages(&foreign, 0x23).unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn parse_rejects_truncated_buffers() {
        let mut msg = build_message(0x23, 1, 0, 1, 1, &[1, 2, 3, 4]);
        msg.truncate(msg.len() - 2);
        assert!(parse_messages(&msg, 0x23).is_err());
    }

    #[test]
    fn find_attr_walks_aligned_attributes() {
        let mut attrs = Vec::new();
        // attr type 1, 2-byte payload, padded to 4
        attrs.extend_from_slice(&6u16.to_ne_bytes());
        attrs.extend_from_slice(&1u16.to_ne_bytes());
        attrs.extend_from_slice(&[0xaa, 0xbb, 0, 0]);
        // attr type 2, 2-byte payload
        attrs.extend_from_slice(&6u16.to_ne_bytes());
        attrs.extend_from_slice(&2u16.to_ne_bytes());
        attrs.extend_from_slice(&[0x23, 0x00]);

        assert_eq!(find_attr(&attrs, 2), Some(&[0x23, 0x00][..]));
        assert_eq!(find_attr(&attrs, 1), Some(&[0xaa, 0xbb][..]));
        assert_eq!(find_attr(&attrs, 3), None);
    }
}
