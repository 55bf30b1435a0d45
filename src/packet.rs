//! Decoded packet records and a minimal IP header decoder.
//!
//! Capture is the caller's business; the core only needs addresses, the
//! transport protocol number and the datagram size.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;

/// Address family of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IpVersion {
    V4,
    V6,
}

/// A decoded packet as handed over by a packet source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    #[serde(rename = "source")]
    pub src: IpAddr,
    #[serde(rename = "destination")]
    pub dst: IpAddr,
    pub protocol: u8,
    pub data_size: u16,
}

impl Packet {
    pub fn new(src: IpAddr, dst: IpAddr, protocol: u8, data_size: u16) -> Self {
        Self {
            src,
            dst,
            protocol,
            data_size,
        }
    }

    /// Family of the source address.
    pub fn ip_version(&self) -> IpVersion {
        match self.src {
            IpAddr::V4(_) => IpVersion::V4,
            IpAddr::V6(_) => IpVersion::V6,
        }
    }

    /// The same packet travelling the other way.
    pub fn reversed(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            ..self.clone()
        }
    }
}

/// Decodes the network header of a raw IPv4 or IPv6 datagram.
///
/// Returns `None` for truncated buffers and non-IP payloads. The recorded
/// size is the full datagram length, saturated to `u16`.
pub fn decode(data: &[u8]) -> Option<Packet> {
    let first = *data.first()?;
    let data_size = u16::try_from(data.len()).unwrap_or(u16::MAX);

    match first >> 4 {
        4 => {
            if data.len() < IPV4_MIN_HEADER {
                return None;
            }
            let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
            let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
            Some(Packet::new(src.into(), dst.into(), data[9], data_size))
        }
        6 => {
            if data.len() < IPV6_HEADER {
                return None;
            }
            let src: [u8; 16] = data[8..24].try_into().ok()?;
            let dst: [u8; 16] = data[24..40].try_into().ok()?;
            Some(Packet::new(
                Ipv6Addr::from(src).into(),
                Ipv6Addr::from(dst).into(),
                data[6],
                data_size,
            ))
        }
        _ => None,
    }
}
