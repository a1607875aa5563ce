use crate::dns::{CapturedPacket, DnsLayer, Question, UdpLayer};
use anyhow::{Context, Result, bail};
use bytes::Bytes;
use log::{info, trace, warn};
use pcap::{Active, Capture, Device, Error};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DNS_PORT: u16 = 53;
const CAPTURE_FILTER: &str = "udp port 53";
const CHANNEL_CAPACITY: usize = 10_000;
const READ_TIMEOUT_MS: i32 = 100;

pub struct CaptureLoader;

impl CaptureLoader {
    pub fn list_interfaces() -> Result<Vec<Device>> {
        Ok(Device::list()?)
    }

    pub fn select_default_interface() -> Result<String> {
        let devices = Device::list()?;

        for device in &devices {
            if device.name == "any" {
                continue;
            }
            if !device.flags.is_loopback() && device.flags.is_up() && device.flags.is_running() {
                return Ok(device.name.clone());
            }
        }

        for device in &devices {
            if device.name != "any" && device.flags.is_up() {
                return Ok(device.name.clone());
            }
        }

        bail!("No suitable network interface found")
    }

    /// Opens a capture on `interface` and starts a blocking reader that
    /// decodes every DNS packet and pushes it down the returned channel.
    ///
    /// The reader stops once the token is cancelled or the receiver is
    /// dropped. Failing to open the handle is fatal, usually a missing
    /// privilege.
    pub fn load(
        interface: &str,
    ) -> Result<(
        JoinHandle<()>,
        mpsc::Receiver<CapturedPacket>,
        CancellationToken,
    )> {
        info!("Opening capture on interface: {interface}");

        let mut cap = open(interface).with_context(|| {
            format!("Failed to open capture on {interface} (root or CAP_NET_RAW is required)")
        })?;
        cap.filter(CAPTURE_FILTER, true)
            .with_context(|| format!("Failed to apply filter \"{CAPTURE_FILTER}\""))?;

        let datalink = cap.get_datalink();
        let Some(link) = LinkLayer::from_dlt(datalink.0) else {
            bail!("Unsupported link type {datalink:?} on {interface}");
        };

        info!("Capture started on interface: {interface} ({link:?})");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        // The reader is a blocking thread, it polls this flag between reads.
        let should_stop = Arc::new(AtomicBool::new(false));
        let should_stop_clone = should_stop.clone();

        let handle = tokio::task::spawn_blocking(move || {
            while !should_stop_clone.load(Ordering::Relaxed) {
                match cap.next_packet() {
                    Ok(packet) => {
                        let Some(decoded) = decode_frame(link, packet.data) else {
                            trace!("Skipping undecodable frame of {} bytes", packet.data.len());
                            continue;
                        };
                        if tx.blocking_send(decoded).is_err() {
                            info!("Channel closed, stopping capture");
                            break;
                        }
                    }
                    Err(Error::TimeoutExpired) => continue,
                    Err(e) => {
                        warn!("Error reading packet: {e}");
                        continue;
                    }
                }
            }
            info!("Packet capture task terminated");
        });

        let stop_handle = should_stop.clone();
        tokio::spawn(async move {
            token_clone.cancelled().await;
            stop_handle.store(true, Ordering::Relaxed);
        });

        Ok((handle, rx, cancel_token))
    }
}

fn open(interface: &str) -> Result<Capture<Active>> {
    let device = if interface == "any" {
        Device::from("any")
    } else {
        Device::list()?
            .into_iter()
            .find(|d| d.name == interface)
            .context(format!("Interface {interface} not found"))?
    };

    Ok(Capture::from_device(device)?
        .immediate_mode(true)
        .timeout(READ_TIMEOUT_MS)
        .open()?)
}

/// Link-layer framings the decoder understands, keyed by DLT number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkLayer {
    /// DLT_EN10MB, 14 byte header, optional 802.1Q tag
    Ethernet,
    /// DLT_LINUX_SLL, used by the `any` device, 16 byte header
    LinuxSll,
    /// DLT_LINUX_SLL2, 20 byte header
    LinuxSll2,
    /// DLT_NULL / DLT_LOOP, 4 byte address family
    Loopback,
    /// Bare IP packets
    RawIp,
}

impl LinkLayer {
    pub fn from_dlt(dlt: i32) -> Option<Self> {
        match dlt {
            1 => Some(Self::Ethernet),
            113 => Some(Self::LinuxSll),
            276 => Some(Self::LinuxSll2),
            0 | 108 => Some(Self::Loopback),
            12 | 14 | 101 | 228 | 229 => Some(Self::RawIp),
            _ => None,
        }
    }
}

/// Decodes a captured frame down to the DNS question.
///
/// Returns `None` for anything that is not a UDP datagram over IPv4/IPv6.
/// A datagram whose payload is not a usable DNS message still yields a
/// packet with the UDP layer set, so the correlator can account for it.
pub fn decode_frame(link: LinkLayer, data: &[u8]) -> Option<CapturedPacket> {
    let ip = network_layer(link, data)?;
    let udp = match ip.first()? >> 4 {
        4 => parse_ipv4(ip)?,
        6 => parse_ipv6(ip)?,
        _ => return None,
    };
    parse_udp(udp)
}

/// Strips the link header and returns the IP packet.
fn network_layer(link: LinkLayer, data: &[u8]) -> Option<&[u8]> {
    let (ethertype, offset) = match link {
        LinkLayer::Ethernet => {
            // [12-13]: EtherType, or 0x8100 followed by a 4 byte VLAN tag
            let ethertype = u16::from_be_bytes([*data.get(12)?, *data.get(13)?]);
            if ethertype == 0x8100 {
                (u16::from_be_bytes([*data.get(16)?, *data.get(17)?]), 18)
            } else {
                (ethertype, 14)
            }
        }
        // [14-15]: protocol
        LinkLayer::LinuxSll => (u16::from_be_bytes([*data.get(14)?, *data.get(15)?]), 16),
        // [0-1]: protocol
        LinkLayer::LinuxSll2 => (u16::from_be_bytes([*data.get(0)?, *data.get(1)?]), 20),
        // Address family is in host byte order, trust the IP version nibble instead.
        LinkLayer::Loopback => return data.get(4..),
        LinkLayer::RawIp => return Some(data),
    };

    match ethertype {
        0x0800 | 0x86DD => data.get(offset..),
        _ => None,
    }
}

/// IPv4 (RFC 791). Returns the UDP datagram, bounded by Total Length.
fn parse_ipv4(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 20 {
        return None;
    }

    // Byte 9: protocol, 17 = UDP
    if data[9] != 17 {
        return None;
    }

    // Byte 0: IHL in 32-bit words
    let ihl = (data[0] & 0x0F) as usize * 4;
    // Bytes 2-3: Total Length; 0 happens with TSO, fall back to capture length.
    let total_len = match u16::from_be_bytes([data[2], data[3]]) as usize {
        0 => data.len(),
        n => n.min(data.len()),
    };
    // Bytes 6-7: flags + fragment offset. Later fragments carry no UDP header.
    let fragment_offset = u16::from_be_bytes([data[6], data[7]]) & 0x1FFF;

    if ihl < 20 || ihl > total_len || fragment_offset != 0 {
        return None;
    }

    Some(&data[ihl..total_len])
}

/// IPv6 (RFC 8200). Extension headers are not walked.
fn parse_ipv6(data: &[u8]) -> Option<&[u8]> {
    if data.len() < 40 {
        return None;
    }

    // Byte 6: Next Header, 17 = UDP
    if data[6] != 17 {
        return None;
    }

    // Bytes 4-5: Payload Length
    let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
    let end = match payload_len {
        0 => data.len(),
        n => (40 + n).min(data.len()),
    };
    Some(&data[40..end])
}

/// UDP (RFC 768): source port, destination port, length, checksum.
fn parse_udp(data: &[u8]) -> Option<CapturedPacket> {
    if data.len() < 8 {
        return None;
    }

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let udp = UdpLayer { src_port, dst_port };

    let dns = if src_port == DNS_PORT || dst_port == DNS_PORT {
        parse_dns(&data[8..])
    } else {
        None
    };

    Some(CapturedPacket {
        dns,
        udp: Some(udp),
    })
}

/// DNS header and first question (RFC 1035 Section 4.1).
///
/// ```text
///  0  1  2  3  4  5  6  7  8  9  0  1  2  3  4  5
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                      ID                       |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |QR|   Opcode  |AA|TC|RD|RA|   Z    |   RCODE   |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                    QDCOUNT                    |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |            ANCOUNT / NSCOUNT / ARCOUNT        |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
///
/// A message with a valid header but no parsable question still produces
/// a layer, with `question` left empty.
fn parse_dns(data: &[u8]) -> Option<DnsLayer> {
    if data.len() < 12 {
        return None;
    }

    let flags = u16::from_be_bytes([data[2], data[3]]);
    let is_response = (flags & 0x8000) != 0;
    let qd_count = u16::from_be_bytes([data[4], data[5]]);

    let question = if qd_count == 0 {
        None
    } else {
        parse_question(data)
    };

    Some(DnsLayer {
        is_response,
        question,
    })
}

fn parse_question(data: &[u8]) -> Option<Question> {
    let mut offset = 12;
    let name = parse_domain_name(data, &mut offset)?;

    // QTYPE (2 bytes) + QCLASS (2 bytes)
    if offset + 4 > data.len() {
        return None;
    }
    let query_type = u16::from_be_bytes([data[offset], data[offset + 1]]);

    Some(Question { name, query_type })
}

/// Reads a possibly compressed name (RFC 1035 Section 4.1.4) starting at
/// `offset`, and leaves `offset` just past it.
///
/// Labels are joined with dots and copied as-is; they are not required to
/// be text. Labels over 63 octets, names over 253 octets, truncated names
/// and more than 10 pointer jumps are rejected.
fn parse_domain_name(data: &[u8], offset: &mut usize) -> Option<Bytes> {
    const MAX_JUMPS: usize = 10;
    const MAX_NAME_LEN: usize = 253;

    let mut domain = Vec::new();
    let mut resume_at = None;
    let mut jumps = 0;
    let mut pos = *offset;

    loop {
        let len = *data.get(pos)? as usize;

        if len == 0 {
            pos += 1;
            break;
        }

        // Top two bits set: 14-bit pointer into the message
        if (len & 0xC0) == 0xC0 {
            let low = *data.get(pos + 1)? as usize;
            if resume_at.is_none() {
                resume_at = Some(pos + 2);
            }
            jumps += 1;
            if jumps > MAX_JUMPS {
                return None;
            }
            pos = ((len & 0x3F) << 8) | low;
            continue;
        }

        if len > 63 {
            return None;
        }

        let label = data.get(pos + 1..pos + 1 + len)?;
        if !domain.is_empty() {
            domain.push(b'.');
        }
        domain.extend_from_slice(label);
        pos += 1 + len;

        if domain.len() > MAX_NAME_LEN {
            return None;
        }
    }

    *offset = resume_at.unwrap_or(pos);
    Some(Bytes::from(domain))
}
