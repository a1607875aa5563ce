use bytes::Bytes;

/// A captured frame, decoded only as far as correlation needs.
///
/// Each layer is optional: the capture feed fills in what it could decode
/// and the correlator decides what to do with the gaps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapturedPacket {
    pub dns: Option<DnsLayer>,
    pub udp: Option<UdpLayer>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsLayer {
    /// QR bit of the header flags.
    pub is_response: bool,
    /// First entry of the question section, if it could be parsed.
    pub question: Option<Question>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Question {
    /// Dotted name as raw bytes; labels are not guaranteed to be UTF-8.
    pub name: Bytes,
    pub query_type: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UdpLayer {
    pub src_port: u16,
    pub dst_port: u16,
}

#[cfg(test)]
impl CapturedPacket {
    /// Outbound query as the capture feed would decode it.
    pub fn query(name: &str, query_type: u16, src_port: u16) -> Self {
        Self {
            dns: Some(DnsLayer {
                is_response: false,
                question: Some(Question {
                    name: Bytes::copy_from_slice(name.as_bytes()),
                    query_type,
                }),
            }),
            udp: Some(UdpLayer {
                src_port,
                dst_port: 53,
            }),
        }
    }
}
