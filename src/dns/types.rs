use std::fmt;

/// Question types (RFC 1035 Section 3.2.2, RFC 3596, RFC 9460)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// IPv4 host address
    A,
    /// Authoritative name server
    Ns,
    /// Canonical name for an alias
    Cname,
    /// Start of authority
    Soa,
    /// Domain name pointer, reverse lookups
    Ptr,
    /// Mail exchange
    Mx,
    /// Text strings
    Txt,
    /// IPv6 host address - RFC 3596
    Aaaa,
    /// Service location - RFC 2782
    Srv,
    /// Service binding - RFC 9460
    Svcb,
    /// HTTPS binding - RFC 9460
    Https,
    /// QTYPE 255, request for all records
    Any,
    Unknown(u16),
}

impl From<u16> for QueryType {
    fn from(value: u16) -> Self {
        match value {
            1 => Self::A,
            2 => Self::Ns,
            5 => Self::Cname,
            6 => Self::Soa,
            12 => Self::Ptr,
            15 => Self::Mx,
            16 => Self::Txt,
            28 => Self::Aaaa,
            33 => Self::Srv,
            64 => Self::Svcb,
            65 => Self::Https,
            255 => Self::Any,
            n => Self::Unknown(n),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::A => "A",
            Self::Ns => "NS",
            Self::Cname => "CNAME",
            Self::Soa => "SOA",
            Self::Ptr => "PTR",
            Self::Mx => "MX",
            Self::Txt => "TXT",
            Self::Aaaa => "AAAA",
            Self::Srv => "SRV",
            Self::Svcb => "SVCB",
            Self::Https => "HTTPS",
            Self::Any => "ANY",
            Self::Unknown(n) => return write!(f, "TYPE{n}"),
        };
        f.write_str(name)
    }
}
