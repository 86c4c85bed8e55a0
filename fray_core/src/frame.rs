use rand::Rng;
use std::fmt;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors raised while assembling a [`Frame`] from a [`FrameTemplate`].
///
/// Template parsing is the only construction-time failure: a malformed
/// address or flag string fails the build, and the caller skips that fuzz
/// cycle. Nothing else about frame assembly can fail.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The MAC address string was not six ':'-separated hex octets.
    #[error("invalid MAC address '{0}': expected six ':'-separated hex octets")]
    InvalidMac(String),

    /// The IPv4 address string did not parse.
    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    /// An unknown character in the TCP flags string.
    #[error("invalid TCP flag character '{0}' (expected any of F S R P A U E C)")]
    InvalidFlags(char),
}

/// A six-octet link-layer hardware address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Parses the conventional `aa:bb:cc:dd:ee:ff` notation.
    pub fn parse(s: &str) -> Result<Self, FrameError> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(FrameError::InvalidMac(s.to_string()));
        }
        let mut octets = [0u8; 6];
        for (octet, part) in octets.iter_mut().zip(&parts) {
            if part.is_empty() || part.len() > 2 {
                return Err(FrameError::InvalidMac(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16)
                .map_err(|_| FrameError::InvalidMac(s.to_string()))?;
        }
        Ok(MacAddr(octets))
    }

    /// A random locally-administered unicast address, used when the template
    /// leaves the source MAC unspecified.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let mut octets = [0u8; 6];
        rng.fill(&mut octets[..]);
        // locally administered, unicast
        octets[0] = (octets[0] | 0x02) & 0xfe;
        MacAddr(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Parses a scapy-style TCP flag string (`"S"`, `"SA"`, `"FPU"`, ...) into
/// the flag bits of the TCP header.
pub fn parse_tcp_flags(s: &str) -> Result<u8, FrameError> {
    let mut flags = 0u8;
    for ch in s.chars() {
        flags |= match ch.to_ascii_uppercase() {
            'F' => 0x01,
            'S' => 0x02,
            'R' => 0x04,
            'P' => 0x08,
            'A' => 0x10,
            'U' => 0x20,
            'E' => 0x40,
            'C' => 0x80,
            other => return Err(FrameError::InvalidFlags(other)),
        };
    }
    Ok(flags)
}

/// The per-cycle parameters a fresh [`Frame`] is assembled from.
///
/// Addresses and flags are kept as strings so the template can come straight
/// from configuration; parsing happens in [`Frame::build`] and is the only
/// way construction fails.
#[derive(Debug, Clone)]
pub struct FrameTemplate {
    /// Source MAC; `None` draws a random locally-administered address per build.
    pub src_mac: Option<String>,
    pub dst_mac: String,
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub ttl: u8,
    /// TCP when `true`, UDP otherwise.
    pub use_tcp: bool,
    /// Scapy-style flag letters; only meaningful for TCP.
    pub tcp_flags: String,
    pub payload: Vec<u8>,
}

impl Default for FrameTemplate {
    fn default() -> Self {
        Self {
            src_mac: None,
            dst_mac: "ff:ff:ff:ff:ff:ff".to_string(),
            src_ip: "192.168.1.100".to_string(),
            dst_ip: "192.168.1.1".to_string(),
            src_port: 12345,
            dst_port: 80,
            ttl: 64,
            use_tcp: true,
            tcp_flags: "S".to_string(),
            payload: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtherHeader {
    pub src: MacAddr,
    pub dst: MacAddr,
    pub ethertype: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ttl: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp {
        src_port: u16,
        dst_port: u16,
        flags: u8,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
    },
}

impl Transport {
    fn header_len(&self) -> usize {
        match self {
            Transport::Tcp { .. } => 20,
            Transport::Udp { .. } => 8,
        }
    }

    fn protocol(&self) -> u8 {
        match self {
            Transport::Tcp { .. } => 6,
            Transport::Udp { .. } => 17,
        }
    }
}

/// One link-layer frame, either as a layered header chain
/// (Ethernet -> IPv4 -> TCP/UDP -> payload) or as an explicit raw byte
/// buffer that bypasses the layers entirely.
///
/// Invariant: while the raw override is set (by [`Frame::patch`] or a
/// mutator), the layered fields are ignored by [`Frame::serialize`] until
/// [`Frame::clear_override`] is called. At most one representation is
/// active at a time.
#[derive(Debug, Clone)]
pub struct Frame {
    pub ether: EtherHeader,
    pub ip: Ipv4Header,
    pub transport: Transport,
    pub payload: Vec<u8>,
    raw_override: Option<Vec<u8>>,
}

impl Frame {
    /// Assembles a fresh frame from the template. Each call is independent
    /// of any prior mutation; mutations never compound across cycles.
    pub fn build<R: Rng + ?Sized>(
        template: &FrameTemplate,
        rng: &mut R,
    ) -> Result<Self, FrameError> {
        let src_mac = match &template.src_mac {
            Some(s) => MacAddr::parse(s)?,
            None => MacAddr::random(rng),
        };
        let dst_mac = MacAddr::parse(&template.dst_mac)?;
        let src_ip: Ipv4Addr = template
            .src_ip
            .parse()
            .map_err(|_| FrameError::InvalidAddress(template.src_ip.clone()))?;
        let dst_ip: Ipv4Addr = template
            .dst_ip
            .parse()
            .map_err(|_| FrameError::InvalidAddress(template.dst_ip.clone()))?;

        let transport = if template.use_tcp {
            Transport::Tcp {
                src_port: template.src_port,
                dst_port: template.dst_port,
                flags: parse_tcp_flags(&template.tcp_flags)?,
            }
        } else {
            Transport::Udp {
                src_port: template.src_port,
                dst_port: template.dst_port,
            }
        };

        Ok(Frame {
            ether: EtherHeader {
                src: src_mac,
                dst: dst_mac,
                ethertype: 0x0800,
            },
            ip: Ipv4Header {
                src: src_ip,
                dst: dst_ip,
                ttl: template.ttl,
            },
            transport,
            payload: template.payload.clone(),
            raw_override: None,
        })
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    pub fn has_override(&self) -> bool {
        self.raw_override.is_some()
    }

    /// Overwrites bytes at `offset` in the current serialized form, clipped
    /// to the buffer length, and stores the result as the raw override.
    pub fn patch(&mut self, offset: usize, bytes: &[u8]) {
        let mut buffer = self.serialize();
        for (i, b) in bytes.iter().enumerate() {
            if let Some(slot) = buffer.get_mut(offset + i) {
                *slot = *b;
            }
        }
        self.raw_override = Some(buffer);
    }

    /// Replaces the serialized form wholesale; used by mutators.
    pub fn set_override(&mut self, bytes: Vec<u8>) {
        self.raw_override = Some(bytes);
    }

    /// Reverts to the layered model.
    pub fn clear_override(&mut self) {
        self.raw_override = None;
    }

    /// Serialized wire bytes: the raw override when set, the layered header
    /// chain otherwise.
    pub fn serialize(&self) -> Vec<u8> {
        match &self.raw_override {
            Some(raw) => raw.clone(),
            None => self.serialize_layered(),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    fn serialize_layered(&self) -> Vec<u8> {
        let transport_len = self.transport.header_len();
        let ip_total_len = 20 + transport_len + self.payload.len();
        let mut buf = Vec::with_capacity(14 + ip_total_len);

        // Ethernet
        buf.extend_from_slice(&self.ether.dst.0);
        buf.extend_from_slice(&self.ether.src.0);
        buf.extend_from_slice(&self.ether.ethertype.to_be_bytes());

        // IPv4, checksum back-filled below
        let ip_start = buf.len();
        buf.push(0x45);
        buf.push(0x00);
        buf.extend_from_slice(&(ip_total_len as u16).to_be_bytes());
        buf.extend_from_slice(&[0x00, 0x00]); // identification
        buf.extend_from_slice(&[0x00, 0x00]); // flags + fragment offset
        buf.push(self.ip.ttl);
        buf.push(self.transport.protocol());
        buf.extend_from_slice(&[0x00, 0x00]); // checksum placeholder
        buf.extend_from_slice(&self.ip.src.octets());
        buf.extend_from_slice(&self.ip.dst.octets());
        let checksum = ipv4_checksum(&buf[ip_start..ip_start + 20]);
        buf[ip_start + 10..ip_start + 12].copy_from_slice(&checksum.to_be_bytes());

        // Transport checksums stay zero; the mutation stage clobbers them anyway.
        match &self.transport {
            Transport::Tcp {
                src_port,
                dst_port,
                flags,
            } => {
                buf.extend_from_slice(&src_port.to_be_bytes());
                buf.extend_from_slice(&dst_port.to_be_bytes());
                buf.extend_from_slice(&0u32.to_be_bytes()); // sequence
                buf.extend_from_slice(&0u32.to_be_bytes()); // acknowledgment
                buf.push(0x50); // data offset, 5 words
                buf.push(*flags);
                buf.extend_from_slice(&0x2000u16.to_be_bytes()); // window
                buf.extend_from_slice(&[0x00, 0x00]); // checksum
                buf.extend_from_slice(&[0x00, 0x00]); // urgent pointer
            }
            Transport::Udp { src_port, dst_port } => {
                buf.extend_from_slice(&src_port.to_be_bytes());
                buf.extend_from_slice(&dst_port.to_be_bytes());
                buf.extend_from_slice(&((8 + self.payload.len()) as u16).to_be_bytes());
                buf.extend_from_slice(&[0x00, 0x00]); // checksum
            }
        }

        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// RFC 1071 one's-complement checksum over an IPv4 header whose checksum
/// field is zeroed.
fn ipv4_checksum(header: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in header.chunks(2) {
        let word = if chunk.len() == 2 {
            u16::from_be_bytes([chunk[0], chunk[1]])
        } else {
            u16::from_be_bytes([chunk[0], 0])
        };
        sum += u32::from(word);
    }
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
