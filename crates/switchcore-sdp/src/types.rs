//! SDP (RFC 4566) data model: the subset relevant to audio media proxying.

/// `c=` line address family. Dotted-quad addresses are `Ip4`; any address
/// containing a colon is `Ip6` (the rewriter's rule for addresses it generates).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    Ip4,
    Ip6,
}

impl AddrType {
    pub fn as_str(self) -> &'static str {
        match self {
            AddrType::Ip4 => "IP4",
            AddrType::Ip6 => "IP6",
        }
    }

    pub fn for_address(addr: &str) -> Self {
        if addr.contains(':') {
            AddrType::Ip6
        } else {
            AddrType::Ip4
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IP4" => Some(AddrType::Ip4),
            "IP6" => Some(AddrType::Ip6),
            _ => None,
        }
    }
}

/// `o=<username> <sess-id> <sess-version> <nettype> <addrtype> <unicast-address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub sess_id: String,
    pub sess_version: String,
    pub nettype: String,
    pub addrtype: AddrType,
    pub unicast_address: String,
}

/// `c=<nettype> <addrtype> <connection-address>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub nettype: String,
    pub addrtype: AddrType,
    pub address: String,
}

impl Connection {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            nettype: "IN".to_string(),
            addrtype: AddrType::for_address(&address),
            address,
        }
    }
}

/// Media direction attribute (RFC 3264). Absent on the wire defaults to
/// `SendRecv` when queried via `MediaDescription::effective_direction`, but
/// the parser records whether an explicit attribute line was present so
/// marshal can reproduce the original (it does not fabricate a direction
/// line that was never there).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::SendRecv => "sendrecv",
            Direction::SendOnly => "sendonly",
            Direction::RecvOnly => "recvonly",
            Direction::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sendrecv" => Some(Direction::SendRecv),
            "sendonly" => Some(Direction::SendOnly),
            "recvonly" => Some(Direction::RecvOnly),
            "inactive" => Some(Direction::Inactive),
            _ => None,
        }
    }
}

/// A codec derived from a matching `a=rtpmap` (and optional `a=fmtp`) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    pub payload_type: u8,
    pub name: String,
    pub clock_rate: u32,
    pub channels: Option<u32>,
    pub fmtp: Option<String>,
}

impl Codec {
    pub fn matches_payload_type(&self, pt: u8) -> bool {
        self.payload_type == pt
    }
}

/// One `m=` section and everything that hangs off it until the next `m=`
/// (or end of message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    pub media_type: String,
    pub port: u16,
    pub num_ports: Option<u16>,
    pub proto: String,
    pub formats: Vec<String>,
    pub connection: Option<Connection>,
    pub direction: Option<Direction>,
    pub codecs: Vec<Codec>,
    /// Attribute lines (without the leading `a=`) that are neither
    /// `rtpmap`, `fmtp`, nor a direction keyword, preserved verbatim so a
    /// rewrite does not drop attributes it does not understand (e.g. ICE
    /// candidates, `ptime`, `ssrc`).
    pub other_attributes: Vec<String>,
}

impl MediaDescription {
    pub fn is_audio(&self) -> bool {
        self.media_type == "audio"
    }

    pub fn effective_direction(&self) -> Direction {
        self.direction.unwrap_or(Direction::SendRecv)
    }

    pub fn codec_by_payload_type(&self, pt: u8) -> Option<&Codec> {
        self.codecs.iter().find(|c| c.payload_type == pt)
    }

    pub fn codec_by_name(&self, name: &str) -> Option<&Codec> {
        self.codecs
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// A parsed SDP session description (RFC 4566 subset).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub protocol_version: String,
    pub origin: Option<Origin>,
    pub session_name: Option<String>,
    pub connection: Option<Connection>,
    pub time: Vec<(String, String)>,
    pub session_attributes: Vec<String>,
    pub media: Vec<MediaDescription>,
}

impl SessionDescription {
    /// The first audio `m=` section, if any — the common case for a PBX
    /// core that proxies a single audio leg per SDP.
    pub fn audio_media(&self) -> Option<&MediaDescription> {
        self.media.iter().find(|m| m.is_audio())
    }

    pub fn audio_media_mut(&mut self) -> Option<&mut MediaDescription> {
        self.media.iter_mut().find(|m| m.is_audio())
    }

    pub fn codec_by_payload_type(&self, pt: u8) -> Option<&Codec> {
        self.media.iter().find_map(|m| m.codec_by_payload_type(pt))
    }

    pub fn codec_by_name(&self, name: &str) -> Option<&Codec> {
        self.media.iter().find_map(|m| m.codec_by_name(name))
    }
}
