//! Rewrites an SDP so the PBX core is inserted as a media proxy: origin
//! address, session-level connection, and every audio m-line's port/connection
//! are replaced with the core's own; everything else (including non-audio
//! media sections) is left untouched.

use tracing::debug;

use crate::types::{AddrType, Connection, SessionDescription};

/// Replace the origin address, session-level connection, and every audio
/// m-section's port/connection with `local_address`/`local_audio_port`.
/// Idempotent: rewriting an already-rewritten SDP with the same arguments
/// produces the same output.
pub fn rewrite_for_proxy(sdp: &SessionDescription, local_address: &str, local_audio_port: u16) -> SessionDescription {
    let mut out = sdp.clone();
    let addrtype = AddrType::for_address(local_address);

    if let Some(origin) = out.origin.as_mut() {
        origin.unicast_address = local_address.to_string();
        origin.addrtype = addrtype;
    }

    if let Some(conn) = out.connection.as_mut() {
        conn.address = local_address.to_string();
        conn.addrtype = addrtype;
    }

    let mut audio_sections = 0usize;
    for media in out.media.iter_mut().filter(|m| m.is_audio()) {
        media.port = local_audio_port;
        if let Some(conn) = media.connection.as_mut() {
            *conn = Connection {
                nettype: conn.nettype.clone(),
                addrtype,
                address: local_address.to_string(),
            };
        }
        audio_sections += 1;
    }

    debug!(local_address, local_audio_port, audio_sections, "rewrote sdp for media proxy");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    const OFFER: &str = "v=0\r\n\
o=alice 1 1 IN IP4 203.0.113.5\r\n\
s=-\r\n\
c=IN IP4 203.0.113.5\r\n\
t=0 0\r\n\
m=audio 49170 RTP/AVP 0\r\n\
a=rtpmap:0 PCMU/8000\r\n\
m=video 51000 RTP/AVP 96\r\n\
c=IN IP4 203.0.113.5\r\n\
a=rtpmap:96 H264/90000\r\n";

    #[test]
    fn rewrites_origin_session_connection_and_audio_port_only() {
        let sdp = parse(OFFER).unwrap();
        let rewritten = rewrite_for_proxy(&sdp, "198.51.100.9", 40000);

        assert_eq!(rewritten.origin.as_ref().unwrap().unicast_address, "198.51.100.9");
        assert_eq!(rewritten.connection.as_ref().unwrap().address, "198.51.100.9");
        assert_eq!(rewritten.media[0].port, 40000);

        // Non-audio section is untouched.
        assert_eq!(rewritten.media[1].port, 51000);
        assert_eq!(rewritten.media[1].connection.as_ref().unwrap().address, "203.0.113.5");
    }

    #[test]
    fn ipv6_address_sets_addrtype_ip6() {
        let sdp = parse(OFFER).unwrap();
        let rewritten = rewrite_for_proxy(&sdp, "2001:db8::1", 40000);
        assert_eq!(rewritten.origin.as_ref().unwrap().addrtype, AddrType::Ip6);
        assert_eq!(rewritten.connection.as_ref().unwrap().addrtype, AddrType::Ip6);
    }

    #[test]
    fn rewrite_is_idempotent() {
        let sdp = parse(OFFER).unwrap();
        let once = rewrite_for_proxy(&sdp, "198.51.100.9", 40000);
        let twice = rewrite_for_proxy(&once, "198.51.100.9", 40000);
        assert_eq!(once, twice);
    }
}
