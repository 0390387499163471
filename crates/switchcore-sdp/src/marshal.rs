//! Serialize a `SessionDescription` back to SDP text. Output always uses
//! CRLF line endings, per spec (the rewriter's output contract).

use tracing::debug;

use crate::types::{Codec, Connection, MediaDescription, Origin, SessionDescription};

fn push_line(out: &mut String, line: impl AsRef<str>) {
    out.push_str(line.as_ref());
    out.push_str("\r\n");
}

fn marshal_origin(o: &Origin) -> String {
    format!(
        "o={} {} {} {} {} {}",
        o.username, o.sess_id, o.sess_version, o.nettype, o.addrtype.as_str(), o.unicast_address
    )
}

fn marshal_connection(c: &Connection) -> String {
    format!("c={} {} {}", c.nettype, c.addrtype.as_str(), c.address)
}

fn marshal_codec(m: &mut String, c: &Codec) {
    let mut rtpmap = format!("a=rtpmap:{} {}/{}", c.payload_type, c.name, c.clock_rate);
    if let Some(channels) = c.channels {
        rtpmap.push('/');
        rtpmap.push_str(&channels.to_string());
    }
    push_line(m, rtpmap);
    if let Some(fmtp) = &c.fmtp {
        push_line(m, format!("a=fmtp:{} {}", c.payload_type, fmtp));
    }
}

fn marshal_media(out: &mut String, media: &MediaDescription) {
    let port_field = match media.num_ports {
        Some(n) => format!("{}/{}", media.port, n),
        None => media.port.to_string(),
    };
    let formats = media.formats.join(" ");
    push_line(
        out,
        format!("m={} {} {} {}", media.media_type, port_field, media.proto, formats),
    );
    if let Some(conn) = &media.connection {
        push_line(out, marshal_connection(conn));
    }
    for codec in &media.codecs {
        marshal_codec(out, codec);
    }
    if let Some(dir) = media.direction {
        push_line(out, format!("a={}", dir.as_str()));
    }
    for attr in &media.other_attributes {
        push_line(out, format!("a={attr}"));
    }
}

/// Render a `SessionDescription` as SDP text with CRLF line endings.
pub fn marshal(sdp: &SessionDescription) -> String {
    let mut out = String::new();
    push_line(&mut out, format!("v={}", sdp.protocol_version));
    if let Some(o) = &sdp.origin {
        push_line(&mut out, marshal_origin(o));
    }
    if let Some(name) = &sdp.session_name {
        push_line(&mut out, format!("s={name}"));
    }
    if let Some(conn) = &sdp.connection {
        push_line(&mut out, marshal_connection(conn));
    }
    for (start, stop) in &sdp.time {
        push_line(&mut out, format!("t={start} {stop}"));
    }
    for attr in &sdp.session_attributes {
        push_line(&mut out, format!("a={attr}"));
    }
    for media in &sdp.media {
        marshal_media(&mut out, media);
    }
    debug!(bytes = out.len(), media_sections = sdp.media.len(), "marshaled sdp");
    out
}
