//! Line-oriented SDP parser. Accepts CRLF or bare LF line endings.

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::types::{AddrType, Codec, Connection, Direction, MediaDescription, Origin, SessionDescription};

fn split_lines(input: &str) -> Vec<&str> {
    input
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .filter(|l| !l.is_empty())
        .collect()
}

fn split_kv(line: &str, line_no: usize) -> Result<(char, &str)> {
    let mut chars = line.chars();
    let kind = chars.next().ok_or(Error::MalformedLine {
        line_no,
        line: line.to_string(),
    })?;
    let rest = &line[1..];
    let value = rest.strip_prefix('=').ok_or(Error::MalformedLine {
        line_no,
        line: line.to_string(),
    })?;
    Ok((kind, value))
}

fn parse_connection(value: &str, line_no: usize) -> Result<Connection> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 3 {
        return Err(Error::MissingField {
            line_no,
            line: format!("c={value}"),
        });
    }
    let addrtype = AddrType::parse(parts[1]).ok_or(Error::MalformedLine {
        line_no,
        line: format!("c={value}"),
    })?;
    Ok(Connection {
        nettype: parts[0].to_string(),
        addrtype,
        address: parts[2].to_string(),
    })
}

fn parse_origin(value: &str, line_no: usize) -> Result<Origin> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() != 6 {
        return Err(Error::MissingField {
            line_no,
            line: format!("o={value}"),
        });
    }
    let addrtype = AddrType::parse(parts[4]).ok_or(Error::MalformedLine {
        line_no,
        line: format!("o={value}"),
    })?;
    Ok(Origin {
        username: parts[0].to_string(),
        sess_id: parts[1].to_string(),
        sess_version: parts[2].to_string(),
        nettype: parts[3].to_string(),
        addrtype,
        unicast_address: parts[5].to_string(),
    })
}

fn parse_media_line(value: &str, line_no: usize) -> Result<MediaDescription> {
    let parts: Vec<&str> = value.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(Error::MissingField {
            line_no,
            line: format!("m={value}"),
        });
    }
    let media_type = parts[0].to_string();
    let (port, num_ports) = match parts[1].split_once('/') {
        Some((p, n)) => (
            p.parse().map_err(|_| Error::InvalidNumber {
                line_no,
                line: format!("m={value}"),
            })?,
            Some(n.parse().map_err(|_| Error::InvalidNumber {
                line_no,
                line: format!("m={value}"),
            })?),
        ),
        None => (
            parts[1].parse().map_err(|_| Error::InvalidNumber {
                line_no,
                line: format!("m={value}"),
            })?,
            None,
        ),
    };
    let proto = parts[2].to_string();
    let formats = parts[3..].iter().map(|s| s.to_string()).collect();
    Ok(MediaDescription {
        media_type,
        port,
        num_ports,
        proto,
        formats,
        connection: None,
        direction: None,
        codecs: Vec::new(),
        other_attributes: Vec::new(),
    })
}

/// Attach an `a=rtpmap:<pt> <name>/<rate>[/<channels>]` line to `media`,
/// seeding a new codec record or filling in a placeholder left by an
/// earlier `fmtp` line for the same payload type (attributes may arrive in
/// either order).
fn apply_rtpmap(media: &mut MediaDescription, value: &str, line_no: usize) -> Result<()> {
    let (pt_str, encoding) = value.split_once(' ').ok_or(Error::MalformedLine {
        line_no,
        line: format!("a=rtpmap:{value}"),
    })?;
    let payload_type: u8 = pt_str.trim().parse().map_err(|_| Error::InvalidNumber {
        line_no,
        line: format!("a=rtpmap:{value}"),
    })?;
    let mut fields = encoding.splitn(3, '/');
    let name = fields.next().unwrap_or_default().to_string();
    let clock_rate: u32 = fields
        .next()
        .unwrap_or("0")
        .parse()
        .map_err(|_| Error::InvalidNumber {
            line_no,
            line: format!("a=rtpmap:{value}"),
        })?;
    let channels = fields.next().and_then(|c| c.parse().ok());

    if let Some(existing) = media.codecs.iter_mut().find(|c| c.payload_type == payload_type) {
        existing.name = name;
        existing.clock_rate = clock_rate;
        existing.channels = channels;
    } else {
        media.codecs.push(Codec {
            payload_type,
            name,
            clock_rate,
            channels,
            fmtp: None,
        });
    }
    Ok(())
}

/// Attach an `a=fmtp:<pt> <params>` line, same either-order seeding rule as `rtpmap`.
fn apply_fmtp(media: &mut MediaDescription, value: &str, line_no: usize) -> Result<()> {
    let (pt_str, params) = value.split_once(' ').ok_or(Error::MalformedLine {
        line_no,
        line: format!("a=fmtp:{value}"),
    })?;
    let payload_type: u8 = pt_str.trim().parse().map_err(|_| Error::InvalidNumber {
        line_no,
        line: format!("a=fmtp:{value}"),
    })?;

    if let Some(existing) = media.codecs.iter_mut().find(|c| c.payload_type == payload_type) {
        existing.fmtp = Some(params.to_string());
    } else {
        media.codecs.push(Codec {
            payload_type,
            name: String::new(),
            clock_rate: 0,
            channels: None,
            fmtp: Some(params.to_string()),
        });
    }
    Ok(())
}

fn apply_media_attribute(media: &mut MediaDescription, value: &str, line_no: usize) -> Result<()> {
    if let Some(rest) = value.strip_prefix("rtpmap:") {
        apply_rtpmap(media, rest, line_no)
    } else if let Some(rest) = value.strip_prefix("fmtp:") {
        apply_fmtp(media, rest, line_no)
    } else if let Some(dir) = Direction::parse(value) {
        media.direction = Some(dir);
        Ok(())
    } else {
        media.other_attributes.push(value.to_string());
        Ok(())
    }
}

/// Parse an SDP message body into a `SessionDescription`.
pub fn parse(input: &str) -> Result<SessionDescription> {
    match parse_inner(input) {
        Ok(sdp) => {
            debug!(media_sections = sdp.media.len(), "parsed sdp");
            Ok(sdp)
        }
        Err(e) => {
            warn!(error = %e, "failed to parse sdp");
            Err(e)
        }
    }
}

fn parse_inner(input: &str) -> Result<SessionDescription> {
    let lines = split_lines(input);
    if lines.is_empty() {
        return Err(Error::Empty);
    }

    let mut sdp = SessionDescription {
        protocol_version: "0".to_string(),
        origin: None,
        session_name: None,
        connection: None,
        time: Vec::new(),
        session_attributes: Vec::new(),
        media: Vec::new(),
    };

    let mut current_media: Option<usize> = None;

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        let (kind, value) = split_kv(line, line_no)?;
        match kind {
            'v' => sdp.protocol_version = value.to_string(),
            'o' => sdp.origin = Some(parse_origin(value, line_no)?),
            's' => sdp.session_name = Some(value.to_string()),
            'c' => {
                let conn = parse_connection(value, line_no)?;
                match current_media {
                    Some(i) => sdp.media[i].connection = Some(conn),
                    None => sdp.connection = Some(conn),
                }
            }
            't' => {
                let parts: Vec<&str> = value.split_whitespace().collect();
                if parts.len() != 2 {
                    return Err(Error::MissingField {
                        line_no,
                        line: line.to_string(),
                    });
                }
                sdp.time.push((parts[0].to_string(), parts[1].to_string()));
            }
            'm' => {
                sdp.media.push(parse_media_line(value, line_no)?);
                current_media = Some(sdp.media.len() - 1);
            }
            'a' => match current_media {
                Some(i) => apply_media_attribute(&mut sdp.media[i], value, line_no)?,
                None => sdp.session_attributes.push(value.to_string()),
            },
            // i=, u=, e=, p=, b=, z=, k=, r= and any other line type are not
            // part of the audio-proxying surface this crate cares about;
            // they are intentionally dropped rather than round-tripped,
            // matching the spec's "sufficient to extract audio media
            // attributes" scope.
            _ => {}
        }
    }

    Ok(sdp)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "v=0\r\n\
o=alice 2890844526 2890844526 IN IP4 10.0.0.1\r\n\
s=-\r\n\
c=IN IP4 10.0.0.1\r\n\
t=0 0\r\n\
m=audio 49170 RTP/AVP 0 101\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=fmtp:101 0-15\r\n\
a=sendrecv\r\n";

    #[test]
    fn parses_sample_offer() {
        let sdp = parse(SAMPLE).unwrap();
        assert_eq!(sdp.protocol_version, "0");
        assert_eq!(sdp.origin.as_ref().unwrap().unicast_address, "10.0.0.1");
        assert_eq!(sdp.session_name.as_deref(), Some("-"));
        assert_eq!(sdp.connection.as_ref().unwrap().address, "10.0.0.1");
        assert_eq!(sdp.media.len(), 1);
        let m = &sdp.media[0];
        assert_eq!(m.media_type, "audio");
        assert_eq!(m.port, 49170);
        assert_eq!(m.formats, vec!["0", "101"]);
        assert_eq!(m.codecs.len(), 2);
        assert_eq!(m.codec_by_payload_type(0).unwrap().name, "PCMU");
        let te = m.codec_by_payload_type(101).unwrap();
        assert_eq!(te.name, "telephone-event");
        assert_eq!(te.fmtp.as_deref(), Some("0-15"));
        assert_eq!(m.effective_direction(), Direction::SendRecv);
    }

    #[test]
    fn fmtp_before_rtpmap_still_merges() {
        let body = "v=0\r\no=a 1 1 IN IP4 1.1.1.1\r\ns=-\r\nt=0 0\r\nm=audio 1000 RTP/AVP 101\r\na=fmtp:101 0-15\r\na=rtpmap:101 telephone-event/8000\r\n";
        let sdp = parse(body).unwrap();
        let codec = sdp.media[0].codec_by_payload_type(101).unwrap();
        assert_eq!(codec.name, "telephone-event");
        assert_eq!(codec.fmtp.as_deref(), Some("0-15"));
    }

    #[test]
    fn accepts_bare_lf() {
        let body = "v=0\no=a 1 1 IN IP4 1.1.1.1\ns=-\nt=0 0\nm=audio 1000 RTP/AVP 0\n";
        assert!(parse(body).is_ok());
    }

    #[test]
    fn direction_default_is_sendrecv_when_absent() {
        let body = "v=0\no=a 1 1 IN IP4 1.1.1.1\ns=-\nt=0 0\nm=audio 1000 RTP/AVP 0\n";
        let sdp = parse(body).unwrap();
        assert_eq!(sdp.media[0].effective_direction(), Direction::SendRecv);
        assert!(sdp.media[0].direction.is_none());
    }

    #[test]
    fn non_audio_media_is_preserved() {
        let body = "v=0\r\no=a 1 1 IN IP4 1.1.1.1\r\ns=-\r\nt=0 0\r\nm=audio 1000 RTP/AVP 0\r\nm=video 2000 RTP/AVP 96\r\n";
        let sdp = parse(body).unwrap();
        assert_eq!(sdp.media.len(), 2);
        assert_eq!(sdp.media[1].media_type, "video");
    }
}
