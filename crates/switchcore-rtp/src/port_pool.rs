//! RTP/RTCP port-pair allocator.
//!
//! Allocates contiguous UDP port pairs (even = RTP, odd = RTCP) from a
//! configured range, per RFC 3550's even/odd convention. A rotating cursor
//! spreads bindings across the range so that a port still held by lingering
//! STUN/probe traffic from a prior call ages out of rotation instead of being
//! retried immediately.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// An allocated, owned RTP/RTCP port pair. `rtp` is always even, `rtcp = rtp + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortPair {
    pub rtp: u16,
    pub rtcp: u16,
}

/// The two bound UDP sockets backing a `PortPair`.
///
/// Owned by whichever caller allocated it (a `Session` leg or a
/// `MixerParticipant`); `release()` is idempotent and is also attempted on
/// `Drop` via the owning `PortPool`'s allocation-set bookkeeping, but callers
/// should always call `PortPool::release` explicitly so the pair can be
/// reused promptly.
#[derive(Debug)]
pub struct SocketPair {
    pub ports: PortPair,
    pub rtp_conn: UdpSocket,
    pub rtcp_conn: UdpSocket,
}

struct PoolState {
    allocated: HashSet<u16>,
    cursor: u16,
}

/// Allocates and tracks RTP/RTCP port pairs bound on the unspecified IPv4
/// address. IPv6/dual-stack policy is left to the caller (see DESIGN.md Open
/// Question carried from spec §9): this pool binds `0.0.0.0` only.
pub struct PortPool {
    min: u16,
    max: u16,
    state: Mutex<PoolState>,
}

impl PortPool {
    /// `min` must be even and `min < max`.
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min % 2 != 0 || min >= max {
            return Err(Error::InvalidRange { min, max });
        }
        Ok(Self {
            min,
            max,
            state: Mutex::new(PoolState {
                allocated: HashSet::new(),
                cursor: min,
            }),
        })
    }

    /// Capacity of the pool: the number of distinct even/odd pairs it can hand out.
    pub fn capacity(&self) -> usize {
        ((self.max - self.min + 1) / 2) as usize
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().unwrap().allocated.len() / 2
    }

    /// Scan from the rotating cursor for an unallocated even port, try to
    /// bind both legs, and return the bound pair. Advances past ports held
    /// by a foreign process (bind failure) without treating that as fatal
    /// until the whole range has been tried once.
    pub async fn allocate(&self) -> Result<SocketPair> {
        let candidates = self.capacity();
        let mut start_cursor = {
            let st = self.state.lock().unwrap();
            st.cursor
        };

        for _ in 0..candidates {
            let rtp_port = start_cursor;

            let next_cursor = if rtp_port as u32 + 2 > self.max as u32 {
                self.min
            } else {
                rtp_port + 2
            };
            start_cursor = next_cursor;

            // rtcp = rtp + 1 must still land inside the configured range; an
            // even rtp_port of exactly self.max would hand out rtcp = max + 1.
            if rtp_port as u32 + 1 > self.max as u32 {
                continue;
            }
            let rtcp_port = rtp_port + 1;

            let already_taken = {
                let st = self.state.lock().unwrap();
                st.allocated.contains(&rtp_port)
            };

            if already_taken {
                continue;
            }

            match self.try_bind_pair(rtp_port, rtcp_port).await {
                Some(pair) => {
                    let mut st = self.state.lock().unwrap();
                    st.allocated.insert(rtp_port);
                    st.allocated.insert(rtcp_port);
                    st.cursor = next_cursor;
                    debug!(rtp = rtp_port, rtcp = rtcp_port, "allocated rtp/rtcp port pair");
                    return Ok(pair);
                }
                None => continue,
            }
        }

        Err(Error::PortsExhausted {
            min: self.min,
            max: self.max,
        })
    }

    async fn try_bind_pair(&self, rtp_port: u16, rtcp_port: u16) -> Option<SocketPair> {
        let bind_addr = |port: u16| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

        let rtp_conn = match UdpSocket::bind(bind_addr(rtp_port)).await {
            Ok(s) => s,
            Err(_) => return None,
        };
        let rtcp_conn = match UdpSocket::bind(bind_addr(rtcp_port)).await {
            Ok(s) => s,
            Err(e) => {
                warn!(port = rtcp_port, error = %e, "rtcp bind failed, port may be held by another process");
                drop(rtp_conn);
                return None;
            }
        };

        Some(SocketPair {
            ports: PortPair {
                rtp: rtp_port,
                rtcp: rtcp_port,
            },
            rtp_conn,
            rtcp_conn,
        })
    }

    /// Release a previously allocated pair. Idempotent: releasing a pair
    /// that is not currently tracked is a no-op.
    pub fn release(&self, pair: PortPair) {
        let mut st = self.state.lock().unwrap();
        st.allocated.remove(&pair.rtp);
        st.allocated.remove(&pair.rtcp);
        debug!(rtp = pair.rtp, rtcp = pair.rtcp, "released rtp/rtcp port pair");
    }
}
