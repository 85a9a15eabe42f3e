//! Discovery frame transport
//!
//! Raw Ethernet send/receive for frames carrying the PPPoE Discovery
//! EtherType. The driver only sees the [`Transport`] trait so tests
//! can substitute an in-process loopback.

mod af_packet;

pub use af_packet::AfPacketSocket;

use crate::Result;
use std::future::Future;

/// Raw Ethernet transport for discovery frames.
pub trait Transport: Send {
    /// Receive one frame into `buf`, returning the observed length.
    fn recv(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize>> + Send;

    /// Send one complete frame.
    fn send(&mut self, buf: &[u8]) -> impl Future<Output = Result<usize>> + Send;
}
