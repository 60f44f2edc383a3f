use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use crate::config::LrcpConfig;

pub mod tracking_sender;

pub use tracking_sender::TrackingPeerSender;

/// convenience method for unit test code: create a [SocketAddr] based on a number, the same
///  number generating the same address and different numbers different addresses
pub fn test_peer_addr_from_number(number: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, number))
}

pub fn test_config() -> LrcpConfig {
    LrcpConfig::new(test_peer_addr_from_number(LrcpConfig::DEFAULT_PORT))
}

/// Gives spawned tasks the opportunity to process everything that is ready. With paused time,
///  this advances the clock by a millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
