//! Well-known public DHT routers.
//!
//! Routers answer queries like any node but are never expected to add us
//! to a routing table; they exist to hand newcomers their first contacts.

pub const BITTORRENT_DHT: &str = "router.bittorrent.com:6881";
pub const TRANSMISSION_DHT: &str = "dht.transmissionbt.com:6881";
pub const UTORRENT_DHT: &str = "router.utorrent.com:6881";

/// Routers a freshly built node bootstraps against unless told otherwise.
pub const DEFAULT_ROUTERS: &[&str] =
  &[BITTORRENT_DHT, TRANSMISSION_DHT, UTORRENT_DHT];
