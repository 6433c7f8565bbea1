//! Announce tokens: proof that the sender of an `announce_peer` recently
//! performed a `get_peers` from the same address.

use std::net::Ipv4Addr;
use std::time::Duration;

use sha1::{Digest, Sha1};

/// Length of an issued token (a full SHA-1 digest).
pub const TOKEN_LEN: usize = 20;

const SECRET_LEN: usize = 20;

/// How often the secret rotates. A token is accepted under the current or
/// the previous secret, so it stays valid for one to two intervals.
pub const ROTATE_SECRET_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Issues and validates announce tokens bound to the remote IP.
///
/// `token = SHA1(dotted_quad ‖ secret)` where `dotted_quad` is the textual
/// form of the address; the installed base of peers grew around that exact
/// preimage, so it is wire compatibility, not a choice.
pub struct TokenAuthority {
  current: [u8; SECRET_LEN],
  previous: [u8; SECRET_LEN],
}

impl TokenAuthority {
  pub fn new() -> Self {
    Self {
      current: rand::random(),
      previous: rand::random(),
    }
  }

  pub fn issue(&self, remote_ip: Ipv4Addr) -> Vec<u8> {
    Self::digest(remote_ip, &self.current)
  }

  pub fn verify(&self, token: &[u8], remote_ip: Ipv4Addr) -> bool {
    token == Self::digest(remote_ip, &self.current)
      || token == Self::digest(remote_ip, &self.previous)
  }

  pub fn rotate(&mut self) {
    self.previous = self.current;
    self.current = rand::random();
  }

  fn digest(remote_ip: Ipv4Addr, secret: &[u8; SECRET_LEN]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(remote_ip.to_string().as_bytes());
    hasher.update(secret);
    hasher.finalize().to_vec()
  }
}

impl Default for TokenAuthority {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use std::net::Ipv4Addr;

  use super::{TokenAuthority, TOKEN_LEN};

  #[test]
  fn positive_issue_then_verify() {
    let authority = TokenAuthority::new();
    let ip = Ipv4Addr::new(9, 9, 9, 9);

    let token = authority.issue(ip);

    assert_eq!(token.len(), TOKEN_LEN);
    assert!(authority.verify(&token, ip));
  }

  #[test]
  fn positive_verify_fails_for_other_ip() {
    let authority = TokenAuthority::new();

    let token = authority.issue(Ipv4Addr::new(9, 9, 9, 9));

    assert!(!authority.verify(&token, Ipv4Addr::new(9, 9, 9, 8)));
  }

  #[test]
  fn positive_token_survives_one_rotation() {
    let mut authority = TokenAuthority::new();
    let ip = Ipv4Addr::new(1, 2, 3, 4);

    let token = authority.issue(ip);
    authority.rotate();

    assert!(authority.verify(&token, ip));
  }

  #[test]
  fn positive_token_expires_after_two_rotations() {
    let mut authority = TokenAuthority::new();
    let ip = Ipv4Addr::new(1, 2, 3, 4);

    let token = authority.issue(ip);
    authority.rotate();
    authority.rotate();

    assert!(!authority.verify(&token, ip));
  }
}
