use std::{fmt, ops::BitXor};

use rand::RngCore;
use serde::{
  de::{Deserializer, Error as _},
  Deserialize, Serialize, Serializer,
};
use serde_bytes::{ByteBuf, Bytes};
use sha1::{Digest, Sha1};
use thiserror::Error;

pub const ID_LEN: usize = 20;

/// 160-bit identifier in the DHT keyspace.
///
/// Node ids are chosen at random from the same space as BitTorrent
/// infohashes, so a single type serves both.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_LEN]);

/// XOR of two ids, compared as a 160-bit big-endian unsigned integer.
///
/// Byte-lexicographic `Ord` on the underlying array is exactly that numeric
/// order, so `Distance` simply reuses `Id`.
pub type Distance = Id;

impl Id {
  /// Fresh uniformly random id.
  pub fn random() -> Self {
    let mut bytes = [0; ID_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    Self(bytes)
  }

  /// Id of the SHA-1 digest of `bytes`.
  pub fn sha1(bytes: &[u8]) -> Self {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    Self(hasher.finalize().into())
  }

  /// XOR distance between `self` and `other`.
  pub fn distance(&self, other: &Id) -> Distance {
    *self ^ *other
  }

  /// Number of leading zero bits. For a distance this is the length of the
  /// prefix the two original ids share.
  pub fn leading_zeros(&self) -> u32 {
    let mut zeros = 0;

    for byte in &self.0 {
      zeros += byte.leading_zeros();

      if *byte != 0 {
        break;
      }
    }

    zeros
  }

  pub fn is_zero(&self) -> bool {
    self.0 == [0; ID_LEN]
  }

  /// Raw bytes of the id.
  pub fn as_bytes(&self) -> &[u8; ID_LEN] {
    &self.0
  }
}

impl AsRef<[u8]> for Id {
  fn as_ref(&self) -> &[u8] {
    &self.0
  }
}

impl From<[u8; ID_LEN]> for Id {
  fn from(bytes: [u8; ID_LEN]) -> Self {
    Self(bytes)
  }
}

/// The input held something other than exactly [`ID_LEN`] bytes.
#[derive(Debug, Error)]
#[error("expected {ID_LEN} id bytes, got {0}")]
pub struct LengthError(pub usize);

impl TryFrom<&[u8]> for Id {
  type Error = LengthError;

  fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
    match <[u8; ID_LEN]>::try_from(slice) {
      Ok(bytes) => Ok(Self(bytes)),
      Err(_) => Err(LengthError(slice.len())),
    }
  }
}

impl BitXor for Id {
  type Output = Distance;

  fn bitxor(self, other: Self) -> Distance {
    Id(std::array::from_fn(|i| self.0[i] ^ other.0[i]))
  }
}

/// On the wire an id travels as a raw 20-byte bencode string.
impl Serialize for Id {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    Bytes::new(&self.0).serialize(s)
  }
}

impl<'de> Deserialize<'de> for Id {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let buf = ByteBuf::deserialize(d)?;

    Id::try_from(buf.as_ref()).map_err(|_| {
      D::Error::invalid_length(buf.len(), &"an id of exactly 20 bytes")
    })
  }
}

impl fmt::Debug for Id {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in self.0 {
      write!(f, "{:02x}", byte)?;
    }
    Ok(())
  }
}

/// BitTorrent `NodeId`.
pub type NodeId = Id;

/// BitTorrent `InfoHash`.
pub type InfoHash = Id;

/// Length of a `NodeId`.
pub const NODE_ID_LEN: usize = ID_LEN;

/// Length of a `InfoHash`.
pub const INFO_HASH_LEN: usize = ID_LEN;
