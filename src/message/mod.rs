//! KRPC messages: bencoded dictionaries over UDP.
//!
//! The wire layout is delegated to serde: every message is a struct/enum
//! with the BEP-5 key names, and `serde_bencoded` takes care of the
//! encoding, including the lexicographic dictionary-key order remote
//! implementations expect.

mod error;
mod request;
mod response;

use serde::{Deserialize, Serialize};

pub use self::{
  error::{error_code, Error},
  request::{
    AnnouncePeerRequest, FindNodeRequest, GetPeersRequest, PingRequest,
    Request,
  },
  response::Response,
};

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct Message {
  #[serde(rename = "t", with = "serde_bytes")]
  pub transaction_id: Vec<u8>,
  #[serde(flatten)]
  pub body: MessageBody,
}

#[derive(Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "y")]
pub enum MessageBody {
  #[serde(rename = "q")]
  Request(Request),
  #[serde(rename = "r", with = "unflatten::response")]
  Response(Response),
  #[serde(rename = "e", with = "unflatten::error")]
  Error(Error),
}

impl Message {
  pub fn encode(&self) -> Result<Vec<u8>, serde_bencoded::SerError> {
    serde_bencoded::to_vec(self)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, serde_bencoded::DeError> {
    serde_bencoded::from_bytes(bytes)
  }
}

/// Permissive reparse of a datagram that failed the full `Message` decode.
///
/// Recovers just enough (`t`, `y`, `q`) to frame a protocol/method-unknown
/// error reply to a broken query. Anything this cannot parse is dropped.
#[derive(Debug, Deserialize)]
pub(crate) struct RawMessage {
  #[serde(rename = "t", with = "serde_bytes")]
  pub transaction_id: Vec<u8>,
  pub y: String,
  #[serde(default)]
  pub q: Option<String>,
}

impl RawMessage {
  pub fn decode(bytes: &[u8]) -> Option<Self> {
    serde_bencoded::from_bytes(bytes).ok()
  }
}

/// Helper to serialize/deserialize `Response`/`Error` nested under their
/// single wire key (`r`/`e`) while `y` stays at the top level.
mod unflatten {
  macro_rules! impl_unflatten {
    ($mod:ident, $field:literal) => {
      pub mod $mod {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};

        #[derive(Serialize, Deserialize)]
        struct Wrapper<T> {
          #[serde(rename = $field)]
          field: T,
        }

        pub(crate) fn serialize<T: Serialize, S: Serializer>(
          value: &T,
          s: S,
        ) -> Result<S::Ok, S::Error> {
          Wrapper { field: value }.serialize(s)
        }

        pub(crate) fn deserialize<
          'de,
          T: Deserialize<'de>,
          D: Deserializer<'de>,
        >(
          d: D,
        ) -> Result<T, D::Error> {
          let wrapper = Wrapper::deserialize(d)?;
          Ok(wrapper.field)
        }
      }
    };
  }

  impl_unflatten!(response, "r");
  impl_unflatten!(error, "e");
}
