//! SML (Smart Message Language) codec: TLV primitives (§4.5), the
//! message envelope and transmission framing (§6), the attention-code
//! table, and the `ObisTree` used by parameter-list bodies.

pub mod attention;
pub mod crc;
pub mod message;
pub mod tlv;
pub mod tree;

pub use attention::AttentionCode;
pub use message::{decode_transmission, encode_transmission, MessageBody, SmlMessage};
pub use tlv::Value;
pub use tree::ObisTree;
