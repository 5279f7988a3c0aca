//! CodeSync wire protocol
//!
//! JSON messages tagged by a kebab-case `type` field, with camelCase fields.
//!
//! ```text
//! {"type":"join-room","roomId":"abc123","user":{"name":"Ada","color":"#f80"}}
//! {"type":"sync-update","roomId":"abc123","update":[1,2]}
//! {"type":"error","code":"INVALID_ROOM","message":"..."}
//! ```

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode_client, decode_server, encode, encode_line, FrameDecoder, MAX_FRAME_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{ClientMessage, ServerMessage};
