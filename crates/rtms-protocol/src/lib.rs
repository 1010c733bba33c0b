// rtms-protocol: wire types, signatures, and the vendor error taxonomy for
// the RTMS ingestion service.
//
// All signaling and media frames are JSON objects tagged by an integer
// `msg_type` field.  Outbound frames are plain `Serialize` structs carrying
// their tag; inbound frames decode through `wire::parse_server_frame`, which
// dispatches on the tag and tolerates unknown kinds.

pub mod error;
pub mod media;
pub mod signature;
pub mod wire;

pub use error::{ErrorCategory, RtmsError, category_for_status};
pub use media::{AudioSampleRate, MediaKind, MediaMask, MediaParams, effective_mask};
pub use signature::{sign_handshake, validate_url_token, verify_webhook_signature};
pub use wire::{
    HandshakeAck, KeepAlive, MediaContent, MediaHandshakeAck, ServerFrame, ServerUrls,
    SignalingEvent, WireError, parse_server_frame,
};
