// Transport module: link seam, wire frames and the session channel

pub mod abstraction;
pub mod frame;
pub mod link;
pub mod local;
pub mod session;

pub use abstraction::{DeliveryMode, LinkEvent, PeerConnectionState, Payload, TransportError};
pub use frame::{
    decode_frame, encode_frame, DataBody, Frame, InvitationId, Invite, InviteReply,
    MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE,
};
pub use link::{Link, LinkEvents};
pub use local::{LocalLink, LocalMedium};
pub use session::{Capability, SendOutcome, TransportSession};
