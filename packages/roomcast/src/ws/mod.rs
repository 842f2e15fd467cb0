//! Per-room WebSocket chat
//!
//! One connection per client per room:
//! - The registry tracks who is connected where
//! - Broadcasts fan room events out to every live connection
//! - Sessions drive join, message dispatch and teardown

mod broadcast;
mod connection;
mod handler;
mod hub;
mod presence;
mod protocol;
mod registry;
mod session;

pub use broadcast::{BroadcastReport, Broadcaster, RoomSequencer};
pub use connection::{ConnectionHandle, SendFailure};
pub use handler::handle_room_ws;
pub use hub::ChatHub;
pub use presence::PresenceView;
pub use protocol::{
    ClientEvent, DEFAULT_HISTORY_LIMIT, PresenceAction, PresenceUser, ServerEvent,
};
pub use registry::ConnectionRegistry;
pub use session::{InboundFrame, JoinRequest, RoomSession, SessionOutcome, SessionState};
