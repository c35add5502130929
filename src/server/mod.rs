//! Collaboration server: sessions, hub, wire protocol and WebSocket edge.

mod hub;
mod message;
mod net;
mod participant;
mod session;

pub use hub::Hub;
pub use message::{ClientMessage, ParticipantInfo, ServerMessage};
pub use net::{run_listener, serve};
pub use participant::{Participant, OUTBOUND_QUEUE};
pub use session::{OpSubmission, Session, SessionHandle};
