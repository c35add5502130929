//! Connected participants and their outbound queues.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::message::{ParticipantInfo, ServerMessage};
use super::session::SessionHandle;

/// Outbound queue depth per participant. When the queue is full the message
/// is dropped; a stuck client re-syncs on its next successful round-trip.
pub const OUTBOUND_QUEUE: usize = 256;

const ADJECTIVES: &[&str] = &[
    "Red", "Blue", "Green", "Gold", "Silver", "Purple", "Orange", "Teal", "Coral", "Jade",
];
const ANIMALS: &[&str] = &[
    "Fox", "Owl", "Bear", "Wolf", "Hawk", "Deer", "Lynx", "Crow", "Dove", "Seal",
];
const COLORS: &[&str] = &[
    "#e74c3c", "#3498db", "#2ecc71", "#f39c12", "#9b59b6", "#1abc9c", "#e67e22", "#00bcd4",
    "#ff5722", "#8bc34a",
];

/// One connected editor: identity plus the queue its writer task drains.
///
/// Shared between the connection's reader task and the document session; at
/// most one session membership at a time.
pub struct Participant {
    id: Uuid,
    name: String,
    color: String,
    outbound: Mutex<Option<mpsc::Sender<ServerMessage>>>,
    session: Mutex<Option<SessionHandle>>,
}

impl Participant {
    /// New participant with a random identity. Returns the receiving end of
    /// the outbound queue for the connection's writer task.
    pub fn connect() -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let mut rng = rand::thread_rng();
        let name = format!(
            "{} {}",
            ADJECTIVES.choose(&mut rng).copied().unwrap_or("Plain"),
            ANIMALS.choose(&mut rng).copied().unwrap_or("Cat"),
        );
        let color = COLORS.choose(&mut rng).copied().unwrap_or("#888888");
        Self::with_identity(Uuid::new_v4(), name, color)
    }

    /// New participant with a fixed identity.
    pub fn with_identity(
        id: Uuid,
        name: impl Into<String>,
        color: impl Into<String>,
    ) -> (Arc<Self>, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        let participant = Arc::new(Participant {
            id,
            name: name.into(),
            color: color.into(),
            outbound: Mutex::new(Some(tx)),
            session: Mutex::new(None),
        });
        (participant, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn info(&self) -> ParticipantInfo {
        ParticipantInfo {
            id: self.id,
            name: self.name.clone(),
            color: self.color.clone(),
        }
    }

    /// Queue a message for delivery. Slow consumers lose messages silently.
    pub fn send(&self, msg: ServerMessage) {
        if let Some(tx) = lock(&self.outbound).as_ref() {
            if tx.try_send(msg).is_err() {
                log::debug!("participant {}: outbound queue full, dropping", self.id);
            }
        }
    }

    pub fn send_error(&self, message: impl Into<String>) {
        self.send(ServerMessage::Error {
            message: message.into(),
        });
    }

    /// Close the outbound queue; the writer task drains and exits.
    pub fn close_outbound(&self) {
        lock(&self.outbound).take();
    }

    /// Record the session this participant belongs to.
    pub(crate) fn attach_session(&self, handle: SessionHandle) {
        *lock(&self.session) = Some(handle);
    }

    pub(crate) fn detach_session(&self) -> Option<SessionHandle> {
        lock(&self.session).take()
    }

    /// Handle of the session this participant is currently joined to.
    pub fn session(&self) -> Option<SessionHandle> {
        lock(&self.session).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
