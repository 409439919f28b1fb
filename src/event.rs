//! Change-event bus. Per REDESIGN FLAGS (`spec.md` §9), events carry an
//! owned key buffer over a channel instead of a manually-freed heap pointer
//! the receiver has to remember to release.

use crate::api::DbId;

#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Insert { db: DbId, key: Vec<u8> },
    Delete { db: DbId, key: Vec<u8> },
    Flush { db: DbId },
    /// Raised by the Pins and AppGlance backends when a record references an
    /// app that is installed but not yet cached on the watch.
    AppFetchRequest { app_uuid: [u8; 16] },
}

pub type EventSender = std::sync::mpsc::Sender<ChangeEvent>;
pub type EventReceiver = std::sync::mpsc::Receiver<ChangeEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    std::sync::mpsc::channel()
}
