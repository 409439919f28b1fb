//! Sync engine (`spec.md` §4.5): per-session state machine that walks a
//! dirty list, streams writeback/write frames to the peer, and tracks acks
//! by token. Per the REDESIGN FLAGS in `spec.md` §9 the session table is
//! owned directly by whoever drives the engine (no process-wide mutex --
//! the teacher's own `services/net`/`services/log-server` precedent for
//! task-local state reached through a channel, here simplified to a plain
//! owned `HashMap` since this crate has no task runtime of its own) and the
//! per-session dirty list is an owned `VecDeque` rather than a linked list.

use crate::api::{DbId, ResultCode};
use crate::error::{BlobDbError, BlobDbResult};
use crate::facade::BlobDb;
use crate::wire::{InboundDecode, InboundFrame, OutboundFrame, RecordFrame};
use std::collections::{HashMap, VecDeque};

const SYNC_TIMEOUT_SECS: i64 = 30;

/// Where a session's dirty list came from: a whole-database sync sweep, or
/// a single record pushed out of band (`spec.md` §4.5).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SessionType {
    Database,
    SingleRecord,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    WaitingForAck,
}

/// Outcome of kicking off a sync that didn't need a session at all.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NoActionRequired,
    Started,
}

/// Delivers frames to the peer. Implementations may fail silently on a full
/// send queue (`spec.md` §4.6) -- the return value only distinguishes that
/// case for tests; callers never retry synchronously.
pub trait Transport {
    fn send(&mut self, frame: Vec<u8>) -> bool;
}

struct Session {
    db: DbId,
    session_type: SessionType,
    state: SessionState,
    dirty_list: VecDeque<(u32, Vec<u8>)>,
    current_token: u16,
    deadline: i64,
}

/// Drives sync sessions against a `BlobDb` and a `Transport`. Not `Sync`
/// itself -- callers serialize access the same way the teacher serializes
/// access to its sync/comm task via its own event loop.
pub struct SyncEngine<'a> {
    db: &'a BlobDb,
    transport: Box<dyn Transport + 'a>,
    sessions: HashMap<u16, Session>,
    next_token: u16,
    /// The boot-sequencer's "accepting messages" gate (`spec.md` §4.6):
    /// starts closed and is flipped open once, never back -- a single
    /// writer, read on every inbound frame.
    accepting: bool,
}

impl<'a> SyncEngine<'a> {
    pub fn new(db: &'a BlobDb, transport: Box<dyn Transport + 'a>) -> Self {
        SyncEngine { db, transport, sessions: HashMap::new(), next_token: 1, accepting: false }
    }

    /// Flips the "accepting messages" gate. The boot sequencer calls this
    /// once initialization (`BlobDb::init_all`) completes.
    pub fn set_accepting(&mut self, accepting: bool) {
        self.accepting = accepting;
    }

    fn alloc_token(&mut self) -> u16 {
        let token = self.next_token;
        self.next_token = if self.next_token == u16::MAX { 1 } else { self.next_token + 1 };
        token
    }

    fn active_database_session(&self, db: DbId) -> bool {
        self.sessions.values().any(|s| s.db == db && s.session_type == SessionType::Database)
    }

    /// Starts (or no-ops) a whole-database sync. `spec.md` §4.5 step 1-3.
    pub fn sync_db(&mut self, db: DbId, now: i64) -> BlobDbResult<SyncOutcome> {
        let dirty = self.db.get_dirty_list(db)?;
        if dirty.is_empty() {
            self.send(OutboundFrame::SyncDone { token: self.alloc_token(), db_id: db.as_u8() });
            return Ok(SyncOutcome::NoActionRequired);
        }
        if self.active_database_session(db) {
            return Err(BlobDbError::Busy);
        }
        let token = self.alloc_token();
        let mut session = Session {
            db,
            session_type: SessionType::Database,
            state: SessionState::WaitingForAck,
            dirty_list: dirty.into_iter().map(|e| (e.last_updated, e.key)).collect(),
            current_token: token,
            deadline: now + SYNC_TIMEOUT_SECS,
        };
        self.send_head(&mut session);
        self.sessions.insert(token, session);
        Ok(SyncOutcome::Started)
    }

    /// Starts a single-record sync unless a database session for the same
    /// db is already running it (`spec.md` §4.5).
    pub fn sync_record(&mut self, db: DbId, key: &[u8], last_updated: u32, now: i64) -> BlobDbResult<SyncOutcome> {
        if self.active_database_session(db) {
            return Ok(SyncOutcome::NoActionRequired);
        }
        let token = self.alloc_token();
        let mut session = Session {
            db,
            session_type: SessionType::SingleRecord,
            state: SessionState::WaitingForAck,
            dirty_list: VecDeque::from(vec![(last_updated, key.to_vec())]),
            current_token: token,
            deadline: now + SYNC_TIMEOUT_SECS,
        };
        self.send_head(&mut session);
        self.sessions.insert(token, session);
        Ok(SyncOutcome::Started)
    }

    /// Sends the frame for the dirty list's head, skipping any key that was
    /// deleted mid-sync (`get_len == 0` per `spec.md` §4.5 "length zero").
    fn send_head(&mut self, session: &mut Session) {
        while let Some((last_updated, key)) = session.dirty_list.front().cloned() {
            let len = match self.db.get_len(session.db, &key) {
                Ok(0) | Err(BlobDbError::NotFound) => {
                    session.dirty_list.pop_front();
                    continue;
                }
                Ok(n) => n,
                Err(_) => {
                    session.dirty_list.pop_front();
                    continue;
                }
            };
            let mut value = vec![0u8; len];
            if self.db.read(session.db, &key, &mut value).is_err() {
                session.dirty_list.pop_front();
                continue;
            }
            let record = RecordFrame { db_id: session.db.as_u8(), last_updated, key, value };
            let frame = match session.session_type {
                SessionType::Database => OutboundFrame::Writeback { token: session.current_token, record },
                SessionType::SingleRecord => OutboundFrame::Write { token: session.current_token, record },
            };
            self.send(frame);
            return;
        }
    }

    fn send(&mut self, frame: OutboundFrame) {
        let _ = self.transport.send(crate::wire::encode(&frame));
    }

    /// Finishes a session whose dirty list just emptied: re-queries
    /// `get_dirty_list` once more per `spec.md` §4.5's completion step,
    /// since new mutations may have landed mid-sync.
    fn finish_if_empty(&mut self, token: u16) {
        let still_dirty = {
            let session = match self.sessions.get(&token) {
                Some(s) => s,
                None => return,
            };
            !self.db.get_dirty_list(session.db).map(|l| l.is_empty()).unwrap_or(true)
        };
        if still_dirty {
            // A fresh mutation landed during the sync; leave the session's
            // bookkeeping to the next `sync_db` call rather than restarting
            // it here.
            self.sessions.remove(&token);
            return;
        }
        if let Some(session) = self.sessions.remove(&token) {
            if session.session_type == SessionType::Database {
                self.send(OutboundFrame::SyncDone { token, db_id: session.db.as_u8() });
            }
        }
    }

    /// Handles an ack/nack for `token` (`spec.md` §4.5 "Ack handling").
    pub fn handle_response(&mut self, token: u16, result: crate::api::ResultCode, now: i64) {
        let success = result == crate::api::ResultCode::Success;
        if !success {
            log::debug!("sync session token={} canceled by peer, result={:?}", token, result);
            self.sessions.remove(&token);
            return;
        }
        let key = {
            let session = match self.sessions.get_mut(&token) {
                Some(s) => s,
                None => return,
            };
            session.dirty_list.pop_front().map(|(_, k)| k)
        };
        if let Some(key) = key {
            let db = self.sessions.get(&token).unwrap().db;
            let _ = self.db.mark_synced(db, &key);
        }
        let empty = self.sessions.get(&token).map(|s| s.dirty_list.is_empty()).unwrap_or(true);
        if empty {
            self.finish_if_empty(token);
        } else {
            let mut session = self.sessions.remove(&token).unwrap();
            session.deadline = now + SYNC_TIMEOUT_SECS;
            self.send_head(&mut session);
            self.sessions.insert(token, session);
        }
    }

    /// Drops any session whose 30-second deadline has passed
    /// (`spec.md` §4.5 "Timeout"). Driven by a caller-owned clock rather
    /// than a real sleep so tests can simulate elapsed time.
    pub fn tick(&mut self, now: i64) {
        let expired: Vec<u16> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state == SessionState::WaitingForAck && s.deadline < now)
            .map(|(&token, _)| token)
            .collect();
        for token in expired {
            log::debug!("sync session token={} timed out waiting for ack", token);
            self.sessions.remove(&token);
        }
    }

    /// Cancels a session by token, if still present. Idempotent.
    pub fn cancel(&mut self, token: u16) {
        if self.sessions.remove(&token).is_some() {
            log::debug!("sync session token={} canceled", token);
        }
    }

    /// Entry point for bytes arriving off the transport (`spec.md` §4.6
    /// "Inbound commands"). Decodes, gates on the accepting-messages
    /// switch, and routes to the matching operation; any reply is sent
    /// straight back out through the same transport.
    pub fn dispatch_inbound(&mut self, bytes: &[u8], now: i64) {
        match crate::wire::classify_inbound(bytes) {
            InboundDecode::TooShort => {
                log::debug!("dropping undersized inbound frame ({} bytes)", bytes.len());
            }
            InboundDecode::UnknownCommand { token, cmd } => {
                log::debug!("unknown inbound command 0x{:02x}, token={}", cmd, token);
                self.send(OutboundFrame::UnknownCommandResponse { token, cmd, result: ResultCode::InvalidOp });
            }
            InboundDecode::Frame(frame) => {
                if !self.accepting {
                    self.reply_not_ready(frame);
                } else {
                    self.route(frame, now);
                }
            }
        }
    }

    fn reply_not_ready(&mut self, frame: InboundFrame) {
        let reply = match frame {
            InboundFrame::DirtyDbs { token } => OutboundFrame::DirtyDbsResponse { token, result: ResultCode::TryLater, ids: Vec::new() },
            InboundFrame::StartSync { token, .. } => OutboundFrame::StartSyncResponse { token, result: ResultCode::TryLater },
            InboundFrame::WriteResponse { token, .. } => OutboundFrame::WriteResponseEcho { token, result: ResultCode::TryLater },
            InboundFrame::WritebackResponse { token, .. } => OutboundFrame::WritebackResponseEcho { token, result: ResultCode::TryLater },
            InboundFrame::SyncDoneResponse { token, .. } => OutboundFrame::SyncDoneResponseEcho { token, result: ResultCode::TryLater },
        };
        self.send(reply);
    }

    fn route(&mut self, frame: InboundFrame, now: i64) {
        match frame {
            InboundFrame::DirtyDbs { token } => {
                let ids = self.db.get_dirty_dbs().into_iter().map(DbId::as_u8).collect();
                self.send(OutboundFrame::DirtyDbsResponse { token, result: ResultCode::Success, ids });
            }
            InboundFrame::StartSync { token, db_id } => {
                let result = match DbId::from_u8(db_id) {
                    None => ResultCode::InvalidDbId,
                    Some(db) => match self.sync_db(db, now) {
                        Ok(_) => ResultCode::Success,
                        Err(BlobDbError::Busy) => ResultCode::TryLater,
                        Err(BlobDbError::InvalidDbId) => ResultCode::InvalidDbId,
                        Err(_) => ResultCode::GeneralFailure,
                    },
                };
                self.send(OutboundFrame::StartSyncResponse { token, result });
            }
            InboundFrame::WriteResponse { token, result } | InboundFrame::WritebackResponse { token, result } => {
                let code = ResultCode::from_u8(result).unwrap_or(ResultCode::GeneralFailure);
                self.handle_response(token, code, now);
            }
            InboundFrame::SyncDoneResponse { token, .. } => self.cancel(token),
        }
    }

    #[cfg(test)]
    fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
