//! Wire codec (`spec.md` §4.6, §6.1): bit-exact little-endian frames over an
//! unreliable framed transport. Encoding uses `byteorder`'s `LittleEndian`
//! extension traits rather than hand-rolled shifts, the same way the
//! teacher's `services/net` and `tools` crates pull in `byteorder` for their
//! own packed wire structs.

use crate::api::ResultCode;
use byteorder::{ByteOrder, LittleEndian};

pub const CMD_DIRTY_DBS: u8 = 0x06;
pub const CMD_START_SYNC: u8 = 0x07;
pub const CMD_WRITE: u8 = 0x08;
pub const CMD_WRITEBACK: u8 = 0x09;
pub const CMD_SYNC_DONE: u8 = 0x0A;
pub const RESP_DIRTY_DBS: u8 = 0x86;
pub const RESP_START_SYNC: u8 = 0x87;
pub const RESP_WRITE: u8 = 0x88;
pub const RESP_WRITEBACK: u8 = 0x89;
pub const RESP_SYNC_DONE: u8 = 0x8A;

/// One outbound `WRITE`/`WRITEBACK` payload: a single dirty record plus its
/// sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFrame {
    pub db_id: u8,
    pub last_updated: u32,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Frames this device sends to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Write { token: u16, record: RecordFrame },
    Writeback { token: u16, record: RecordFrame },
    SyncDone { token: u16, db_id: u8 },
    DirtyDbsResponse { token: u16, result: ResultCode, ids: Vec<u8> },
    StartSyncResponse { token: u16, result: ResultCode },
    WriteResponseEcho { token: u16, result: ResultCode },
    WritebackResponseEcho { token: u16, result: ResultCode },
    SyncDoneResponseEcho { token: u16, result: ResultCode },
    /// Reply to a command byte this device doesn't recognize -- `spec.md`
    /// §4.6: "an unknown command is answered with `InvalidOperation`".
    UnknownCommandResponse { token: u16, cmd: u8, result: ResultCode },
}

/// Frames this device receives from the peer and must dispatch
/// (`spec.md` §4.6's "Inbound commands" table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    DirtyDbs { token: u16 },
    StartSync { token: u16, db_id: u8 },
    WriteResponse { token: u16, result: u8 },
    WritebackResponse { token: u16, result: u8 },
    SyncDoneResponse { token: u16, result: u8 },
}

fn push_record(buf: &mut Vec<u8>, r: &RecordFrame) {
    buf.push(r.db_id);
    let mut tmp = [0u8; 4];
    LittleEndian::write_u32(&mut tmp, r.last_updated);
    buf.extend_from_slice(&tmp);
    buf.push(r.key.len() as u8);
    buf.extend_from_slice(&r.key);
    let mut len_buf = [0u8; 2];
    LittleEndian::write_u16(&mut len_buf, r.value.len() as u16);
    buf.extend_from_slice(&len_buf);
    buf.extend_from_slice(&r.value);
}

fn read_record(bytes: &[u8]) -> Option<RecordFrame> {
    if bytes.len() < 1 + 4 + 1 {
        return None;
    }
    let db_id = bytes[0];
    let last_updated = LittleEndian::read_u32(&bytes[1..5]);
    let key_len = bytes[5] as usize;
    let mut p = 6usize;
    if p + key_len + 2 > bytes.len() {
        return None;
    }
    let key = bytes[p..p + key_len].to_vec();
    p += key_len;
    let val_len = LittleEndian::read_u16(&bytes[p..p + 2]) as usize;
    p += 2;
    if p + val_len > bytes.len() {
        return None;
    }
    let value = bytes[p..p + val_len].to_vec();
    Some(RecordFrame { db_id, last_updated, key, value })
}

/// Encodes one outbound frame as `command | token(u16le) | payload`.
pub fn encode(frame: &OutboundFrame) -> Vec<u8> {
    let mut buf = Vec::new();
    let (cmd, token) = match frame {
        OutboundFrame::Write { token, .. } => (CMD_WRITE, *token),
        OutboundFrame::Writeback { token, .. } => (CMD_WRITEBACK, *token),
        OutboundFrame::SyncDone { token, .. } => (CMD_SYNC_DONE, *token),
        OutboundFrame::DirtyDbsResponse { token, .. } => (RESP_DIRTY_DBS, *token),
        OutboundFrame::StartSyncResponse { token, .. } => (RESP_START_SYNC, *token),
        OutboundFrame::WriteResponseEcho { token, .. } => (RESP_WRITE, *token),
        OutboundFrame::WritebackResponseEcho { token, .. } => (RESP_WRITEBACK, *token),
        OutboundFrame::SyncDoneResponseEcho { token, .. } => (RESP_SYNC_DONE, *token),
        OutboundFrame::UnknownCommandResponse { token, cmd, .. } => (cmd | 0x80, *token),
    };
    buf.push(cmd);
    let mut tok_buf = [0u8; 2];
    LittleEndian::write_u16(&mut tok_buf, token);
    buf.extend_from_slice(&tok_buf);
    match frame {
        OutboundFrame::Write { record, .. } | OutboundFrame::Writeback { record, .. } => push_record(&mut buf, record),
        OutboundFrame::SyncDone { db_id, .. } => buf.push(*db_id),
        OutboundFrame::DirtyDbsResponse { result, ids, .. } => {
            buf.push(result.as_u8());
            buf.push(ids.len() as u8);
            buf.extend_from_slice(ids);
        }
        OutboundFrame::StartSyncResponse { result, .. }
        | OutboundFrame::WriteResponseEcho { result, .. }
        | OutboundFrame::WritebackResponseEcho { result, .. }
        | OutboundFrame::SyncDoneResponseEcho { result, .. }
        | OutboundFrame::UnknownCommandResponse { result, .. } => buf.push(result.as_u8()),
    }
    buf
}

/// Decodes a `WRITE`/`WRITEBACK` frame's token and record, used by the
/// peer-side test harness and by the wire round-trip property (`spec.md` §8).
pub fn decode_write(bytes: &[u8]) -> Option<(u16, RecordFrame)> {
    if bytes.len() < 3 || (bytes[0] != CMD_WRITE && bytes[0] != CMD_WRITEBACK) {
        return None;
    }
    let token = LittleEndian::read_u16(&bytes[1..3]);
    let record = read_record(&bytes[3..])?;
    Some((token, record))
}

/// What to do with one inbound frame, per `spec.md` §4.6: a frame shorter
/// than its command's minimum is dropped without reply; an unrecognized
/// command byte still gets an `InvalidOperation` reply, since its token is
/// readable even though its payload shape isn't known.
pub enum InboundDecode {
    Frame(InboundFrame),
    TooShort,
    UnknownCommand { token: u16, cmd: u8 },
}

/// Classifies a raw frame for the dispatcher, distinguishing "too short to
/// even have a token" / "known command, but short of its own minimum" (both
/// silently dropped) from "unrecognized command byte" (replied to).
pub fn classify_inbound(bytes: &[u8]) -> InboundDecode {
    if bytes.len() < 3 {
        return InboundDecode::TooShort;
    }
    let cmd = bytes[0];
    let token = LittleEndian::read_u16(&bytes[1..3]);
    match decode_inbound(bytes) {
        Some(frame) => InboundDecode::Frame(frame),
        None => match cmd {
            CMD_DIRTY_DBS | CMD_START_SYNC | RESP_WRITE | RESP_WRITEBACK | RESP_SYNC_DONE => InboundDecode::TooShort,
            _ => InboundDecode::UnknownCommand { token, cmd },
        },
    }
}

/// Decodes one inbound frame. Returns `None` if the frame is shorter than
/// its command's minimum length or the command is unrecognized -- both
/// cases are dropped without reply per `spec.md` §4.6.
pub fn decode_inbound(bytes: &[u8]) -> Option<InboundFrame> {
    if bytes.len() < 3 {
        return None;
    }
    let cmd = bytes[0];
    let token = LittleEndian::read_u16(&bytes[1..3]);
    match cmd {
        CMD_DIRTY_DBS => Some(InboundFrame::DirtyDbs { token }),
        CMD_START_SYNC => {
            if bytes.len() < 4 {
                None
            } else {
                Some(InboundFrame::StartSync { token, db_id: bytes[3] })
            }
        }
        RESP_WRITE => {
            if bytes.len() < 4 {
                None
            } else {
                Some(InboundFrame::WriteResponse { token, result: bytes[3] })
            }
        }
        RESP_WRITEBACK => {
            if bytes.len() < 4 {
                None
            } else {
                Some(InboundFrame::WritebackResponse { token, result: bytes[3] })
            }
        }
        RESP_SYNC_DONE => {
            if bytes.len() < 4 {
                None
            } else {
                Some(InboundFrame::SyncDoneResponse { token, result: bytes[3] })
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_frame_round_trips() {
        let record = RecordFrame { db_id: 1, last_updated: 12345, key: vec![1, 2, 3], value: vec![9, 9] };
        let frame = OutboundFrame::Write { token: 7, record: record.clone() };
        let bytes = encode(&frame);
        let (token, decoded) = decode_write(&bytes).unwrap();
        assert_eq!(token, 7);
        assert_eq!(decoded, record);
    }

    #[test]
    fn short_frame_is_dropped() {
        assert!(decode_inbound(&[CMD_START_SYNC, 0, 0]).is_none());
    }

    #[test]
    fn unknown_command_is_dropped() {
        assert!(decode_inbound(&[0xFF, 0, 0, 0]).is_none());
    }

    #[test]
    fn classify_distinguishes_short_from_unknown() {
        assert!(matches!(classify_inbound(&[CMD_START_SYNC, 0, 0]), InboundDecode::TooShort));
        assert!(matches!(classify_inbound(&[0xFF, 5, 0, 0]), InboundDecode::UnknownCommand { token: 5, cmd: 0xFF }));
    }

    #[test]
    fn unknown_command_response_echoes_cmd_with_high_bit_set() {
        let frame = OutboundFrame::UnknownCommandResponse { token: 2, cmd: 0xFF, result: ResultCode::InvalidOp };
        let bytes = encode(&frame);
        assert_eq!(bytes, vec![0xFF | 0x80, 2, 0, ResultCode::InvalidOp.as_u8()]);
    }

    #[test]
    fn dirty_dbs_response_carries_ids() {
        let frame = OutboundFrame::DirtyDbsResponse { token: 1, result: ResultCode::Success, ids: vec![1, 3] };
        let bytes = encode(&frame);
        assert_eq!(bytes, vec![RESP_DIRTY_DBS, 1, 0, ResultCode::Success.as_u8(), 2, 1, 3]);
    }
}
