//! Diagnostic harness: exercises an insert → sync → ack round trip against
//! an in-process `BlobDb` and logs each step. Grounded on the teacher's
//! own small standalone diagnostic binaries (`apps/vault/tools/vaultbackup-rs`,
//! `tools/`) which likewise wire up `env_logger` and drive library code
//! directly rather than through the full firmware boot sequence.

use blobdb::api::DbId;
use blobdb::event::event_channel;
use blobdb::facade::BlobDb;
use blobdb::namespaces::PlainKvDb;
use blobdb::sync::{SyncEngine, Transport};
use blobdb::wire::decode_write;
use log::info;

struct LoggingTransport;
impl Transport for LoggingTransport {
    fn send(&mut self, frame: Vec<u8>) -> bool {
        if let Some((token, record)) = decode_write(&frame) {
            info!("-> writeback token={} db={} key={:02x?}", token, record.db_id, record.key);
        } else {
            info!("-> frame ({} bytes)", frame.len());
        }
        true
    }
}

fn main() {
    env_logger::init();

    let (events, _rx) = event_channel();
    let backend = PlainKvDb::new("harness-test", 64 * 1024, true).expect("open test namespace");
    let db = BlobDb::new(vec![(DbId::Test, Box::new(backend))], events);
    db.init_all().expect("init namespaces");

    info!("inserting a record into the test namespace");
    db.blob_db_insert(DbId::Test, b"demo-key", b"demo-value").expect("insert");

    let mut engine = SyncEngine::new(&db, Box::new(LoggingTransport));
    engine.set_accepting(true); // boot sequence has finished by this point
    let now = 0;
    match engine.sync_db(DbId::Test, now).expect("sync_db") {
        blobdb::sync::SyncOutcome::Started => info!("sync started"),
        blobdb::sync::SyncOutcome::NoActionRequired => info!("nothing dirty"),
    }

    info!("dirty list after sync start: {:?}", db.blob_db_get_dirty_list(DbId::Test).unwrap().len());
}
