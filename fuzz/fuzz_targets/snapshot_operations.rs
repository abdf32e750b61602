#![no_main]

use std::sync::Arc;

use libfuzzer_sys::fuzz_target;
use rucksnap::{DB, DBOptions, ManualClock, MemoryStore, ReadOptions, SnapshotOptions};

// Fuzz target for the snapshot lifecycle.
// Interleaves writes, block snapshots, held readers, clock jumps, sweeps
// and reopens, and checks that reads through a snapshot either see the
// state at its epoch or are rejected as closed.
fuzz_target!(|data: &[u8]| {
    let clock = Arc::new(ManualClock::new(0));
    let options = DBOptions {
        reopen_period_ms: None,
        snapshot: SnapshotOptions {
            retiring_lifetime_ms: 1_000,
            force_close_timeout_ms: 0,
            force_close_poll_interval_ms: 1,
        },
    };
    let db = match DB::open_with_clock(MemoryStore::new(), options, clock.clone()) {
        Ok(db) => db,
        Err(_) => return,
    };

    let mut epoch = 0u64;
    let mut held = Vec::new();

    for chunk in data.chunks(2) {
        let op = chunk[0] % 7;
        let arg = chunk.get(1).copied().unwrap_or(0);

        match op {
            0 => {
                epoch += 1;
                let _ = db.put("epoch", epoch.to_string());
                let _ = db.put(vec![arg], vec![arg; arg as usize % 16]);
                let _ = db.create_block_snapshot(epoch);
            }
            1 => {
                if let Some(snapshot) = db.last_snapshot() {
                    held.push(snapshot);
                }
            }
            2 => {
                if !held.is_empty() {
                    held.remove(arg as usize % held.len());
                }
            }
            3 => {
                clock.advance(arg as u64 * 10);
            }
            4 => {
                let _ = db.garbage_collect_snapshots();
            }
            5 => {
                let _ = db.reopen();
            }
            _ => {
                for snapshot in &held {
                    match db.get_at(snapshot, b"epoch") {
                        Ok(value) => {
                            let expected = snapshot.epoch_id().to_string();
                            assert_eq!(value.as_deref(), Some(expected.as_bytes()));
                        }
                        Err(e) => assert!(e.is_snapshot_closed(), "unexpected error: {e}"),
                    }
                }
                let _ = db.get(&ReadOptions::default(), &[arg]);
            }
        }
    }

    db.close();
    for snapshot in &held {
        assert!(snapshot.is_closed());
    }
});
