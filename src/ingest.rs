// Single-reader ingestion loop.
//
// One dedicated thread owns all reads from the stream. Bytes accumulate in a
// local buffer, complete frames are drained out of it, and each decoded frame
// is offered to the command correlator first; unclaimed frames go to the
// fan-out. Read errors force the link into `Lost` and the accumulator is
// discarded, since bytes from a previous session must never blend into the
// next one.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::fanout::{now_us, FrameEvent};
use crate::frame::extract_frames;
use crate::link::LinkShared;

const READ_CHUNK: usize = 256;

enum ReadOutcome {
    /// No handle to read from.
    NotOpen,
    /// Read timed out with no bytes; normal when the device is quiet.
    Idle,
    /// The stream reported end-of-file.
    Eof,
    Data(usize),
    Failed(std::io::Error),
}

fn read_once(shared: &LinkShared, chunk: &mut [u8]) -> ReadOutcome {
    let mut inner = shared.locked();
    let stream = match inner.stream.as_mut() {
        Some(s) => s,
        None => return ReadOutcome::NotOpen,
    };
    // The handle's own read timeout (the poll interval) bounds this hold of
    // the lock, so writers are not starved for long.
    match stream.read(chunk) {
        Ok(0) => ReadOutcome::Eof,
        Ok(n) => ReadOutcome::Data(n),
        Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
            ReadOutcome::Idle
        }
        Err(e) => ReadOutcome::Failed(e),
    }
}

pub(crate) fn spawn_ingest(shared: Arc<LinkShared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("lamplink-ingest".to_string())
        .spawn(move || {
            tlog!("[ingest] Ingestion loop started");
            let mut chunk = [0u8; READ_CHUNK];
            let mut acc: Vec<u8> = Vec::new();

            while !shared.is_shutdown() {
                match read_once(&shared, &mut chunk) {
                    ReadOutcome::NotOpen => {
                        acc.clear();
                        std::thread::sleep(shared.config.poll_interval());
                    }
                    ReadOutcome::Idle => {
                        // Lock released; give writers a window
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    ReadOutcome::Eof => {
                        shared.mark_lost("end of stream");
                        acc.clear();
                    }
                    ReadOutcome::Failed(e) => {
                        shared.mark_lost(&format!("read failed: {}", e));
                        acc.clear();
                    }
                    ReadOutcome::Data(n) => {
                        acc.extend_from_slice(&chunk[..n]);
                        dispatch(&shared, &mut acc);
                    }
                }
            }
            tlog!("[ingest] Ingestion loop stopped");
        })
        .expect("failed to spawn ingest thread")
}

/// Drain complete frames from the accumulator and route them.
pub(crate) fn dispatch(shared: &LinkShared, acc: &mut Vec<u8>) {
    let head: Vec<u8> = acc.iter().take(16).copied().collect();
    let (frames, dropped) = extract_frames(acc);
    if dropped > 0 {
        tlog!(
            "[ingest] Dropped {} unframeable bytes (buffer head: {})",
            dropped,
            hex::encode(&head)
        );
    }
    for frame in frames {
        let event = FrameEvent {
            frame,
            timestamp_us: now_us(),
        };
        // The correlator consumes a matching acknowledgment; everything else
        // fans out to consumers.
        if !shared.correlator.try_fulfill(&event) {
            shared.fanout.publish_event(event);
        }
    }
}
