// ===============================
// src/recorder.rs
// ===============================
//
// JSONL recorder, one more hub subscriber:
// - Every analysis / signal event becomes one line in an append-only .jsonl file.
// - BufWriter to save syscalls; flushed every `flush_every` (1s from main.rs)
//   and every 1000 events.
// - Parent directory is created when missing.
// - A failed write reopens the file once; failing again marks the subscriber
//   failed so the hub drops it and the recorder ends.
//
// ENV: set `RECORD_FILE=/path/to/events.jsonl` to enable (see main.rs).
//
use std::path::Path;
use std::time::Duration;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info};

use crate::domain::Event;
use crate::hub::Subscriber;

const FLUSH_EVERY_N_EVENTS: u32 = 1000;

async fn open_writer(path: &str) -> std::io::Result<BufWriter<tokio::fs::File>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent).await {
                error!(?e, %path, "recorder: create_dir_all failed");
            }
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path).await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<tokio::fs::File>, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.write_all(b"\n").await
}

pub async fn run(sub: Subscriber, path: String, flush_every: Duration) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, %path, "recorder: open failed, recorder disabled");
            sub.mark_failed();
            return;
        }
    };
    info!(%path, "recorder: started");

    // periodic flush + count-based flush
    let mut tick = interval(flush_every);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        let ev = tokio::select! {
            maybe_ev = sub.recv(flush_every) => match maybe_ev {
                Some(ev) => ev,
                None => break,
            },
            _ = tick.tick() => {
                if since_last_flush > 0 {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
                continue;
            }
        };
        if matches!(ev, Event::Heartbeat { .. } | Event::Connected { .. }) {
            continue;
        }

        let line = match serde_json::to_vec(&ev) {
            Ok(s) => s,
            Err(e) => {
                error!(?e, "recorder: serialize error, skip event");
                continue;
            }
        };

        if let Err(e) = write_line(&mut writer, &line).await {
            error!(?e, "recorder: write failed, attempting reopen");
            let retried = match open_writer(&path).await {
                Ok(w) => {
                    writer = w;
                    write_line(&mut writer, &line).await
                }
                Err(e) => Err(e),
            };
            if let Err(e2) = retried {
                error!(?e2, "recorder: write failed again after reopen, giving up");
                sub.mark_failed();
                return;
            }
        }

        since_last_flush += 1;
        if since_last_flush >= FLUSH_EVERY_N_EVENTS {
            let _ = writer.flush().await;
            since_last_flush = 0;
        }
    }

    let _ = writer.flush().await;
    info!("recorder: hub closed, stopped");
}
