//! Dump round-trip laws: a filterless dump replays into the same enriched
//! stream, and fatfile dumps preserve state reconstruction across filters.

mod common;

use anyhow::{bail, Result};
use common::{clone_exit, close_exit, execve_exit, open_exit, write_capture, write_exit};
use sysinspect::{Inspector, NextResult};
use tempfile::TempDir;

/// Drain a capture, recording (num, ts, type code, tid, fd) per event.
fn drain(inspector: &mut Inspector) -> Result<Vec<(u64, u64, u16, i64, Option<i64>)>> {
    let mut seen = Vec::new();
    loop {
        match inspector.next() {
            Ok(NextResult::Event(evt)) => {
                seen.push((evt.num(), evt.ts(), evt.type_code(), evt.tid(), evt.fd_num()));
            }
            Ok(NextResult::Eof) => return Ok(seen),
            Ok(NextResult::Timeout) => bail!("unexpected timeout on a file capture"),
            Err(e) => bail!("capture failed: {e}"),
        }
    }
}

#[test]
fn filterless_dump_replays_identically() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input.sysp");
    write_capture(
        &input,
        &[
            clone_exit(200, 100, "sh", 1000),
            execve_exit(200, "/bin/cat", &["cat"], 2000),
            open_exit(200, 5, "/tmp/a", 3000),
            write_exit(200, 5, b"hello", 4000),
            close_exit(200, 5, 5000),
        ],
    );

    let dump = dir.path().join("dump.sysp");
    let mut live = Inspector::new();
    live.open_file(&input)?;
    live.autodump_start(&dump, false)?;
    let first_pass = drain(&mut live)?;
    live.autodump_stop()?;
    live.close();
    assert_eq!(first_pass.len(), 5);
    assert_eq!(live.get_first_event_ts(), Some(1000));

    let mut replay = Inspector::new();
    replay.open_file(&dump)?;
    let second_pass = drain(&mut replay)?;

    assert_eq!(first_pass, second_pass);
    assert_eq!(replay.get_first_event_ts(), Some(1000));
    // The replayed state matches the original reconstruction.
    let thread = replay.get_thread(200).expect("thread 200 reconstructed");
    assert_eq!(thread.exe, "/bin/cat");
    assert!(thread.fd_table().get(5).is_none());
    Ok(())
}

#[test]
fn compressed_dump_replays() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input.sysp");
    write_capture(&input, &[open_exit(100, 3, "/tmp/z", 1000)]);

    let dump = dir.path().join("dump.sysp.gz");
    let mut live = Inspector::new();
    live.open_file(&input)?;
    live.autodump_start(&dump, true)?;
    drain(&mut live)?;
    live.autodump_stop()?;

    let mut replay = Inspector::new();
    replay.open_file(&dump)?;
    let events = drain(&mut replay)?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1, 1000);
    Ok(())
}

#[test]
fn fatfile_dump_preserves_state_across_filters() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input.sysp");
    write_capture(
        &input,
        &[
            open_exit(100, 5, "/tmp/a", 1000),
            write_exit(100, 5, b"payload", 2000),
            close_exit(100, 5, 3000),
        ],
    );

    // Filtered capture: only the write reaches the consumer, but fatfile
    // mode keeps the open/close state events in the dump.
    let dump = dir.path().join("fat.sysp");
    let mut live = Inspector::new();
    live.set_filter("evt.type = write")?;
    live.set_fatfile_dump_mode(true);
    live.open_file(&input)?;
    live.autodump_start(&dump, false)?;
    let accepted = drain(&mut live)?;
    live.autodump_stop()?;
    assert_eq!(accepted.len(), 1);

    // Replaying with the same filter reconstructs the same state: during
    // the write, fd 5 resolves to /tmp/a even though the open was filtered
    // out of the consumer stream.
    let mut replay = Inspector::new();
    replay.set_filter("evt.type = write")?;
    replay.open_file(&dump)?;

    match replay.next() {
        Ok(NextResult::Event(evt)) => {
            assert_eq!(evt.name(), "write");
            assert_eq!(evt.fd_num(), Some(5));
        }
        other => bail!("expected the write event, got {other:?}"),
    }
    {
        let desc = replay
            .get_thread(100)
            .expect("thread reconstructed")
            .fd_table()
            .get(5)
            .expect("fd reconstructed from fatfile frame");
        assert_eq!(desc.name, "/tmp/a");
    }

    match replay.next() {
        Ok(NextResult::Eof) => {}
        other => bail!("expected EOF, got {other:?}"),
    }
    // The filtered-out close still ran against the state tables.
    assert!(replay
        .get_thread(100)
        .expect("thread survives to EOF")
        .fd_table()
        .get(5)
        .is_none());
    Ok(())
}

#[test]
fn fatfile_without_dump_is_a_noop() -> Result<()> {
    let dir = TempDir::new()?;
    let input = dir.path().join("input.sysp");
    write_capture(&input, &[open_exit(100, 5, "/tmp/a", 1000)]);

    let mut inspector = Inspector::new();
    inspector.set_filter("evt.type = write")?;
    inspector.set_fatfile_dump_mode(true);
    inspector.open_file(&input)?;

    // No dumper attached: fatfile synthesis must not run or fail.
    match inspector.next() {
        Ok(NextResult::Eof) => {}
        other => bail!("expected EOF, got {other:?}"),
    }
    assert!(inspector
        .get_thread(100)
        .expect("thread reconstructed")
        .fd_table()
        .get(5)
        .is_some());
    Ok(())
}
