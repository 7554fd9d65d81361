use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Bytes around each payload: u32 length prefix + u32 crc32 suffix.
const FRAME_OVERHEAD: u64 = 8;

/// A length prefix above this is treated as corruption, not an allocation request.
const MAX_PAYLOAD_LEN: usize = 64 << 20;

/// Encode a single event to [len][bincode][crc32] format. Returns the frame size.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<u64> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(u64::from(len) + FRAME_OVERHEAD)
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Decode the next frame. `None` at end of log or at the first bad frame.
fn decode_event(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_PAYLOAD_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Some((event, len as u64 + FRAME_OVERHEAD))),
        Err(_) => Ok(None),
    }
}

/// Outcome of reading a WAL from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Length of the intact prefix. Anything past it is a torn or corrupt tail.
    pub valid_len: u64,
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) ends replay and is cut off
///   when the log is reopened, so new appends never land behind garbage.
/// - A batch that fails to flush or sync is cut back off with `rollback`, so
///   the file only ever holds batches whose callers were told they succeeded.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length covered by successful `flush_sync` calls.
    committed_len: u64,
    pending_len: u64,
    pending_appends: u64,
    /// Set while a failed batch may still have bytes on disk.
    dirty: bool,
    #[cfg(test)]
    fail_next_sync: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`, dropping any bytes past `valid_len`.
    pub fn open(path: &Path, valid_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len > valid_len {
            tracing::warn!(
                "truncating WAL {} to {valid_len} bytes (torn tail)",
                path.display()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len: len.min(valid_len),
            pending_len: 0,
            pending_appends: 0,
            dirty: false,
            #[cfg(test)]
            fail_next_sync: false,
        })
    }

    /// Append a single event and fsync. Tests only; production code batches
    /// with `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Append a single event to the BufWriter without flushing or syncing.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        if self.dirty {
            self.rollback()?;
        }
        self.pending_len += encode_event(&mut self.writer, event)?;
        self.pending_appends += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        #[cfg(test)]
        {
            if std::mem::take(&mut self.fail_next_sync) {
                return Err(io::Error::other("injected fsync failure"));
            }
        }
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_len;
        self.pending_len = 0;
        self.pending_appends = 0;
        Ok(())
    }

    /// Discard everything appended since the last successful `flush_sync`:
    /// drop the unwritten buffer and cut the file back to its committed length.
    ///
    /// On error the log stays dirty and the next append retries the rollback.
    pub fn rollback(&mut self) -> io::Result<()> {
        self.dirty = true;
        let fresh = BufWriter::new(self.writer.get_ref().try_clone()?);
        // into_parts hands back the file without flushing the stale buffer
        let (file, _unwritten) = std::mem::replace(&mut self.writer, fresh).into_parts();
        file.set_len(self.committed_len)?;
        file.sync_all()?;
        tracing::warn!(
            "rolled back {} WAL appends, {} truncated to {} bytes",
            self.pending_appends,
            self.path.display(),
            self.committed_len
        );
        self.appends_since_compact = self.appends_since_compact.saturating_sub(self.pending_appends);
        self.pending_len = 0;
        self.pending_appends = 0;
        self.dirty = false;
        Ok(())
    }

    /// Make the next `flush_sync` fail after its bytes reach the file.
    #[cfg(test)]
    pub(crate) fn fail_next_sync(&mut self) {
        self.fail_next_sync = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to a temp file and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Atomic swap: rename temp file over the WAL and reopen.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.pending_len = 0;
        self.pending_appends = 0;
        self.dirty = false;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning every intact event in order.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();
        while let Some((event, frame_len)) = decode_event(&mut reader)? {
            replay.events.push(event);
            replay.valid_len += frame_len;
        }
        Ok(replay)
    }
}
