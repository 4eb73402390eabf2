use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Frame a record as `[u32 len][bincode payload][u32 crc32]`, little-endian.
fn write_frame<E: Serialize>(writer: &mut impl Write, record: &E) -> io::Result<()> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes; `Ok(false)` on a clean or torn end of file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record and its framed size, or `None` at end of log / first
/// torn or corrupt frame.
fn read_frame<E: DeserializeOwned>(reader: &mut impl Read) -> io::Result<Option<(E, u64)>> {
    let mut word = [0u8; 4];
    if !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(word) as usize];
    if !read_or_eof(reader, &mut payload)? || !read_or_eof(reader, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    let size = 8 + payload.len() as u64;
    Ok(bincode::deserialize(&payload).ok().map(|record| (record, size)))
}

/// Intact records and the byte length of the prefix that holds them.
fn read_log<E: DeserializeOwned>(path: &Path) -> io::Result<(Vec<E>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut intact = 0;
    while let Some((record, size)) = read_frame(&mut reader)? {
        records.push(record);
        intact += size;
    }
    Ok((records, intact))
}

/// Where the log stood before a batch; `Wal::rollback` returns to it.
#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    len: u64,
    appends: u64,
}

/// Append-only journal of state transitions.
///
/// A crash mid-append leaves a torn last frame. Opening the log cuts it off,
/// so the next append continues right after the intact prefix.
pub struct Wal<E> {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    _record: PhantomData<fn(E)>,
}

impl<E: Serialize + DeserializeOwned> Wal<E> {
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::recover(path).map(|(wal, _)| wal)
    }

    /// Replay the intact prefix, truncate anything after it, and open for append.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<E>)> {
        let (records, intact) = read_log(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        if len > intact {
            tracing::warn!(
                path = %path.display(),
                discarded = len - intact,
                "truncating torn journal tail"
            );
            file.set_len(intact)?;
            file.sync_all()?;
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            _record: PhantomData,
        };
        Ok((wal, records))
    }

    /// Buffer one record. Nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, record: &E) -> io::Result<()> {
        write_frame(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, record: &E) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Durable length and append count. Call between batches, when the
    /// buffer is empty.
    pub fn checkpoint(&self) -> io::Result<Checkpoint> {
        Ok(Checkpoint {
            len: self.writer.get_ref().metadata()?.len(),
            appends: self.appends_since_compact,
        })
    }

    /// Drop everything written or buffered since `checkpoint`.
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        // into_parts discards the buffer instead of flushing it.
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (file, _unwritten) = stale.into_parts();
        file.set_len(checkpoint.len)?;
        file.sync_all()?;
        self.appends_since_compact = checkpoint.appends;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the log with `records`: write a sibling temp file, fsync, rename over.
    pub fn compact(&mut self, records: &[E]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                write_frame(&mut tmp, record)?;
            }
            tmp.flush()?;
            tmp.get_ref().sync_all()?;
        }
        self.flush_sync()?;
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// All intact records in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<E>> {
        read_log(path).map(|(records, _)| records)
    }
}
