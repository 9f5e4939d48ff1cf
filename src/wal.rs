use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const LEN_BYTES: usize = 4;
const CRC_BYTES: usize = 4;

/// Append-only write-ahead log of store events.
///
/// Each record is `[u32 le: len][bincode: Event][u32 le: crc32(payload)]`.
/// A crash can leave a partial record at the tail; replay stops at the first
/// record that is short or fails its checksum and keeps everything before it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn write_record(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "WAL record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Fill `buf` completely. `Ok(false)` means the file ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Next intact record, or `None` at end of log or at the first damaged record.
fn read_record(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; LEN_BYTES];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    if !read_full(reader, &mut payload)? {
        tracing::warn!("WAL ends in a truncated record, discarding it");
        return Ok(None);
    }
    let mut crc_buf = [0u8; CRC_BYTES];
    if !read_full(reader, &mut crc_buf)? {
        tracing::warn!("WAL ends in a truncated record, discarding it");
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        tracing::warn!("WAL record failed checksum, replay stops here");
        return Ok(None);
    }
    Ok(bincode::deserialize::<Event>(&payload).ok())
}

impl Wal {
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self {
            writer: BufWriter::new(open_append(path)?),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one record; nothing is durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        write_record(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the snapshot events to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_path(path))?);
        for event in events {
            write_record(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the log and continue appending to it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::compact_path(&self.path), &self.path)?;
        self.writer = BufWriter::new(open_append(&self.path)?);
        self.appends_since_compact = 0;
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

    /// Read every intact record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        while let Some(event) = read_record(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use ulid::Ulid;

    use super::*;
    use crate::model::{ReservationStatus, SessionStatus};

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtside_wal_tests");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}_{}.wal", Ulid::new()));
        let _ = fs::remove_file(&path);
        path
    }

    fn status_change(id: Ulid, court_id: Ulid, status: ReservationStatus) -> Event {
        Event::ReservationStatusChanged {
            id,
            court_id,
            status,
            amount_paid: Decimal::new(500, 0),
            entries: Vec::new(),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_replay");
        let (id, court_id) = (Ulid::new(), Ulid::new());
        let events = vec![
            status_change(id, court_id, ReservationStatus::Paid),
            status_change(id, court_id, ReservationStatus::Confirmed),
            Event::QueueSessionStatusChanged {
                id: Ulid::new(),
                court_id,
                status: SessionStatus::Open,
            },
        ];

        let mut wal = Wal::open(&path).unwrap();
        for e in &events {
            wal.append(e).unwrap();
        }
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_truncated_tail() {
        let path = tmp_path("truncated");
        let event = status_change(Ulid::new(), Ulid::new(), ReservationStatus::Confirmed);

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&event).unwrap();
        wal.append(&event).unwrap();
        drop(wal);

        // Chop the last record in half.
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 6]).unwrap();

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_checksum() {
        let path = tmp_path("bad_crc");
        let event = status_change(Ulid::new(), Ulid::new(), ReservationStatus::Paid);

        let mut wal = Wal::open(&path).unwrap();
        wal.append(&event).unwrap();
        wal.append(&event).unwrap();
        drop(wal);

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert_eq!(Wal::replay(&path).unwrap().len(), 1);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_replaces_log_and_accepts_appends() {
        let path = tmp_path("compact");
        let (id, court_id) = (Ulid::new(), Ulid::new());

        let mut wal = Wal::open(&path).unwrap();
        for status in [ReservationStatus::Paid, ReservationStatus::Confirmed, ReservationStatus::Completed] {
            wal.append(&status_change(id, court_id, status)).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 3);

        let snapshot = vec![status_change(id, court_id, ReservationStatus::Completed)];
        wal.compact(&snapshot).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(!Wal::compact_path(&path).exists());

        let later = status_change(Ulid::new(), court_id, ReservationStatus::Pending);
        wal.append(&later).unwrap();
        drop(wal);

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![snapshot[0].clone(), later]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_durable_after_flush() {
        let path = tmp_path("buffered");
        let event = status_change(Ulid::new(), Ulid::new(), ReservationStatus::Paid);

        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..5 {
            wal.append_buffered(&event).unwrap();
        }
        wal.flush_sync().unwrap();
        drop(wal);

        assert_eq!(Wal::replay(&path).unwrap().len(), 5);
        let _ = fs::remove_file(&path);
    }
}
