use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::model::{now_millis, WalOp, WalRecord};

// Constants
pub const DEFAULT_MAX_FILE_BYTES: u64 = 50 * 1024 * 1024; // 50 MiB
const FILE_PREFIX: &str = "wal-";
const FILE_SUFFIX: &str = ".jsonl";

/// Borrowed view of a record, so appends serialize without cloning the entry.
#[derive(Serialize)]
struct RecordView<'a, T: Serialize> {
    op: WalOp,
    entry: &'a T,
    ts: u64,
}

#[derive(Serialize)]
struct TombstoneView<'a> {
    id: &'a str,
    timestamp: u64,
}

#[derive(Debug)]
struct ActiveFile {
    path: PathBuf,
    file: File,
    current_offset: u64,
}

/// Append-only, size-rotated log of mutation records.
///
/// Every append is best-effort: I/O failures are logged and counted but never
/// returned to the caller.
#[derive(Debug)]
pub struct WalWriter {
    dir: PathBuf,
    max_file_bytes: u64,
    sync: bool,
    active: Option<ActiveFile>,
    last_stamp: u64,
    entries_written: u64,
    failures: u64,
    files_created: u64,
}

pub fn file_name(stamp: u64) -> String {
    format!("{}{:013}{}", FILE_PREFIX, stamp, FILE_SUFFIX)
}

fn parse_stamp(name: &str) -> Option<u64> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

/// WAL files under `dir`, in replay order.
pub fn wal_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_stamp)
                .is_some()
        })
        .collect();
    files.sort();
    Ok(files)
}

impl WalWriter {
    pub fn open(dir: &Path, max_file_bytes: u64, sync: bool) -> io::Result<Self> {
        fs::create_dir_all(dir)?;

        // New files must sort after anything already on disk
        let last_stamp = wal_files(dir)?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).and_then(parse_stamp))
            .max()
            .unwrap_or(0);

        Ok(Self {
            dir: dir.to_path_buf(),
            max_file_bytes: max_file_bytes.max(1),
            sync,
            active: None,
            last_stamp,
            entries_written: 0,
            failures: 0,
            files_created: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records successfully appended by this writer.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn files_created(&self) -> u64 {
        self.files_created
    }

    /// Append one `{op, entry, ts}` line and force it to disk.
    pub fn append<T: Serialize>(&mut self, op: WalOp, entry: &T) {
        let record = RecordView { op, entry, ts: now_millis() };
        match self.try_append(&record) {
            Ok(()) => self.entries_written += 1,
            Err(e) => {
                self.failures += 1;
                error!(dir = %self.dir.display(), ?op, error = %e, "WAL append failed, continuing without durability");
                // Next append starts over with a fresh file
                self.active = None;
            }
        }
    }

    pub fn append_delete(&mut self, id: &str, timestamp: u64) {
        self.append(WalOp::Delete, &TombstoneView { id, timestamp });
    }

    fn try_append<T: Serialize>(&mut self, record: &RecordView<'_, T>) -> io::Result<()> {
        let mut line = serde_json::to_vec(record).map_err(io::Error::from)?;
        line.push(b'\n');

        let sync = self.sync;
        let max_file_bytes = self.max_file_bytes;

        let active = self.active_file()?;
        active.file.write_all(&line)?;
        active.file.flush()?;
        if sync {
            active.file.sync_data()?;
        }
        active.current_offset += line.len() as u64;
        let full = active.current_offset >= max_file_bytes;

        if full {
            self.rotate();
        }
        Ok(())
    }

    fn active_file(&mut self) -> io::Result<&mut ActiveFile> {
        let active = match self.active.take() {
            Some(active) => active,
            None => self.open_next_file()?,
        };
        Ok(self.active.insert(active))
    }

    fn open_next_file(&mut self) -> io::Result<ActiveFile> {
        let mut stamp = now_millis().max(self.last_stamp + 1);
        loop {
            let path = self.dir.join(file_name(stamp));
            match OpenOptions::new().create_new(true).append(true).open(&path) {
                Ok(file) => {
                    self.last_stamp = stamp;
                    self.files_created += 1;
                    info!(path = %path.display(), "opened WAL file");
                    return Ok(ActiveFile { path, file, current_offset: 0 });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e),
            }
        }
    }

    /// Close the active file; the next append opens a new one.
    fn rotate(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(path = %active.path.display(), bytes = active.current_offset, "rotating WAL file");
            if let Err(e) = active.file.sync_all() {
                error!(path = %active.path.display(), error = %e, "WAL sync on rotation failed");
            }
        }
    }

    /// Read every record, oldest file first.
    ///
    /// A file that cannot be read, or the first line in it that does not
    /// parse, is logged and the remainder of that file is skipped.
    pub fn replay(&self) -> Vec<WalRecord> {
        let files = match wal_files(&self.dir) {
            Ok(files) => files,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot list WAL directory");
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        for path in files {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "cannot open WAL file, skipping");
                    continue;
                }
            };

            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(path = %path.display(), line = line_no + 1, error = %e, "WAL read failed, skipping rest of file");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<WalRecord>(&line) {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        warn!(path = %path.display(), line = line_no + 1, error = %e, "unparsable WAL record, skipping rest of file");
                        break;
                    }
                }
            }
        }
        records
    }

    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = active.file.sync_all() {
                error!(path = %active.path.display(), error = %e, "WAL close failed");
            }
            debug!(path = %active.path.display(), "closed WAL file");
        }
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        self.close();
    }
}
