// ===============================
// src/ledger.rs
// ===============================
//
// Durable dedup ledger of mirrored fill ids.
// - File format: satu fill_id per baris (append-only)
// - Loaded fully at startup, every new id is appended + fsync'd before
//   mark_if_new returns true.
// - One mutex covers membership test + append + insert. Never held across
//   a network call. Blocking I/O: async callers go through spawn_blocking.
// - A failed append is truncated back to the previous length; if that
//   fails too the ledger refuses every further mark.
//
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ahash::AHashSet as HashSet;
use tracing::{error, info, warn};

use crate::metrics::LEDGER_SIZE;

/// Append target of the ledger.
pub trait LedgerStore: Write + Send {
    fn stored_len(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl LedgerStore for File {
    fn stored_len(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        // append mode: next write still lands at the (new) end
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

struct Inner<S> {
    seen: HashSet<String>,
    store: S,
    /// set when a torn append could not be rolled back
    failed: bool,
}

impl<S: LedgerStore> Inner<S> {
    fn append(&mut self, fill_id: &str) -> io::Result<()> {
        let prev_len = self.store.stored_len()?;
        let written = self
            .store
            .write_all(format!("{fill_id}\n").as_bytes())
            .and_then(|_| self.store.flush())
            .and_then(|_| self.store.sync());
        if let Err(e) = written {
            match self.store.truncate_to(prev_len).and_then(|_| self.store.sync()) {
                Ok(()) => warn!(?e, %fill_id, prev_len, "ledger: append failed, rolled back"),
                Err(e2) => {
                    self.failed = true;
                    error!(?e, ?e2, %fill_id, "ALERT ledger: append failed and rollback failed, refusing further marks");
                }
            }
            return Err(e);
        }
        Ok(())
    }
}

pub struct DedupLedger<S: LedgerStore = File> {
    path: PathBuf,
    inner: Mutex<Inner<S>>,
}

impl DedupLedger<File> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut seen = HashSet::new();
        match File::open(&path) {
            Ok(f) => {
                for line in BufReader::new(f).lines() {
                    let line = line?;
                    let id = line.trim();
                    if !id.is_empty() {
                        seen.insert(id.to_string());
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        let mut file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        // a crash mid-write can leave a partial last line without '\n'
        if needs_newline(&mut file)? {
            warn!(path = %path.display(), "ledger: last line unterminated, repairing");
            file.write_all(b"\n")?;
        }

        info!(path = %path.display(), entries = seen.len(), "ledger: loaded");
        Ok(Self::with_store(path, file, seen))
    }
}

impl<S: LedgerStore> DedupLedger<S> {
    fn with_store(path: PathBuf, store: S, seen: HashSet<String>) -> Self {
        LEDGER_SIZE.set(seen.len() as i64);
        Self { path, inner: Mutex::new(Inner { seen, store, failed: false }) }
    }

    /// Atomically check-and-insert. `Ok(true)` means the caller owns this
    /// fill and should mirror it; the id is already on disk by then.
    pub fn mark_if_new(&self, fill_id: &str) -> io::Result<bool> {
        let fill_id = fill_id.trim();
        if fill_id.is_empty() || fill_id.contains('\n') {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid fill id"));
        }
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "ledger lock poisoned"))?;
        if inner.failed {
            return Err(io::Error::new(io::ErrorKind::Other, "ledger file damaged, marks refused"));
        }
        if inner.seen.contains(fill_id) {
            return Ok(false);
        }
        inner.append(fill_id)?;
        inner.seen.insert(fill_id.to_string());
        LEDGER_SIZE.set(inner.seen.len() as i64);
        Ok(true)
    }

    pub fn contains(&self, fill_id: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.seen.contains(fill_id.trim()))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.seen.len()).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn needs_newline(file: &mut File) -> io::Result<bool> {
    use std::io::{Read, Seek, SeekFrom};
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
