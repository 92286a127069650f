//! Backing storage for tree pages.
//!
//! [`MemoryStorage`] keeps pages in a map. [`FileStorage`] keeps them in an
//! append-only record log:
//!
//! ```text
//! +-------+---------+------------------------+------------------------+--
//! | magic | version | len | record (bincode) | len | record (bincode) | ...
//! +-------+---------+------------------------+------------------------+--
//! ```
//!
//! A record is a checksummed page, a tombstone for a deleted page, or a
//! header. Opening a file scans the log once and remembers the offset of the
//! latest record per page; only those pages are read later, one at a time,
//! on demand. A torn record at the tail (a write interrupted by a crash) is
//! cut off.
//!
//! Rewritten pages leave their old records behind. Once those dead records
//! take more space than the live ones, `sync` rewrites the log with only the
//! latest record of every page and the header, then swaps it in place of
//! the old file.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::constants::{MAGIC, VERSION};
use super::types::{FileHeader, Node, PageId, PageWithChecksum, SpatialError, SpatialResult};

/// Where pages live when they are not cached
pub trait PageStorage: Send {
    /// Load a page, `None` if it was never stored or has been removed.
    fn load(&mut self, page_id: PageId) -> SpatialResult<Option<Node>>;

    fn store(&mut self, node: &Node) -> SpatialResult<()>;

    fn remove(&mut self, page_id: PageId) -> SpatialResult<()>;

    /// Persist the header and make all stored pages durable.
    fn sync(&mut self, header: &FileHeader) -> SpatialResult<()>;
}

// ============================================================================
// Memory storage
// ============================================================================

/// Pages held in a map, for trees that do not outlive the process
#[derive(Default)]
pub struct MemoryStorage {
    pages: HashMap<PageId, Node>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.pages.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl PageStorage for MemoryStorage {
    fn load(&mut self, page_id: PageId) -> SpatialResult<Option<Node>> {
        Ok(self.pages.get(&page_id).cloned())
    }

    fn store(&mut self, node: &Node) -> SpatialResult<()> {
        self.pages.insert(node.id, node.clone());
        Ok(())
    }

    fn remove(&mut self, page_id: PageId) -> SpatialResult<()> {
        self.pages.remove(&page_id);
        Ok(())
    }

    fn sync(&mut self, _header: &FileHeader) -> SpatialResult<()> {
        Ok(())
    }
}

// ============================================================================
// File storage
// ============================================================================

/// Bytes of the magic/version preamble
const PREAMBLE_LEN: u64 = 8;

/// Bytes of the length prefix of each record
const LENGTH_PREFIX: u64 = 4;

#[derive(Debug, Serialize, Deserialize)]
enum Record {
    Page(PageWithChecksum),
    Tombstone(PageId),
    Header(FileHeader),
}

fn encode_record(record: &Record) -> SpatialResult<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(record, bincode::config::legacy())
        .map_err(|e| SpatialError::Serialization(e.to_string()))?;
    let len = u32::try_from(payload.len()).map_err(|_| {
        SpatialError::Serialization(format!("record of {} bytes is too large", payload.len()))
    })?;
    let mut framed = Vec::with_capacity(payload.len() + LENGTH_PREFIX as usize);
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(&payload);
    Ok(framed)
}

fn decode_record(payload: &[u8]) -> SpatialResult<Record> {
    bincode::serde::decode_from_slice(payload, bincode::config::legacy())
        .map(|(record, _)| record)
        .map_err(|e| SpatialError::Serialization(e.to_string()))
}

/// Reads the next framed record, with at most `available` bytes left in the
/// log; `None` at a clean end of the log or at a torn tail record.
fn read_framed<R: Read>(reader: &mut R, available: u64) -> SpatialResult<Option<Vec<u8>>> {
    if available < LENGTH_PREFIX {
        return Ok(None);
    }
    let mut len_bytes = [0u8; LENGTH_PREFIX as usize];
    match reader.read_exact(&mut len_bytes) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as u64;
    // A prefix promising more than the log holds is never allocated
    if len > available - LENGTH_PREFIX {
        return Ok(None);
    }
    let mut payload = vec![0u8; len as usize];
    match reader.read_exact(&mut payload) {
        Ok(()) => Ok(Some(payload)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Position of a framed record in the log
#[derive(Debug, Clone, Copy)]
struct RecordSlot {
    offset: u64,
    len: u64,
}

/// Handles reading/writing individual pages of a record log file.
///
/// Each `load` call results in exactly one seek and read of one record.
pub struct FileStorage {
    file: File,
    path: PathBuf,
    /// Latest record of every live page
    slots: HashMap<PageId, RecordSlot>,
    /// Bytes taken by the live page records
    live_bytes: u64,
    /// Offset where the next record is appended
    end: u64,
}

impl FileStorage {
    /// Create a new, empty storage file, truncating any existing one
    pub fn create(path: &Path) -> SpatialResult<Self> {
        let file = create_log(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            slots: HashMap::new(),
            live_bytes: 0,
            end: PREAMBLE_LEN,
        })
    }

    /// Open an existing storage file and return it with its latest header
    pub fn open(path: &Path) -> SpatialResult<(Self, FileHeader)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut preamble = [0u8; PREAMBLE_LEN as usize];
        file.read_exact(&mut preamble).map_err(|_| {
            SpatialError::Corrupted(format!("{} is not an index file", path.display()))
        })?;
        let magic = u32::from_le_bytes([preamble[0], preamble[1], preamble[2], preamble[3]]);
        let version = u32::from_le_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
        if magic != MAGIC {
            return Err(SpatialError::Corrupted(
                "invalid file format (bad magic)".into(),
            ));
        }
        if version != VERSION {
            return Err(SpatialError::Corrupted(format!(
                "unsupported file format version {}",
                version
            )));
        }

        let file_len = file.metadata()?.len();
        let mut slots = HashMap::new();
        let mut header = None;
        let mut end = PREAMBLE_LEN;
        {
            let mut reader = BufReader::new(&mut file);
            while let Some(payload) = read_framed(&mut reader, file_len - end)? {
                let len = LENGTH_PREFIX + payload.len() as u64;
                match decode_record(&payload)? {
                    Record::Page(page) => {
                        slots.insert(page.node.id, RecordSlot { offset: end, len });
                    }
                    Record::Tombstone(page_id) => {
                        slots.remove(&page_id);
                    }
                    Record::Header(h) => header = Some(h),
                }
                end += len;
            }
        }

        if file_len > end {
            log::warn!(
                "discarding {} bytes of a torn record at the end of {}",
                file_len - end,
                path.display()
            );
            file.set_len(end)?;
        }

        let header = header.ok_or_else(|| {
            SpatialError::Corrupted(format!("{} has no header record", path.display()))
        })?;
        header.validate()?;

        let live_bytes = slots.values().map(|s| s.len).sum();
        log::debug!(
            "opened {} with {} live pages ({} of {} bytes live)",
            path.display(),
            slots.len(),
            live_bytes,
            end
        );

        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                slots,
                live_bytes,
                end,
            },
            header,
        ))
    }

    /// Number of live pages in the log
    #[cfg(test)]
    fn page_count(&self) -> usize {
        self.slots.len()
    }

    /// Size of the log in bytes
    #[cfg(test)]
    fn len_bytes(&self) -> u64 {
        self.end
    }

    fn append(&mut self, record: &Record) -> SpatialResult<RecordSlot> {
        let framed = encode_record(record)?;
        let slot = RecordSlot {
            offset: self.end,
            len: framed.len() as u64,
        };
        self.file.seek(SeekFrom::Start(slot.offset))?;
        self.file.write_all(&framed)?;
        self.end += slot.len;
        Ok(slot)
    }

    fn read_slot(&mut self, slot: RecordSlot) -> SpatialResult<Option<Vec<u8>>> {
        self.file.seek(SeekFrom::Start(slot.offset))?;
        read_framed(&mut self.file, slot.len)
    }

    /// Dead records outweigh the live pages and the header together
    fn needs_compaction(&self, header_len: u64) -> bool {
        let live = PREAMBLE_LEN + self.live_bytes + header_len;
        self.end - live > live
    }

    /// Rewrite the log with the live pages and `header` only. The new log
    /// is written next to the old one and renamed over it once durable.
    fn compact(&mut self, header: &FileHeader) -> SpatialResult<()> {
        let before = self.end;
        let compact_path = self.path.with_extension("compact");
        let mut pages: Vec<(PageId, RecordSlot)> = self.slots.iter().map(|(id, s)| (*id, *s)).collect();
        pages.sort_by_key(|(_, slot)| slot.offset);

        let mut slots = HashMap::with_capacity(pages.len());
        let mut end = PREAMBLE_LEN;
        {
            let mut writer = BufWriter::new(create_log(&compact_path)?);
            for (page_id, slot) in pages {
                let payload = self.read_slot(slot)?.ok_or_else(|| {
                    SpatialError::Corrupted(format!("page {} record is truncated", page_id))
                })?;
                writer.write_all(&(payload.len() as u32).to_le_bytes())?;
                writer.write_all(&payload)?;
                slots.insert(page_id, RecordSlot { offset: end, len: slot.len });
                end += slot.len;
            }
            let framed = encode_record(&Record::Header(header.clone()))?;
            writer.write_all(&framed)?;
            end += framed.len() as u64;
            writer
                .into_inner()
                .map_err(|e| SpatialError::Io(e.into_error()))?
                .sync_all()?;
        }

        fs::rename(&compact_path, &self.path)?;
        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.slots = slots;
        self.end = end;
        log::debug!(
            "compacted {} from {} to {} bytes",
            self.path.display(),
            before,
            end
        );
        Ok(())
    }
}

/// Create or truncate a log file and write its preamble
fn create_log(path: &Path) -> SpatialResult<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.write_all(&MAGIC.to_le_bytes())?;
    file.write_all(&VERSION.to_le_bytes())?;
    Ok(file)
}

impl PageStorage for FileStorage {
    fn load(&mut self, page_id: PageId) -> SpatialResult<Option<Node>> {
        let Some(&slot) = self.slots.get(&page_id) else {
            return Ok(None);
        };
        let payload = self.read_slot(slot)?.ok_or_else(|| {
            SpatialError::Corrupted(format!("page {} record is truncated", page_id))
        })?;
        match decode_record(&payload)? {
            Record::Page(page) if page.node.id == page_id => page.into_node().map(Some),
            _ => Err(SpatialError::Corrupted(format!(
                "offset {} does not hold page {}",
                slot.offset, page_id
            ))),
        }
    }

    fn store(&mut self, node: &Node) -> SpatialResult<()> {
        let slot = self.append(&Record::Page(PageWithChecksum::new(node.clone())?))?;
        if let Some(old) = self.slots.insert(node.id, slot) {
            self.live_bytes -= old.len;
        }
        self.live_bytes += slot.len;
        Ok(())
    }

    fn remove(&mut self, page_id: PageId) -> SpatialResult<()> {
        if let Some(old) = self.slots.remove(&page_id) {
            self.live_bytes -= old.len;
            self.append(&Record::Tombstone(page_id))?;
        }
        Ok(())
    }

    fn sync(&mut self, header: &FileHeader) -> SpatialResult<()> {
        let slot = self.append(&Record::Header(header.clone()))?;
        if self.needs_compaction(slot.len) {
            return self.compact(header);
        }
        self.file.sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rstar::config::TreeShape;
    use crate::rstar::types::{Capacities, Entry, NodeKind, TreeHeader};
    use tempfile::tempdir;

    fn header(next: PageId) -> FileHeader {
        FileHeader::new(
            TreeHeader {
                dimensionality: 2,
                page_size: 4096,
                capacities: Capacities {
                    dir_capacity: 114,
                    leaf_capacity: 204,
                    dir_minimum: 57,
                    leaf_minimum: 102,
                },
                shape: TreeShape::Hierarchical,
                entry_count: 3,
            },
            next,
            vec![],
        )
    }

    fn leaf(id: PageId, points: usize) -> Node {
        let entries = (0..points)
            .map(|i| Entry::leaf(i as u64, vec![i as f64, 1.0]))
            .collect();
        Node::with_entries(id, NodeKind::Leaf, entries)
    }

    #[test]
    fn test_memory_storage() {
        let mut storage = MemoryStorage::new();
        storage.store(&leaf(1, 2)).unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.load(1).unwrap(), Some(leaf(1, 2)));
        storage.remove(1).unwrap();
        assert!(storage.load(1).unwrap().is_none());
        assert!(storage.is_empty());
    }

    #[test]
    fn test_storage_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let storage = FileStorage::create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(storage.len_bytes(), PREAMBLE_LEN);
    }

    #[test]
    fn test_storage_page_write_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut storage = FileStorage::create(&path).unwrap();

        storage.store(&leaf(0, 3)).unwrap();
        storage.store(&leaf(1, 1)).unwrap();
        assert_eq!(storage.load(0).unwrap(), Some(leaf(0, 3)));
        assert_eq!(storage.load(1).unwrap(), Some(leaf(1, 1)));
        assert!(storage.load(2).unwrap().is_none());
    }

    #[test]
    fn test_latest_record_wins_after_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        {
            let mut storage = FileStorage::create(&path).unwrap();
            storage.store(&leaf(0, 1)).unwrap();
            storage.store(&leaf(1, 1)).unwrap();
            storage.store(&leaf(0, 5)).unwrap();
            storage.remove(1).unwrap();
            storage.sync(&header(2)).unwrap();
        }

        let (mut storage, read_header) = FileStorage::open(&path).unwrap();
        assert_eq!(read_header, header(2));
        assert_eq!(storage.page_count(), 1);
        assert_eq!(storage.load(0).unwrap(), Some(leaf(0, 5)));
        assert!(storage.load(1).unwrap().is_none());
    }

    #[test]
    fn test_open_without_header_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        {
            let mut storage = FileStorage::create(&path).unwrap();
            storage.store(&leaf(0, 1)).unwrap();
        }
        assert!(matches!(
            FileStorage::open(&path),
            Err(SpatialError::Corrupted(_))
        ));
    }

    #[test]
    fn test_open_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.bin");
        std::fs::write(&path, b"definitely not an index").unwrap();
        assert!(matches!(
            FileStorage::open(&path),
            Err(SpatialError::Corrupted(_))
        ));
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let good_len = {
            let mut storage = FileStorage::create(&path).unwrap();
            storage.store(&leaf(0, 2)).unwrap();
            storage.sync(&header(1)).unwrap();
            storage.len_bytes()
        };
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            // Length prefix promising more bytes than follow
            file.write_all(&100u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let (mut storage, _) = FileStorage::open(&path).unwrap();
        assert_eq!(storage.len_bytes(), good_len);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
        assert_eq!(storage.load(0).unwrap(), Some(leaf(0, 2)));
    }

    #[test]
    fn test_oversized_length_prefix_is_not_allocated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let good_len = {
            let mut storage = FileStorage::create(&path).unwrap();
            storage.store(&leaf(0, 2)).unwrap();
            storage.sync(&header(1)).unwrap();
            storage.len_bytes()
        };
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&u32::MAX.to_le_bytes()).unwrap();
            file.write_all(&[7; 16]).unwrap();
        }

        let (mut storage, _) = FileStorage::open(&path).unwrap();
        assert_eq!(storage.len_bytes(), good_len);
        assert_eq!(storage.load(0).unwrap(), Some(leaf(0, 2)));
    }

    #[test]
    fn test_sync_compacts_dead_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rstar");
        let mut storage = FileStorage::create(&path).unwrap();
        storage.store(&leaf(0, 4)).unwrap();
        storage.store(&leaf(1, 4)).unwrap();
        storage.sync(&header(2)).unwrap();
        let settled = storage.len_bytes();

        for round in 0..20 {
            storage.store(&leaf(0, 4)).unwrap();
            storage.store(&leaf(2, 1)).unwrap();
            storage.remove(2).unwrap();
            storage.sync(&header(2)).unwrap();
            assert!(
                storage.len_bytes() <= 2 * settled,
                "round {}: {} bytes, settled at {}",
                round,
                storage.len_bytes(),
                settled
            );
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), storage.len_bytes());
        assert!(!path.with_extension("compact").exists());
        assert_eq!(storage.load(0).unwrap(), Some(leaf(0, 4)));
        assert_eq!(storage.load(1).unwrap(), Some(leaf(1, 4)));
        assert!(storage.load(2).unwrap().is_none());

        // Writes after a compaction land in the new file
        storage.store(&leaf(3, 2)).unwrap();
        storage.sync(&header(4)).unwrap();
        drop(storage);

        let (mut storage, read_header) = FileStorage::open(&path).unwrap();
        assert_eq!(read_header, header(4));
        assert_eq!(storage.page_count(), 3);
        assert_eq!(storage.load(0).unwrap(), Some(leaf(0, 4)));
        assert_eq!(storage.load(3).unwrap(), Some(leaf(3, 2)));
    }
}
