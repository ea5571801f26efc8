//! Append-Only Interned String Dictionaries
//!
//! The archive carries two of these: one interning log-type templates, one
//! interning dictionary variables. Both have the same shape: an append-only
//! table of byte strings with dense numeric ids assigned in first-seen order.
//!
//! ## Interning
//!
//! `add_entry` is the hot path of the encoder: a hash lookup keyed by the
//! entry bytes, inserting only on first sight. Ids are never reused and
//! entries are never deleted, so an id handed out at any point stays valid
//! for the life of the archive.
//!
//! ## On-Disk Form
//!
//! Snapshots are incremental: each `write_snapshot` call appends only the
//! entries added since the previous snapshot (and is a no-op for an empty
//! tail). A snapshot is a `u64` entry count followed by that many
//! `(varint length, bytes)` records. Alongside the `.dict` file, an `.index`
//! file records each entry's byte offset into the `.dict` file as a `u64`,
//! in id order, so a reader can seek to a single entry without scanning.
//!
//! The archive flushes snapshots whenever a segment seals, *before* the
//! segment's metadata commits. That ordering is what guarantees every id a
//! sealed segment references is present in the persisted dictionary.

use std::collections::HashMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use logvault_core::varint;
use tracing::debug;

use crate::error::{Error, Result};

/// Writer for one interned string table and its on-disk files
pub struct DictionaryWriter {
    /// Entries in id order
    entries: Vec<Bytes>,
    /// Entry bytes → id
    ids: HashMap<Bytes, u64>,
    /// Sum of entry payload bytes
    data_size: u64,
    /// Entries already written by a previous snapshot
    persisted_count: usize,
    dict_writer: BufWriter<fs::File>,
    index_writer: BufWriter<fs::File>,
    /// Current byte offset into the `.dict` file
    dict_offset: u64,
}

impl DictionaryWriter {
    /// Create the `.dict` and `.index` files and an empty table
    pub fn open(dict_path: &Path, index_path: &Path) -> Result<Self> {
        let dict_writer = BufWriter::new(fs::File::create(dict_path)?);
        let index_writer = BufWriter::new(fs::File::create(index_path)?);
        Ok(Self {
            entries: Vec::new(),
            ids: HashMap::new(),
            data_size: 0,
            persisted_count: 0,
            dict_writer,
            index_writer,
            dict_offset: 0,
        })
    }

    /// Intern `bytes`, returning its id and whether it was newly added.
    /// Ids are dense: a new entry's id always equals the prior length.
    pub fn add_entry(&mut self, bytes: &[u8]) -> (u64, bool) {
        if let Some(&id) = self.ids.get(bytes) {
            return (id, false);
        }

        let id = self.entries.len() as u64;
        let entry = Bytes::copy_from_slice(bytes);
        self.entries.push(entry.clone());
        self.ids.insert(entry, id);
        self.data_size += bytes.len() as u64;
        (id, true)
    }

    pub fn get_entry(&self, id: u64) -> Option<&Bytes> {
        self.entries.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of interned payload bytes; used for archive sizing
    pub fn get_data_size(&self) -> u64 {
        self.data_size
    }

    /// Append the entries added since the last snapshot. A no-op (writing
    /// nothing at all) when there is no tail, so repeated calls are safe.
    pub fn write_snapshot(&mut self) -> Result<()> {
        let tail = &self.entries[self.persisted_count..];
        if tail.is_empty() {
            return Ok(());
        }

        let mut buf = BytesMut::new();
        buf.put_u64(tail.len() as u64);
        self.dict_offset += 8;

        let mut index = BytesMut::new();
        for entry in tail {
            index.put_u64(self.dict_offset);

            let before = buf.len();
            varint::encode_varint_u64(&mut buf, entry.len() as u64);
            buf.put_slice(entry);
            self.dict_offset += (buf.len() - before) as u64;
        }

        self.dict_writer.write_all(&buf)?;
        self.index_writer.write_all(&index)?;
        self.dict_writer.flush()?;
        self.index_writer.flush()?;

        debug!(
            new_entries = tail.len(),
            total_entries = self.entries.len(),
            "wrote dictionary snapshot"
        );
        self.persisted_count = self.entries.len();
        Ok(())
    }

    /// Write a final snapshot, then flush and fsync both files
    pub fn close(mut self) -> Result<()> {
        self.write_snapshot()?;
        self.dict_writer.flush()?;
        self.index_writer.flush()?;
        self.dict_writer.get_ref().sync_all()?;
        self.index_writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Load every entry of a persisted dictionary, in id order
pub fn read_dictionary(path: &Path) -> Result<Vec<Bytes>> {
    let data = Bytes::from(fs::read(path)?);
    let mut buf = data.clone();
    let mut entries = Vec::new();

    while buf.has_remaining() {
        if buf.remaining() < 8 {
            return Err(Error::CorruptArchive(format!(
                "dictionary {} has a truncated snapshot header",
                path.display()
            )));
        }
        let count = buf.get_u64();
        for _ in 0..count {
            let length = varint::decode_varint_u64(&mut buf)? as usize;
            if buf.remaining() < length {
                return Err(Error::CorruptArchive(format!(
                    "dictionary {} has a truncated entry",
                    path.display()
                )));
            }
            entries.push(buf.copy_to_bytes(length));
        }
    }

    Ok(entries)
}

/// Load a dictionary's id → offset index
pub fn read_dictionary_index(path: &Path) -> Result<Vec<u64>> {
    let data = fs::read(path)?;
    if data.len() % 8 != 0 {
        return Err(Error::CorruptArchive(format!(
            "dictionary index {} has a truncated offset",
            path.display()
        )));
    }
    Ok(data
        .chunks_exact(8)
        .map(|chunk| {
            u64::from_be_bytes([
                chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
            ])
        })
        .collect())
}
