//! Archive Reader
//!
//! The inverse of the writer: opens a closed archive directory, loads its
//! manifest, catalog, and both dictionaries, and reconstructs each file
//! split's original text byte-for-byte.
//!
//! ## Decompression Flow
//!
//! For one file split:
//!
//! 1. Read its segment (verifying checksum and that the segment's codec
//!    matches the archive manifest) and decompress the payload
//! 2. Slice the split's three columns out of the payload at the offsets the
//!    catalog recorded
//! 3. For each message: accumulate the timestamp delta, look up the log-type
//!    template, and fill its placeholders from the variable column
//! 4. Re-render the textual timestamp using whichever pattern the recorded
//!    `(message_ix, pattern)` ranges say was active for that message
//!
//! Decompressed segments are cached so the many files of one segment don't
//! decompress it repeatedly.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use logvault_core::variables::{EncodedFloat, TemplatePiece, VariableKind};
use logvault_core::varint;
use logvault_metadata::{ArchiveMetadataDb, FileMetadata};
use tracing::{debug, info};

use crate::archive::ArchiveManifest;
use crate::error::{Error, Result};
use crate::file::TimestampPatternRange;
use crate::segment::read_segment;
use crate::{
    ARCHIVE_METADATA_FILENAME, LOGTYPE_DICT_FILENAME, METADATA_DB_FILENAME, SEGMENTS_DIR_NAME,
    VAR_DICT_FILENAME,
};

/// Reader for one closed archive directory
pub struct ArchiveReader {
    path: PathBuf,
    manifest: ArchiveManifest,
    metadata_db: ArchiveMetadataDb,
    logtype_dict: Vec<Bytes>,
    var_dict: Vec<Bytes>,
    segment_cache: HashMap<u64, Bytes>,
}

impl ArchiveReader {
    /// Open an archive directory: manifest, catalog, and both dictionaries
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let manifest: ArchiveManifest =
            serde_json::from_slice(&fs::read(path.join(ARCHIVE_METADATA_FILENAME))?)?;
        let logtype_dict = crate::dictionary::read_dictionary(&path.join(LOGTYPE_DICT_FILENAME))?;
        let var_dict = crate::dictionary::read_dictionary(&path.join(VAR_DICT_FILENAME))?;
        let metadata_db = ArchiveMetadataDb::open(path.join(METADATA_DB_FILENAME)).await?;

        info!(
            archive_id = %manifest.id,
            num_logtypes = logtype_dict.len(),
            num_vars = var_dict.len(),
            "opened archive for reading"
        );
        Ok(Self {
            path,
            manifest,
            metadata_db,
            logtype_dict,
            var_dict,
            segment_cache: HashMap::new(),
        })
    }

    pub fn manifest(&self) -> &ArchiveManifest {
        &self.manifest
    }

    /// All file splits, ordered for reassembly (path, then split index)
    pub async fn file_splits(&self) -> Result<Vec<FileMetadata>> {
        Ok(self.metadata_db.list_files().await?)
    }

    /// File splits for one original path, ordered by split index
    pub async fn file_splits_for_path(&self, path: &str) -> Result<Vec<FileMetadata>> {
        Ok(self.metadata_db.files_for_path(path).await?)
    }

    pub async fn empty_directories(&self) -> Result<Vec<String>> {
        Ok(self.metadata_db.list_empty_directories().await?)
    }

    /// Reconstruct one split's original text exactly
    pub fn decompress_file(&mut self, file: &FileMetadata) -> Result<Vec<u8>> {
        let segment_id = file.segment_id.ok_or_else(|| {
            Error::CorruptArchive(format!("file {} was never assigned a segment", file.id))
        })?;
        let (timestamps_pos, logtypes_pos, variables_pos) = match (
            file.segment_timestamps_pos,
            file.segment_logtypes_pos,
            file.segment_variables_pos,
        ) {
            (Some(ts), Some(lt), Some(var)) => (ts as usize, lt as usize, var as usize),
            _ => {
                return Err(Error::CorruptArchive(format!(
                    "file {} is missing column offsets",
                    file.id
                )));
            }
        };

        let payload = self.segment_payload(segment_id)?;
        if timestamps_pos > payload.len()
            || logtypes_pos > payload.len()
            || variables_pos > payload.len()
        {
            return Err(Error::CorruptArchive(format!(
                "file {} column offsets run past segment {segment_id}",
                file.id
            )));
        }
        let mut ts_column = &payload[timestamps_pos..];
        let mut logtype_column = &payload[logtypes_pos..];
        let mut var_column = &payload[variables_pos..];

        let pattern_ranges: Vec<TimestampPatternRange> = serde_json::from_str(&file.ts_patterns)?;
        let mut active_range_ix: Option<usize> = None;

        let mut out = Vec::with_capacity(file.num_uncompressed_bytes as usize);
        let mut prev_ts: i64 = 0;
        for message_ix in 0..file.num_messages {
            prev_ts = prev_ts.wrapping_add(varint::decode_varint(&mut ts_column)?);

            let logtype_id = varint::decode_varint_u64(&mut logtype_column)?;
            let template = self.logtype_dict.get(logtype_id as usize).ok_or_else(|| {
                Error::CorruptArchive(format!(
                    "log type {logtype_id} is not in the dictionary"
                ))
            })?;

            let content = render_message(template, &mut var_column, &self.var_dict)?;

            // Advance to the pattern range covering this message
            while pattern_ranges
                .get(active_range_ix.map_or(0, |ix| ix + 1))
                .is_some_and(|range| range.message_ix <= message_ix)
            {
                active_range_ix = Some(active_range_ix.map_or(0, |ix| ix + 1));
            }
            let pattern = active_range_ix
                .and_then(|ix| pattern_ranges[ix].pattern.as_ref());

            match pattern {
                Some(pattern) => {
                    let content = String::from_utf8(content).map_err(|_| {
                        Error::CorruptArchive(format!(
                            "message {message_ix} of file {} is not valid UTF-8",
                            file.id
                        ))
                    })?;
                    let line = pattern.insert_formatted_timestamp(prev_ts, &content)?;
                    out.extend_from_slice(line.as_bytes());
                }
                None => out.extend_from_slice(&content),
            }
        }

        debug!(
            file_id = %file.id,
            path = %file.path,
            num_messages = file.num_messages,
            "decompressed file split"
        );
        Ok(out)
    }

    /// Reconstruct the whole archive under `output_dir`: every file (splits
    /// concatenated in order) and every recorded empty directory
    pub async fn decompress_to_dir(&mut self, output_dir: &Path) -> Result<()> {
        for dir in self.empty_directories().await? {
            fs::create_dir_all(output_dir.join(dir.trim_start_matches('/')))?;
        }

        let splits = self.file_splits().await?;
        let mut previous_path: Option<String> = None;
        for split in &splits {
            let content = self.decompress_file(split)?;

            let target = output_dir.join(split.path.trim_start_matches('/'));
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            // Splits of one path arrive consecutively; the first truncates
            let mut file = if previous_path.as_deref() == Some(split.path.as_str()) {
                fs::OpenOptions::new().append(true).open(&target)?
            } else {
                fs::File::create(&target)?
            };
            file.write_all(&content)?;
            previous_path = Some(split.path.clone());
        }
        Ok(())
    }

    fn segment_payload(&mut self, segment_id: u64) -> Result<Bytes> {
        if let Some(payload) = self.segment_cache.get(&segment_id) {
            return Ok(payload.clone());
        }
        let payload = read_segment(
            &self.path.join(SEGMENTS_DIR_NAME).join(segment_id.to_string()),
            self.manifest.compression,
        )?;
        self.segment_cache.insert(segment_id, payload.clone());
        Ok(payload)
    }
}

/// Fill one template's placeholders from the variable column
fn render_message(
    template: &Bytes,
    var_column: &mut &[u8],
    var_dict: &[Bytes],
) -> Result<Vec<u8>> {
    let mut content = Vec::with_capacity(template.len());
    for piece in logvault_core::variables::template_pieces(template) {
        match piece {
            TemplatePiece::Literal(byte) => content.push(byte),
            TemplatePiece::Placeholder(VariableKind::Int) => {
                let value = varint::decode_varint(var_column)?;
                content.extend_from_slice(value.to_string().as_bytes());
            }
            TemplatePiece::Placeholder(VariableKind::Float) => {
                let packed = varint::decode_varint_u64(var_column)?;
                content.extend_from_slice(EncodedFloat::from_u64(packed).decode().as_bytes());
            }
            TemplatePiece::Placeholder(VariableKind::Dict) => {
                let id = varint::decode_varint_u64(var_column)?;
                let token = var_dict.get(id as usize).ok_or_else(|| {
                    Error::CorruptArchive(format!("variable {id} is not in the dictionary"))
                })?;
                content.extend_from_slice(token);
            }
        }
    }
    Ok(content)
}
