//! BKVI (Book Vector Index) binary format definitions.
//!
//! Format overview (little-endian):
//!
//! Header (variable size):
//!   Magic: "BKVI" (4 bytes)
//!   Version: u16
//!   EmbedderID length: u16
//!   EmbedderID: bytes
//!   EmbedderRevision length: u16
//!   EmbedderRevision: bytes
//!   Dimension: u32
//!   Quantization: u8 (0=f32, 1=f16)
//!   Count: u32
//!   HeaderCRC32: u32 (CRC32 of header bytes before this field)
//!
//! Rows (fixed size per entry):
//!   BookID: u32
//!   ContentHash: [u8; 32] (SHA256 of canonical embedding text)
//!   VecOffset: u64 (offset into vector slab)
//!
//! Vector slab:
//!   Count × Dimension × bytes_per_quant, contiguous, 32-byte aligned.
//!
//! Vectors are stored L2-normalized, so cosine similarity is a dot product.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use half::f16;
use memmap2::Mmap;
use rayon::prelude::*;

pub const BKVI_MAGIC: [u8; 4] = *b"BKVI";
pub const BKVI_VERSION: u16 = 1;
pub const VECTOR_ALIGN_BYTES: usize = 32;
pub const ROW_SIZE_BYTES: usize = 44;
pub const VECTOR_INDEX_DIR: &str = "vector_index";

/// Minimum row count for parallel search; below this, thread overhead
/// outweighs the benefit.
const PARALLEL_THRESHOLD: usize = 8192;
const PARALLEL_CHUNK_SIZE: usize = 1024;

/// Set BOOKREC_PARALLEL_SEARCH=0 to force the sequential scan.
static PARALLEL_SEARCH_ENABLED: once_cell::sync::Lazy<bool> = once_cell::sync::Lazy::new(|| {
    dotenvy::var("BOOKREC_PARALLEL_SEARCH")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
});

pub fn vector_index_path(data_dir: &Path, embedder_id: &str) -> PathBuf {
    data_dir
        .join(VECTOR_INDEX_DIR)
        .join(format!("index-{embedder_id}.bkvi"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantization {
    F32,
    F16,
}

impl Quantization {
    pub fn to_u8(self) -> u8 {
        match self {
            Quantization::F32 => 0,
            Quantization::F16 => 1,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Quantization::F32),
            1 => Ok(Quantization::F16),
            other => bail!("unknown quantization value: {other}"),
        }
    }

    pub fn bytes_per_component(self) -> usize {
        match self {
            Quantization::F32 => 4,
            Quantization::F16 => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BkviHeader {
    pub version: u16,
    pub embedder_id: String,
    pub embedder_revision: String,
    pub dimension: u32,
    pub quantization: Quantization,
    pub count: u32,
}

impl BkviHeader {
    pub fn new(
        embedder_id: impl Into<String>,
        embedder_revision: impl Into<String>,
        dimension: u32,
        quantization: Quantization,
        count: u32,
    ) -> Result<Self> {
        let header = Self {
            version: BKVI_VERSION,
            embedder_id: embedder_id.into(),
            embedder_revision: embedder_revision.into(),
            dimension,
            quantization,
            count,
        };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<()> {
        if self.embedder_id.len() > u16::MAX as usize {
            bail!("embedder_id is too long: {}", self.embedder_id.len());
        }
        if self.embedder_revision.len() > u16::MAX as usize {
            bail!(
                "embedder_revision is too long: {}",
                self.embedder_revision.len()
            );
        }
        if self.dimension == 0 {
            bail!("dimension must be non-zero");
        }
        Ok(())
    }

    pub fn header_len_bytes(&self) -> Result<usize> {
        self.validate()?;
        Ok(4 + 2 + 2 + self.embedder_id.len() + 2 + self.embedder_revision.len() + 4 + 1 + 4 + 4)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<usize> {
        self.validate()?;
        let mut buf = Vec::new();

        buf.extend_from_slice(&BKVI_MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());

        let id_bytes = self.embedder_id.as_bytes();
        let id_len = u16::try_from(id_bytes.len())
            .map_err(|_| anyhow!("embedder_id length out of range"))?;
        buf.extend_from_slice(&id_len.to_le_bytes());
        buf.extend_from_slice(id_bytes);

        let rev_bytes = self.embedder_revision.as_bytes();
        let rev_len = u16::try_from(rev_bytes.len())
            .map_err(|_| anyhow!("embedder_revision length out of range"))?;
        buf.extend_from_slice(&rev_len.to_le_bytes());
        buf.extend_from_slice(rev_bytes);

        buf.extend_from_slice(&self.dimension.to_le_bytes());
        buf.push(self.quantization.to_u8());
        buf.extend_from_slice(&self.count.to_le_bytes());

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&buf);
        let crc = hasher.finalize();

        writer.write_all(&buf)?;
        writer.write_all(&crc.to_le_bytes())?;
        Ok(buf.len() + 4)
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        let mut header_bytes = Vec::new();

        let magic =
            read_exact_array::<4, _>(&mut reader, &mut header_bytes).context("read BKVI magic")?;
        if magic != BKVI_MAGIC {
            bail!("invalid BKVI magic: {:?}", magic);
        }

        let version = read_u16_le(&mut reader, &mut header_bytes).context("read BKVI version")?;
        if version != BKVI_VERSION {
            bail!("unsupported BKVI version: {version}");
        }

        let id_len = read_u16_le(&mut reader, &mut header_bytes)
            .context("read embedder id length")? as usize;
        let id_bytes =
            read_exact_vec(&mut reader, id_len, &mut header_bytes).context("read embedder id")?;
        let embedder_id = String::from_utf8(id_bytes).context("embedder id is not valid UTF-8")?;

        let rev_len = read_u16_le(&mut reader, &mut header_bytes)
            .context("read embedder revision length")? as usize;
        let rev_bytes = read_exact_vec(&mut reader, rev_len, &mut header_bytes)
            .context("read embedder revision")?;
        let embedder_revision =
            String::from_utf8(rev_bytes).context("embedder revision is not valid UTF-8")?;

        let dimension = read_u32_le(&mut reader, &mut header_bytes).context("read dimension")?;
        let quantization_raw =
            read_u8(&mut reader, &mut header_bytes).context("read quantization")?;
        let quantization = Quantization::from_u8(quantization_raw)?;
        let count = read_u32_le(&mut reader, &mut header_bytes).context("read count")?;

        let crc_expected = read_u32_le_no_accum(&mut reader).context("read header crc")?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_bytes);
        let crc_actual = hasher.finalize();
        if crc_actual != crc_expected {
            bail!("header CRC mismatch (expected {crc_expected:#010x}, got {crc_actual:#010x})");
        }

        let header = Self {
            version,
            embedder_id,
            embedder_revision,
            dimension,
            quantization,
            count,
        };
        header.validate()?;
        Ok(header)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorRow {
    pub book_id: u32,
    pub content_hash: [u8; 32],
    pub vec_offset: u64,
}

impl VectorRow {
    pub fn to_bytes(&self) -> [u8; ROW_SIZE_BYTES] {
        let mut buf = [0u8; ROW_SIZE_BYTES];
        buf[0..4].copy_from_slice(&self.book_id.to_le_bytes());
        buf[4..36].copy_from_slice(&self.content_hash);
        buf[36..44].copy_from_slice(&self.vec_offset.to_le_bytes());
        buf
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != ROW_SIZE_BYTES {
            bail!(
                "vector row size mismatch: expected {ROW_SIZE_BYTES}, got {}",
                buf.len()
            );
        }
        Ok(Self {
            book_id: u32::from_le_bytes(buf[0..4].try_into()?),
            content_hash: buf[4..36].try_into()?,
            vec_offset: u64::from_le_bytes(buf[36..44].try_into()?),
        })
    }
}

/// Input to [`VectorIndex::build`].
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub book_id: u32,
    pub content_hash: [u8; 32],
    pub vector: Vec<f32>,
}

/// Row filter applied during search. The recommendation engine uses it to
/// drop the mentioned book on the title path and already-chosen books on the
/// genre-fill path.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub exclude: Option<HashSet<u32>>,
}

impl SearchFilter {
    pub fn excluding<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        Self {
            exclude: Some(ids.into_iter().collect()),
        }
    }

    pub fn matches(&self, row: &VectorRow) -> bool {
        match &self.exclude {
            Some(ids) => !ids.contains(&row.book_id),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSearchResult {
    pub book_id: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Copy)]
struct ScoredEntry {
    score: f32,
    book_id: u32,
}

impl PartialEq for ScoredEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredEntry {}

impl PartialOrd for ScoredEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            // Lower id wins ties so the heap keeps a deterministic set.
            .then_with(|| other.book_id.cmp(&self.book_id))
    }
}

#[derive(Debug)]
pub struct VectorIndex {
    header: BkviHeader,
    rows: Vec<VectorRow>,
    vectors: VectorStorage,
}

#[derive(Debug)]
enum VectorStorage {
    F32(Vec<f32>),
    F16(Vec<f16>),
    Mmap {
        mmap: Mmap,
        offset: usize,
        len: usize,
    },
}

impl VectorIndex {
    pub fn build<I>(
        embedder_id: impl Into<String>,
        embedder_revision: impl Into<String>,
        dimension: usize,
        quantization: Quantization,
        entries: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = VectorEntry>,
    {
        if dimension == 0 {
            bail!("dimension must be non-zero");
        }
        let dimension_u32 =
            u32::try_from(dimension).map_err(|_| anyhow!("dimension out of range"))?;

        let entries: Vec<VectorEntry> = entries.into_iter().collect();
        let count_u32 =
            u32::try_from(entries.len()).map_err(|_| anyhow!("entry count out of range"))?;

        let bytes_per = quantization.bytes_per_component();
        let vector_bytes = dimension
            .checked_mul(bytes_per)
            .ok_or_else(|| anyhow!("vector size overflow"))?;

        let mut rows = Vec::with_capacity(entries.len());
        let mut offset_bytes: usize = 0;
        let mut f32_slab = Vec::new();
        let mut f16_slab = Vec::new();

        for entry in &entries {
            if entry.vector.len() != dimension {
                bail!(
                    "vector dimension mismatch: expected {}, got {}",
                    dimension,
                    entry.vector.len()
                );
            }
            let vec_offset =
                u64::try_from(offset_bytes).map_err(|_| anyhow!("vector offset out of range"))?;
            rows.push(VectorRow {
                book_id: entry.book_id,
                content_hash: entry.content_hash,
                vec_offset,
            });
            match quantization {
                Quantization::F32 => f32_slab.extend(entry.vector.iter().copied()),
                Quantization::F16 => {
                    f16_slab.extend(entry.vector.iter().map(|v| f16::from_f32(*v)))
                }
            }
            offset_bytes = offset_bytes
                .checked_add(vector_bytes)
                .ok_or_else(|| anyhow!("vector slab size overflow"))?;
        }

        let vectors = match quantization {
            Quantization::F32 => VectorStorage::F32(f32_slab),
            Quantization::F16 => VectorStorage::F16(f16_slab),
        };

        let header = BkviHeader::new(
            embedder_id,
            embedder_revision,
            dimension_u32,
            quantization,
            count_u32,
        )?;

        let index = Self {
            header,
            rows,
            vectors,
        };
        index.validate()?;
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if cfg!(target_endian = "big") {
            bail!("BKVI load is only supported on little-endian targets");
        }

        let file = File::open(path).with_context(|| format!("open BKVI file {path:?}"))?;
        let metadata = file.metadata().context("read BKVI metadata")?;
        let file_len = metadata.len();
        if file_len == 0 {
            bail!("BKVI file is empty");
        }

        let mmap = unsafe { Mmap::map(&file).context("mmap BKVI file")? };
        let mut cursor = Cursor::new(&mmap[..]);
        let header = BkviHeader::read_from(&mut cursor).context("read BKVI header")?;
        let header_len = header.header_len_bytes()?;
        let rows_len = rows_size_bytes(header.count)?;
        let slab_offset = vector_slab_offset_bytes(header_len, header.count)?;
        let slab_size =
            vector_slab_size_bytes(header.count, header.dimension, header.quantization)?;

        let expected_len = slab_offset
            .checked_add(slab_size)
            .ok_or_else(|| anyhow!("BKVI file size overflow"))?;
        if file_len != expected_len as u64 {
            bail!(
                "BKVI file size mismatch (expected {}, got {})",
                expected_len,
                file_len
            );
        }

        let rows_start = header_len;
        let rows_end = rows_start
            .checked_add(rows_len)
            .ok_or_else(|| anyhow!("rows offset overflow"))?;
        let rows_bytes = mmap
            .get(rows_start..rows_end)
            .ok_or_else(|| anyhow!("rows out of bounds"))?;
        let mut rows = Vec::with_capacity(header.count as usize);
        for chunk in rows_bytes.chunks_exact(ROW_SIZE_BYTES) {
            rows.push(VectorRow::from_bytes(chunk)?);
        }
        if rows.len() != header.count as usize {
            bail!(
                "row count mismatch: expected {}, got {}",
                header.count,
                rows.len()
            );
        }

        validate_row_offsets(
            &rows,
            header.dimension as usize,
            header.quantization,
            slab_size,
        )?;

        let vectors = VectorStorage::Mmap {
            mmap,
            offset: slab_offset,
            len: slab_size,
        };

        let index = Self {
            header,
            rows,
            vectors,
        };
        index.validate()?;
        Ok(index)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create index directory {parent:?}"))?;
        let temp_path = path.with_extension("bkvi.tmp");
        let mut file = File::create(&temp_path)
            .with_context(|| format!("create temp BKVI file {temp_path:?}"))?;
        self.write_to(&mut file)?;
        file.sync_all().context("fsync BKVI temp file")?;
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("rename BKVI temp file {temp_path:?}"))?;
        sync_dir(parent).context("fsync BKVI directory")?;
        Ok(())
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        self.validate()?;
        let header_len = self.header.header_len_bytes()?;
        let written = self.header.write_to(&mut writer)?;
        if written != header_len {
            bail!("header length mismatch: expected {header_len}, wrote {written}");
        }

        for row in &self.rows {
            row.write_to(&mut writer)?;
        }

        let rows_len = rows_size_bytes(self.header.count)?;
        let slab_offset = vector_slab_offset_bytes(header_len, self.header.count)?;
        let padding_len = slab_offset
            .checked_sub(header_len + rows_len)
            .ok_or_else(|| anyhow!("padding length underflow"))?;
        if padding_len > 0 {
            writer.write_all(&vec![0u8; padding_len])?;
        }

        match &self.vectors {
            VectorStorage::F32(values) => {
                for v in values {
                    writer.write_all(&v.to_le_bytes())?;
                }
            }
            VectorStorage::F16(values) => {
                for v in values {
                    writer.write_all(&v.to_le_bytes())?;
                }
            }
            VectorStorage::Mmap { mmap, offset, len } => {
                let end = offset
                    .checked_add(*len)
                    .ok_or_else(|| anyhow!("slab range overflow"))?;
                let slab = mmap
                    .get(*offset..end)
                    .ok_or_else(|| anyhow!("slab out of bounds"))?;
                writer.write_all(slab)?;
            }
        }
        Ok(())
    }

    pub fn header(&self) -> &BkviHeader {
        &self.header
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[VectorRow] {
        &self.rows
    }

    /// Stored (normalized) vector for a book; the title-mention path uses it
    /// as the query vector.
    pub fn vector_for_book(&self, book_id: u32) -> Result<Option<Vec<f32>>> {
        let Some(row) = self.rows.iter().find(|r| r.book_id == book_id) else {
            return Ok(None);
        };
        self.vector_at_f32(row).map(Some)
    }

    pub fn search_top_k(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        if query_vec.len() != self.header.dimension as usize {
            bail!(
                "query dimension mismatch: expected {}, got {}",
                self.header.dimension,
                query_vec.len()
            );
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        if *PARALLEL_SEARCH_ENABLED && self.rows.len() >= PARALLEL_THRESHOLD {
            return self.search_top_k_parallel(query_vec, k, filter);
        }

        self.search_top_k_sequential(query_vec, k, filter)
    }

    fn search_top_k_sequential(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for row in &self.rows {
            if let Some(filter) = filter {
                if !filter.matches(row) {
                    continue;
                }
            }
            let score = self.dot_product_at(row.vec_offset, query_vec)?;
            heap.push(std::cmp::Reverse(ScoredEntry {
                score,
                book_id: row.book_id,
            }));
            if heap.len() > k {
                heap.pop();
            }
        }
        Ok(collect_sorted(heap))
    }

    /// Parallel scan with thread-local heaps, merged at the end.
    fn search_top_k_parallel(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorSearchResult>> {
        let partial_results: Result<Vec<Vec<ScoredEntry>>> = self
            .rows
            .par_chunks(PARALLEL_CHUNK_SIZE)
            .map(|chunk| {
                let mut local_heap = BinaryHeap::with_capacity(k + 1);
                for row in chunk {
                    if let Some(f) = filter {
                        if !f.matches(row) {
                            continue;
                        }
                    }
                    let score = self.dot_product_at(row.vec_offset, query_vec)?;
                    local_heap.push(std::cmp::Reverse(ScoredEntry {
                        score,
                        book_id: row.book_id,
                    }));
                    if local_heap.len() > k {
                        local_heap.pop();
                    }
                }
                Ok(local_heap.into_iter().map(|r| r.0).collect())
            })
            .collect();

        let mut final_heap = BinaryHeap::with_capacity(k + 1);
        for entries in partial_results? {
            for entry in entries {
                final_heap.push(std::cmp::Reverse(entry));
                if final_heap.len() > k {
                    final_heap.pop();
                }
            }
        }
        Ok(collect_sorted(final_heap))
    }

    pub fn validate(&self) -> Result<()> {
        self.header.validate()?;
        if self.rows.len() != self.header.count as usize {
            bail!(
                "row count mismatch: header says {}, have {}",
                self.header.count,
                self.rows.len()
            );
        }
        let slab_size = vector_slab_size_bytes(
            self.header.count,
            self.header.dimension,
            self.header.quantization,
        )?;
        let storage_len = match &self.vectors {
            VectorStorage::F32(values) => values.len() * 4,
            VectorStorage::F16(values) => values.len() * 2,
            VectorStorage::Mmap { len, .. } => *len,
        };
        if storage_len != slab_size {
            bail!("vector slab size mismatch: expected {slab_size}, got {storage_len}");
        }
        validate_row_offsets(
            &self.rows,
            self.header.dimension as usize,
            self.header.quantization,
            slab_size,
        )
    }

    fn dot_product_at(&self, vec_offset: u64, query: &[f32]) -> Result<f32> {
        let dimension = self.header.dimension as usize;
        match &self.vectors {
            VectorStorage::F32(values) => {
                let start = vector_offset_to_index(vec_offset, 4)?;
                let slice = values
                    .get(start..start + dimension)
                    .ok_or_else(|| anyhow!("vector slice out of bounds"))?;
                Ok(dot_product(slice, query))
            }
            VectorStorage::F16(values) => {
                let start = vector_offset_to_index(vec_offset, 2)?;
                let slice = values
                    .get(start..start + dimension)
                    .ok_or_else(|| anyhow!("vector slice out of bounds"))?;
                Ok(dot_product_f16(slice, query))
            }
            VectorStorage::Mmap { mmap, offset, len } => {
                let bytes_per = self.header.quantization.bytes_per_component();
                let rel = usize::try_from(vec_offset)
                    .map_err(|_| anyhow!("vector offset out of range"))?;
                let vec_len = dimension * bytes_per;
                if rel + vec_len > *len {
                    bail!("vector slice out of bounds");
                }
                let start = offset + rel;
                let bytes = mmap
                    .get(start..start + vec_len)
                    .ok_or_else(|| anyhow!("vector slice out of bounds"))?;
                match self.header.quantization {
                    Quantization::F32 => Ok(dot_product(bytes_as_f32(bytes)?, query)),
                    Quantization::F16 => Ok(dot_product_f16(bytes_as_f16(bytes)?, query)),
                }
            }
        }
    }

    fn vector_at_f32(&self, row: &VectorRow) -> Result<Vec<f32>> {
        let dimension = self.header.dimension as usize;
        match &self.vectors {
            VectorStorage::F32(values) => {
                let start = vector_offset_to_index(row.vec_offset, 4)?;
                let slice = values
                    .get(start..start + dimension)
                    .ok_or_else(|| anyhow!("vector slice out of bounds"))?;
                Ok(slice.to_vec())
            }
            VectorStorage::F16(values) => {
                let start = vector_offset_to_index(row.vec_offset, 2)?;
                let slice = values
                    .get(start..start + dimension)
                    .ok_or_else(|| anyhow!("vector slice out of bounds"))?;
                Ok(slice.iter().map(|v| f32::from(*v)).collect())
            }
            VectorStorage::Mmap { mmap, offset, len } => {
                let bytes_per = self.header.quantization.bytes_per_component();
                let rel = usize::try_from(row.vec_offset)
                    .map_err(|_| anyhow!("vector offset out of range"))?;
                let vec_len = dimension * bytes_per;
                if rel + vec_len > *len {
                    bail!("vector slice out of bounds");
                }
                let start = offset + rel;
                let bytes = mmap
                    .get(start..start + vec_len)
                    .ok_or_else(|| anyhow!("vector slice out of bounds"))?;
                match self.header.quantization {
                    Quantization::F32 => Ok(bytes_as_f32(bytes)?.to_vec()),
                    Quantization::F16 => {
                        Ok(bytes_as_f16(bytes)?.iter().map(|v| f32::from(*v)).collect())
                    }
                }
            }
        }
    }
}

fn collect_sorted(heap: BinaryHeap<std::cmp::Reverse<ScoredEntry>>) -> Vec<VectorSearchResult> {
    let mut results: Vec<VectorSearchResult> = heap
        .into_iter()
        .map(|entry| VectorSearchResult {
            book_id: entry.0.book_id,
            score: entry.0.score,
        })
        .collect();
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.book_id.cmp(&b.book_id))
    });
    results
}

pub fn rows_size_bytes(count: u32) -> Result<usize> {
    (count as usize)
        .checked_mul(ROW_SIZE_BYTES)
        .ok_or_else(|| anyhow!("rows size overflow"))
}

/// Slab start, rounded up so vectors begin on a 32-byte boundary from the
/// start of the file.
pub fn vector_slab_offset_bytes(header_len: usize, count: u32) -> Result<usize> {
    let rows_len = rows_size_bytes(count)?;
    let unaligned = header_len
        .checked_add(rows_len)
        .ok_or_else(|| anyhow!("slab offset overflow"))?;
    let rem = unaligned % VECTOR_ALIGN_BYTES;
    if rem == 0 {
        Ok(unaligned)
    } else {
        unaligned
            .checked_add(VECTOR_ALIGN_BYTES - rem)
            .ok_or_else(|| anyhow!("slab offset overflow"))
    }
}

pub fn vector_slab_size_bytes(count: u32, dimension: u32, quantization: Quantization) -> Result<usize> {
    (count as usize)
        .checked_mul(dimension as usize)
        .and_then(|n| n.checked_mul(quantization.bytes_per_component()))
        .ok_or_else(|| anyhow!("slab size overflow"))
}

fn vector_offset_to_index(offset: u64, bytes_per: u64) -> Result<usize> {
    if offset % bytes_per != 0 {
        bail!("vector offset {offset} is not aligned to {bytes_per}");
    }
    usize::try_from(offset / bytes_per).map_err(|_| anyhow!("vector offset out of range"))
}

fn validate_row_offsets(
    rows: &[VectorRow],
    dimension: usize,
    quantization: Quantization,
    slab_size: usize,
) -> Result<()> {
    let bytes_per = quantization.bytes_per_component();
    let vec_len = dimension * bytes_per;
    for row in rows {
        let offset =
            usize::try_from(row.vec_offset).map_err(|_| anyhow!("vector offset out of range"))?;
        if offset % bytes_per != 0 {
            bail!("row for book {} has misaligned offset {offset}", row.book_id);
        }
        let end = offset
            .checked_add(vec_len)
            .ok_or_else(|| anyhow!("vector end overflow"))?;
        if end > slab_size {
            bail!(
                "row for book {} points past the vector slab ({end} > {slab_size})",
                row.book_id
            );
        }
    }
    Ok(())
}

fn bytes_as_f32(bytes: &[u8]) -> Result<&[f32]> {
    // SAFETY: alignment and length are checked; f32 has no invalid bit patterns.
    let (pre, values, post) = unsafe { bytes.align_to::<f32>() };
    if !pre.is_empty() || !post.is_empty() {
        bail!("misaligned f32 vector slab");
    }
    Ok(values)
}

fn bytes_as_f16(bytes: &[u8]) -> Result<&[f16]> {
    // SAFETY: alignment and length are checked; f16 has no invalid bit patterns.
    let (pre, values, post) = unsafe { bytes.align_to::<f16>() };
    if !pre.is_empty() || !post.is_empty() {
        bail!("misaligned f16 vector slab");
    }
    Ok(values)
}

fn sync_dir(path: &Path) -> std::io::Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()
}

// Header readers accumulate the raw bytes so the trailing CRC can be checked.

fn read_exact_array<const N: usize, R: Read>(reader: &mut R, accum: &mut Vec<u8>) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    accum.extend_from_slice(&buf);
    Ok(buf)
}

fn read_exact_vec<R: Read>(reader: &mut R, len: usize, accum: &mut Vec<u8>) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    accum.extend_from_slice(&buf);
    Ok(buf)
}

fn read_u8<R: Read>(reader: &mut R, accum: &mut Vec<u8>) -> Result<u8> {
    Ok(read_exact_array::<1, _>(reader, accum)?[0])
}

fn read_u16_le<R: Read>(reader: &mut R, accum: &mut Vec<u8>) -> Result<u16> {
    Ok(u16::from_le_bytes(read_exact_array::<2, _>(reader, accum)?))
}

fn read_u32_le<R: Read>(reader: &mut R, accum: &mut Vec<u8>) -> Result<u32> {
    Ok(u32::from_le_bytes(read_exact_array::<4, _>(reader, accum)?))
}

fn read_u32_le_no_accum<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Scalar dot product (fallback when SIMD is disabled).
#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// SIMD dot product, 8 lanes per iteration. FP reordering causes ~1e-7
/// relative error vs scalar, which does not change ranking order.
#[inline]
fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    use wide::f32x8;

    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        // SAFETY: chunks_exact guarantees exactly 8 elements.
        let arr_a: [f32; 8] = ca.try_into().unwrap();
        let arr_b: [f32; 8] = cb.try_into().unwrap();
        sum += f32x8::from(arr_a) * f32x8::from(arr_b);
    }

    let mut scalar_sum: f32 = sum.reduce_add();
    for (a, b) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += a * b;
    }
    scalar_sum
}

/// Set BOOKREC_SIMD_DOT=0 to force the scalar path.
static SIMD_DOT_ENABLED: once_cell::sync::Lazy<bool> = once_cell::sync::Lazy::new(|| {
    dotenvy::var("BOOKREC_SIMD_DOT")
        .map(|v| v != "0" && v.to_lowercase() != "false")
        .unwrap_or(true)
});

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if *SIMD_DOT_ENABLED {
        dot_product_simd(a, b)
    } else {
        dot_product_scalar(a, b)
    }
}

#[inline]
fn dot_product_f16(a: &[f16], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| f32::from(*x) * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(book_id: u32, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            book_id,
            content_hash: [book_id as u8; 32],
            vector,
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    fn sample_index(quant: Quantization) -> VectorIndex {
        VectorIndex::build(
            "fnv1a-384",
            "1",
            8,
            quant,
            vec![
                entry(1, unit(8, 0)),
                entry(2, unit(8, 1)),
                entry(3, vec![0.7, 0.7, 0.0, 0.0, 0.0, 0.0, 0.0, 0.14]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn search_ranks_by_dot_product() {
        let index = sample_index(Quantization::F32);
        let results = index.search_top_k(&unit(8, 0), 2, None).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].book_id, 1);
        assert!(results[0].score > results[1].score);
        assert_eq!(results[1].book_id, 3);
    }

    #[test]
    fn filter_excludes_books() {
        let index = sample_index(Quantization::F32);
        let filter = SearchFilter::excluding([1]);
        let results = index.search_top_k(&unit(8, 0), 3, Some(&filter)).unwrap();
        assert!(results.iter().all(|r| r.book_id != 1));
    }

    #[test]
    fn save_load_roundtrip_preserves_header_and_ranking() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("vector_index").join("index-fnv1a-384.bkvi");
        let index = sample_index(Quantization::F32);
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.header(), index.header());
        assert_eq!(loaded.len(), 3);
        let a = index.search_top_k(&unit(8, 1), 3, None).unwrap();
        let b = loaded.search_top_k(&unit(8, 1), 3, None).unwrap();
        assert_eq!(
            a.iter().map(|r| r.book_id).collect::<Vec<_>>(),
            b.iter().map(|r| r.book_id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn f16_quantization_roundtrips_with_tolerable_loss() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("index-fnv1a-384.bkvi");
        let index = sample_index(Quantization::F16);
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        let results = loaded.search_top_k(&unit(8, 0), 1, None).unwrap();
        assert_eq!(results[0].book_id, 1);
        assert!((results[0].score - 1.0).abs() < 1e-2);
    }

    #[test]
    fn corrupted_header_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("index.bkvi");
        sample_index(Quantization::F32).save(&path).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[6] ^= 0xff; // inside the embedder id length
        std::fs::write(&path, &bytes).unwrap();
        assert!(VectorIndex::load(&path).is_err());
    }

    #[test]
    fn truncated_file_is_rejected() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("index.bkvi");
        sample_index(Quantization::F32).save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 8]).unwrap();
        assert!(VectorIndex::load(&path).is_err());
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let index = sample_index(Quantization::F32);
        assert!(index.search_top_k(&unit(4, 0), 2, None).is_err());
        assert!(VectorIndex::build("x", "1", 8, Quantization::F32, vec![entry(1, unit(4, 0))])
            .is_err());
    }

    #[test]
    fn vector_for_book_returns_stored_vector() {
        let index = sample_index(Quantization::F32);
        let v = index.vector_for_book(2).unwrap().unwrap();
        assert_eq!(v, unit(8, 1));
        assert!(index.vector_for_book(99).unwrap().is_none());
    }

    #[test]
    fn simd_and_scalar_dot_products_agree() {
        let a: Vec<f32> = (0..384).map(|i| (i as f32).sin()).collect();
        let b: Vec<f32> = (0..384).map(|i| (i as f32).cos()).collect();
        let simd = dot_product_simd(&a, &b);
        let scalar = dot_product_scalar(&a, &b);
        assert!((simd - scalar).abs() < 1e-3);
    }

    #[test]
    fn empty_index_searches_empty() {
        let index =
            VectorIndex::build("fnv1a-384", "1", 8, Quantization::F32, Vec::new()).unwrap();
        assert!(index.search_top_k(&unit(8, 0), 5, None).unwrap().is_empty());
    }
}
