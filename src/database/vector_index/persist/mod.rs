//! On-disk layout of a named vector index.
//!
//! `<index_dir>/<name>/CURRENT` names the live generation. Each generation is a
//! pair of files: `<generation>.arrow` (Arrow IPC, one `vector` column) and
//! `<generation>.map.json` (slot to chunk id). Both are written and synced
//! before `CURRENT` is atomically replaced, so readers see the old pair or the
//! new pair and never a mix.


use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, FixedSizeListArray, Float32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::flat::FlatIndex;

const CURRENT_FILE: &str = "CURRENT";
const VECTOR_COLUMN: &str = "vector";

/// Ordered mapping from vector slot to chunk id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIdMap {
    chunk_ids: Vec<Uuid>,
}

impl ChunkIdMap {
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            chunk_ids: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn push(&mut self, chunk_id: Uuid) -> usize {
        self.chunk_ids.push(chunk_id);
        self.chunk_ids.len() - 1
    }

    #[inline]
    pub fn get(&self, slot: usize) -> Option<Uuid> {
        self.chunk_ids.get(slot).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }

    #[inline]
    pub fn chunk_ids(&self) -> &[Uuid] {
        &self.chunk_ids
    }
}

impl FromIterator<Uuid> for ChunkIdMap {
    #[inline]
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        Self {
            chunk_ids: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MapFile {
    dimension: usize,
    total_vectors: usize,
    #[serde(flatten)]
    map: ChunkIdMap,
}

/// Paths of one persisted index generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFiles {
    pub index_path: PathBuf,
    pub map_path: PathBuf,
}

/// An index and its map as read back from disk
#[derive(Debug)]
pub struct StoredIndex {
    pub index: FlatIndex,
    pub map: ChunkIdMap,
    pub files: IndexFiles,
}

#[derive(Debug, Clone)]
pub struct IndexStorage {
    dir: PathBuf,
}

impl IndexStorage {
    #[inline]
    pub fn new(index_dir: &Path, name: &str) -> Self {
        Self {
            dir: index_dir.join(name),
        }
    }

    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn files_for(&self, generation: &str) -> IndexFiles {
        IndexFiles {
            index_path: self.dir.join(format!("{generation}.arrow")),
            map_path: self.dir.join(format!("{generation}.map.json")),
        }
    }

    /// Persist a new generation and make it current
    #[inline]
    pub fn save(&self, index: &FlatIndex, map: &ChunkIdMap) -> Result<IndexFiles> {
        if index.len() != map.len() {
            bail!(
                "refusing to save {} vectors with {} map entries",
                index.len(),
                map.len()
            );
        }

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create index directory {}", self.dir.display()))?;

        let generation = Uuid::new_v4().simple().to_string();
        let files = self.files_for(&generation);

        write_atomically(&files.index_path, |writer| write_vectors(writer, index))?;
        write_atomically(&files.map_path, |writer| {
            let map_file = MapFile {
                dimension: index.dimension(),
                total_vectors: index.len(),
                map: map.clone(),
            };
            serde_json::to_writer(writer, &map_file).context("Failed to serialize chunk map")
        })?;
        write_atomically(&self.dir.join(CURRENT_FILE), |writer| {
            writer
                .write_all(generation.as_bytes())
                .context("Failed to write index pointer")
        })?;
        sync_dir(&self.dir);

        debug!(
            "Saved index generation {} ({} vectors) to {}",
            generation,
            index.len(),
            self.dir.display()
        );
        self.remove_stale(&generation);

        Ok(files)
    }

    /// Files of the current generation, or `None` when nothing was saved yet
    #[inline]
    pub fn current_files(&self) -> Result<Option<IndexFiles>> {
        let pointer = self.dir.join(CURRENT_FILE);
        let generation = match fs::read_to_string(&pointer) {
            Ok(content) => content.trim().to_string(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", pointer.display()));
            }
        };

        if generation.is_empty() || !generation.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("Index pointer {} is malformed", pointer.display());
        }

        Ok(Some(self.files_for(&generation)))
    }

    /// Read the current generation back. `Ok(None)` means no index was ever saved.
    ///
    /// The map and vectors are returned as read; callers decide whether a
    /// size mismatch is acceptable.
    #[inline]
    pub fn load(&self) -> Result<Option<StoredIndex>> {
        let Some(files) = self.current_files()? else {
            return Ok(None);
        };

        let index = read_vectors(&files.index_path)?;

        let map_reader = BufReader::new(
            File::open(&files.map_path)
                .with_context(|| format!("Failed to open {}", files.map_path.display()))?,
        );
        let map_file: MapFile = serde_json::from_reader(map_reader)
            .with_context(|| format!("Failed to parse {}", files.map_path.display()))?;

        if map_file.dimension != index.dimension() {
            bail!(
                "Chunk map was written for {} dimensions but vectors have {}",
                map_file.dimension,
                index.dimension()
            );
        }

        debug!(
            "Loaded {} vectors and {} map entries from {}",
            index.len(),
            map_file.map.len(),
            self.dir.display()
        );

        Ok(Some(StoredIndex {
            index,
            map: map_file.map,
            files,
        }))
    }

    fn remove_stale(&self, live_generation: &str) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list {} for cleanup: {}", self.dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == CURRENT_FILE || name.starts_with(live_generation) {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!("Failed to remove stale index file {}: {}", name, e);
            }
        }
    }
}

fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    let mut writer = BufWriter::new(file);
    write(&mut writer)?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
    writer
        .get_ref()
        .sync_all()
        .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
    drop(writer);

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))
}

fn sync_dir(dir: &Path) {
    // Directory handles cannot be synced on every platform
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Skipping directory sync for {}: {}", dir.display(), e);
    }
}

fn vector_field(dimension: i32) -> Field {
    Field::new(
        VECTOR_COLUMN,
        DataType::FixedSizeList(
            Arc::new(Field::new("item", DataType::Float32, false)),
            dimension,
        ),
        false,
    )
}

fn write_vectors(writer: &mut BufWriter<File>, index: &FlatIndex) -> Result<()> {
    let dimension = i32::try_from(index.dimension()).context("Index dimension too large")?;
    let schema = Arc::new(Schema::new(vec![vector_field(dimension)]));

    let values = Float32Array::from(index.values().to_vec());
    let item = Arc::new(Field::new("item", DataType::Float32, false));
    let vectors = FixedSizeListArray::try_new(item, dimension, Arc::new(values), None)
        .context("Failed to create vector array")?;
    let batch = RecordBatch::try_new(Arc::clone(&schema), vec![Arc::new(vectors)])
        .context("Failed to create record batch")?;

    let mut ipc = FileWriter::try_new(writer, &schema).context("Failed to open IPC writer")?;
    ipc.write(&batch).context("Failed to write vectors")?;
    ipc.finish().context("Failed to finish IPC file")?;
    Ok(())
}

fn read_vectors(path: &Path) -> Result<FlatIndex> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = FileReader::try_new(BufReader::new(file), None)
        .with_context(|| format!("Failed to read IPC header of {}", path.display()))?;

    let schema = reader.schema();
    let field = schema
        .field_with_name(VECTOR_COLUMN)
        .context("Index file has no vector column")?;
    let dimension = match field.data_type() {
        DataType::FixedSizeList(_, size) => {
            usize::try_from(*size).context("Negative vector dimension")?
        }
        other => bail!("Unexpected vector column type {other}"),
    };

    let mut values = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("Failed to read batch from {}", path.display()))?;
        let column = batch
            .column_by_name(VECTOR_COLUMN)
            .context("Missing vector column")?;
        let list = column
            .as_any()
            .downcast_ref::<FixedSizeListArray>()
            .context("Invalid vector column type")?;

        for row in 0..list.len() {
            let vector = list.value(row);
            let floats = vector
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("Invalid vector item type")?;
            values.extend_from_slice(floats.values());
        }
    }

    FlatIndex::from_values(dimension, values).context("Stored vectors are malformed")
}
