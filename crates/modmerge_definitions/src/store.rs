//! Backing storage for [`IndexedDefinitions`](crate::IndexedDefinitions).
//!
//! The index only keeps slot numbers in its key maps. Definitions themselves live
//! in a [`DefinitionStore`]:
//!
//! - [`MemoryStore`] keeps every definition behind an `Arc`.
//! - [`DiskStore`] appends each definition as a length-prefixed MessagePack record
//!   to an anonymous temporary file and decodes it again on lookup. Memory use is
//!   one offset per definition.
//!
//! Which one is used is decided by [`StoreKind`] at construction time. Lookups go
//! through the trait, so index callers never branch on it.

use crate::definition::Definition;
use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

/// Slot-addressed definition storage.
pub trait DefinitionStore: Send + Sync {
    /// Append a definition and return its slot.
    fn insert(&mut self, definition: Definition) -> Result<usize>;

    /// Fetch the definition in `slot`.
    ///
    /// Returns `None` for unknown slots. Disk-backed stores also return `None`
    /// (after logging) if the record cannot be read back.
    fn get(&self, slot: usize) -> Option<Arc<Definition>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stored definition.
    fn clear(&mut self) -> Result<()>;
}

/// Which [`DefinitionStore`] an index is built on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum StoreKind {
    #[default]
    Memory,
    /// Disk-resident store. The backing file is created in `directory`, or the
    /// system temp directory when unset, and removed when the store is dropped.
    Disk { directory: Option<Utf8PathBuf> },
}

impl StoreKind {
    pub fn create(&self) -> Result<Box<dyn DefinitionStore>> {
        match self {
            StoreKind::Memory => Ok(Box::new(MemoryStore::default())),
            StoreKind::Disk { directory } => Ok(Box::new(DiskStore::new(directory.clone())?)),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: Vec<Arc<Definition>>,
}

impl MemoryStore {
    /// Infallible insert, used when the store type is statically known.
    pub fn push(&mut self, definition: Definition) -> usize {
        self.definitions.push(Arc::new(definition));
        self.definitions.len() - 1
    }
}

impl DefinitionStore for MemoryStore {
    fn insert(&mut self, definition: Definition) -> Result<usize> {
        Ok(self.push(definition))
    }

    fn get(&self, slot: usize) -> Option<Arc<Definition>> {
        self.definitions.get(slot).cloned()
    }

    fn len(&self) -> usize {
        self.definitions.len()
    }

    fn clear(&mut self) -> Result<()> {
        self.definitions.clear();
        Ok(())
    }
}

/// Definitions spilled to a temporary file.
///
/// Record layout: `u32` little-endian length followed by the named MessagePack
/// encoding of the definition.
#[derive(Debug)]
pub struct DiskStore {
    directory: Option<Utf8PathBuf>,
    file: Mutex<File>,
    offsets: Vec<u64>,
    end: u64,
}

impl DiskStore {
    pub fn new(directory: Option<Utf8PathBuf>) -> Result<Self> {
        let file = Self::open(directory.as_ref())?;
        Ok(Self {
            directory,
            file: Mutex::new(file),
            offsets: Vec::new(),
            end: 0,
        })
    }

    fn open(directory: Option<&Utf8PathBuf>) -> Result<File> {
        let file = match directory {
            Some(dir) => {
                std::fs::create_dir_all(dir.as_std_path())?;
                tempfile::tempfile_in(dir.as_std_path())?
            }
            None => tempfile::tempfile()?,
        };
        Ok(file)
    }

    fn read_record(&self, offset: u64) -> Result<Definition> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(offset))?;
        let len = file.read_u32::<LittleEndian>()? as usize;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(rmp_serde::from_slice(&buf)?)
    }
}

impl DefinitionStore for DiskStore {
    fn insert(&mut self, definition: Definition) -> Result<usize> {
        let encoded = rmp_serde::to_vec_named(&definition)?;
        let len =
            u32::try_from(encoded.len()).map_err(|_| Error::RecordTooLarge(encoded.len()))?;

        let file = self.file.get_mut().unwrap_or_else(|e| e.into_inner());
        file.seek(SeekFrom::Start(self.end))?;
        file.write_u32::<LittleEndian>(len)?;
        file.write_all(&encoded)?;

        self.offsets.push(self.end);
        self.end += 4 + u64::from(len);
        Ok(self.offsets.len() - 1)
    }

    fn get(&self, slot: usize) -> Option<Arc<Definition>> {
        let offset = *self.offsets.get(slot)?;
        match self.read_record(offset) {
            Ok(definition) => Some(Arc::new(definition)),
            Err(e) => {
                tracing::error!(
                    "Failed to read definition slot {} from disk store: {}",
                    slot,
                    e
                );
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.offsets.len()
    }

    fn clear(&mut self) -> Result<()> {
        let fresh = Self::open(self.directory.as_ref())?;
        *self.file.get_mut().unwrap_or_else(|e| e.into_inner()) = fresh;
        self.offsets.clear();
        self.end = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_type::ValueType;

    fn definition(id: &str) -> Definition {
        Definition::builder("events", id, "events/test.txt")
            .mod_name("Mod A")
            .code(format!("{} = {{ is_triggered_only = yes }}", id))
            .build()
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::default();
        assert!(store.is_empty());

        let slot = store.insert(definition("a")).unwrap();
        assert_eq!(slot, 0);
        assert_eq!(store.get(0).unwrap().id(), "a");
        assert!(store.get(1).is_none());

        store.clear().unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_disk_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let mut store = DiskStore::new(Some(dir)).unwrap();

        let a = definition("a");
        let b = Definition::builder("gfx", "icon.dds", "gfx/icon.dds")
            .value_type(ValueType::Binary)
            .raw_bytes(b"DDS ")
            .build();

        assert_eq!(store.insert(a.clone()).unwrap(), 0);
        assert_eq!(store.insert(b.clone()).unwrap(), 1);

        // Read out of insertion order to exercise seeking.
        assert_eq!(*store.get(1).unwrap(), b);
        assert_eq!(*store.get(0).unwrap(), a);
        assert_eq!(store.get(0).unwrap().definition_sha(), a.definition_sha());
        assert!(store.get(2).is_none());
    }

    #[test]
    fn test_disk_store_clear() {
        let mut store = DiskStore::new(None).unwrap();
        store.insert(definition("a")).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());

        assert_eq!(store.insert(definition("b")).unwrap(), 0);
        assert_eq!(store.get(0).unwrap().id(), "b");
    }

    #[test]
    fn test_store_kind_create() {
        let store = StoreKind::Disk { directory: None }.create().unwrap();
        assert!(store.is_empty());
        let store = StoreKind::default().create().unwrap();
        assert!(store.is_empty());
    }
}
