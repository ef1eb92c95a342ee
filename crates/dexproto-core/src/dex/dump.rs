//! JSON class dumps.
//!
//! A dump is a JSON document `{"classes": [...]}` of [`ClassDescriptor`]s as
//! exported from a disassembler. A dump can be a single file or a directory
//! tree of such files.

use super::{ClassDescriptor, ClassDirectory};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// On-disk document shape
#[derive(Debug, Deserialize)]
struct DumpFile {
    #[serde(default)]
    classes: Vec<ClassDescriptor>,
}

/// In-memory class directory backed by JSON dumps
#[derive(Debug, Clone, Default)]
pub struct DexDump {
    classes: HashMap<String, ClassDescriptor>,
}

impl DexDump {
    /// Creates an empty dump
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dump from already constructed classes
    pub fn from_classes(classes: impl IntoIterator<Item = ClassDescriptor>) -> Self {
        let mut dump = Self::new();
        for class in classes {
            dump.insert(class);
        }
        dump
    }

    /// Parses a dump document from a JSON string
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let file: DumpFile = serde_json::from_str(json)?;
        Ok(Self::from_classes(file.classes))
    }

    /// Loads a dump file, or every `*.json` file below a directory
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut dump = Self::new();

        if path.is_dir() {
            for entry in WalkDir::new(path)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let file = entry.path();
                if !file.is_file() || file.extension().and_then(|e| e.to_str()) != Some("json") {
                    trace!("Skipping {}", file.display());
                    continue;
                }
                dump.load_file(file)?;
            }
        } else {
            dump.load_file(path)?;
        }

        debug!("Loaded {} classes from {}", dump.len(), path.display());
        Ok(dump)
    }

    fn load_file(&mut self, path: &Path) -> Result<()> {
        let data = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, e))?;
        let file: DumpFile = serde_json::from_str(&data).map_err(|source| Error::DumpParse {
            path: path.to_path_buf(),
            source,
        })?;
        trace!("{}: {} classes", path.display(), file.classes.len());
        for class in file.classes {
            self.insert(class);
        }
        Ok(())
    }

    /// Adds a class, replacing any class with the same signature
    pub fn insert(&mut self, class: ClassDescriptor) {
        if let Some(previous) = self.classes.insert(class.signature.clone(), class) {
            warn!("Duplicate class {} in dump, keeping the later one", previous.signature);
        }
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Returns true if the dump holds no classes
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// All class signatures, sorted
    pub fn signatures(&self) -> Vec<&str> {
        let mut signatures: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        signatures.sort_unstable();
        signatures
    }
}

impl ClassDirectory for DexDump {
    fn lookup_class(&self, signature: &str) -> Result<Option<&ClassDescriptor>> {
        Ok(self.classes.get(signature))
    }
}
