use std::fs;
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// A single JSON document on disk, always rewritten whole.
///
/// Writes go to a uniquely named sibling temp file which is then renamed over
/// the target, so readers see either the old document or the new one.
/// Overlapping `save` calls never fail; the last rename wins.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. A missing file is an empty document; an unreadable
    /// or unparseable one is logged and also treated as empty. The next
    /// successful `save` replaces it.
    pub fn load(&self) -> T {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return T::default(),
            Err(e) => {
                log::error!("Could not read {}: {e}; starting empty", self.path.display());
                return T::default();
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "Corrupt data in {}: {e}; treating as empty (file is replaced on next write)",
                    self.path.display()
                );
                T::default()
            }
        }
    }

    /// Serialize and atomically replace the document.
    pub fn save(&self, value: &T) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let json = serde_json::to_vec_pretty(value)?;
        let tmp = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Doc> = JsonFile::new(dir.path().join("doc.json"));
        assert_eq!(file.load(), Doc::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let file: JsonFile<Doc> = JsonFile::new(dir.path().join("nested/doc.json"));
        let doc = Doc {
            name: "a".into(),
            count: 3,
        };
        file.save(&doc).unwrap();
        assert_eq!(file.load(), doc);
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("doc.json")]);
    }

    #[test]
    fn test_corrupt_file_loads_default_and_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{not json").unwrap();

        let file: JsonFile<Doc> = JsonFile::new(&path);
        assert_eq!(file.load(), Doc::default());

        file.save(&Doc {
            name: "fixed".into(),
            count: 1,
        })
        .unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&raw).is_ok());
        assert_eq!(file.load().name, "fixed");
    }

    #[test]
    fn test_save_into_unwritable_location_errors() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not a directory").unwrap();

        let file: JsonFile<Doc> = JsonFile::new(blocker.join("doc.json"));
        assert!(file.save(&Doc::default()).is_err());
    }

    #[test]
    fn test_overlapping_saves_on_one_path_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        std::thread::scope(|scope| {
            for t in 0..4u32 {
                let path = path.clone();
                scope.spawn(move || {
                    let file: JsonFile<Doc> = JsonFile::new(path);
                    for count in 0..50 {
                        file.save(&Doc {
                            name: format!("writer {t}"),
                            count,
                        })
                        .unwrap();
                    }
                });
            }
        });

        let file: JsonFile<Doc> = JsonFile::new(&path);
        assert_eq!(file.load().count, 49);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
