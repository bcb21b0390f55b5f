use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const DATA_DIR_ENV: &str = "RAGSTASH_DATA_DIR";
const XDG_PREFIX: &str = "ragstash";

/// Root directory holding both redb databases. The lexical index keeps no
/// files here; it is rebuilt from the store on start.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory, in order of priority: an explicit path
    /// (from --data-dir), the `RAGSTASH_DATA_DIR` environment variable, or
    /// the XDG data home (`~/.local/share/ragstash/`). The directory is
    /// created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var(DATA_DIR_ENV) {
                Ok(val) => PathBuf::from(val),
                Err(_) => xdg::BaseDirectories::with_prefix(XDG_PREFIX)
                    .get_data_home()
                    .ok_or_else(|| {
                        Error::Config(
                            "could not determine XDG data home directory"
                                .into(),
                        )
                    })?,
            },
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_db(&self) -> PathBuf {
        self.root.join("store.redb")
    }

    pub fn vectors_db(&self) -> PathBuf {
        self.root.join("vectors.redb")
    }
}
