//! On-disk dataset layout.
//!
//! ```text
//! <dataset_dir>/
//!     config.npz        run settings, written once, uncompressed
//!     items/
//!         0000.npz      one compressed archive per episode
//!         0001.npz
//! ```
use crate::config::Settings;
use crate::data::item::DatasetItem;
use crate::data::npz::{self, Compression};
use crate::error::{AppResult, DaqError};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the settings archive at the dataset root.
pub const CONFIG_NAME: &str = "config.npz";
/// Name of the per-episode archive directory.
pub const ITEMS_DIR: &str = "items";
/// Extension of every archive in the dataset.
pub const ARCHIVE_EXT: &str = "npz";

/// Paths of a dataset directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    root: PathBuf,
}

impl DatasetLayout {
    /// Layout rooted at `root`. Nothing is touched on disk.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Dataset root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the settings archive.
    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_NAME)
    }

    /// Directory holding episode archives.
    pub fn items_dir(&self) -> PathBuf {
        self.root.join(ITEMS_DIR)
    }

    /// Archive path for episode `index`, zero-padded to four digits.
    pub fn item_path(&self, index: usize) -> PathBuf {
        self.items_dir().join(format!("{:04}.{}", index, ARCHIVE_EXT))
    }

    /// Create the items directory and any missing parents.
    pub fn ensure_items_dir(&self) -> AppResult<()> {
        let dir = self.items_dir();
        fs::create_dir_all(&dir).map_err(|err| {
            DaqError::Dataset(format!(
                "Failed to create items directory {}: {}",
                dir.display(),
                err
            ))
        })
    }

    /// Write the settings archive unless one already exists.
    ///
    /// Returns `true` when this call created it.
    pub fn write_config_once(&self, settings: &Settings) -> AppResult<bool> {
        let path = self.config_path();
        if path.exists() {
            debug!(path = %path.display(), "config archive present, leaving it untouched");
            return Ok(false);
        }
        let entries = settings.archive_entries();
        npz::write_npz(
            &path,
            entries.iter().map(|(k, v)| (k.as_str(), v)),
            Compression::Stored,
        )?;
        info!(path = %path.display(), "config archive written");
        Ok(true)
    }

    /// Item archives in ascending file-name order.
    ///
    /// Only visible `*.npz` files count; temporary files from an interrupted
    /// write are hidden and ignored.
    pub fn item_paths(&self) -> AppResult<Vec<PathBuf>> {
        let dir = self.items_dir();
        let listing = fs::read_dir(&dir).map_err(|err| {
            DaqError::Dataset(format!(
                "Failed to list items directory {}: {}",
                dir.display(),
                err
            ))
        })?;

        let mut paths = Vec::new();
        for entry in listing {
            let entry = entry?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let is_archive = path.extension().is_some_and(|ext| ext == ARCHIVE_EXT);
            if !hidden && is_archive && entry.file_type()?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Number of item archives already present.
    pub fn count_items(&self) -> AppResult<usize> {
        Ok(self.item_paths()?.len())
    }

    /// Persist one episode record as a compressed archive.
    pub fn write_item(&self, index: usize, item: &DatasetItem) -> AppResult<PathBuf> {
        let path = self.item_path(index);
        npz::write_npz(
            &path,
            item.iter().map(|(field, tensor)| (field.as_str(), tensor)),
            Compression::Deflated,
        )?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::item::Field;
    use crate::data::tensor::Tensor;
    use tempfile::tempdir;

    #[test]
    fn test_item_path_is_zero_padded() {
        let layout = DatasetLayout::new("dataset");
        assert_eq!(
            layout.item_path(7),
            PathBuf::from("dataset").join("items").join("0007.npz")
        );
        assert_eq!(
            layout.item_path(12345),
            PathBuf::from("dataset").join("items").join("12345.npz")
        );
    }

    #[test]
    fn test_config_written_once() {
        let dir = tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        layout.ensure_items_dir().unwrap();

        assert!(layout.write_config_once(&Settings::default()).unwrap());
        let first = fs::read(layout.config_path()).unwrap();

        let changed = Settings {
            seed: 99,
            ..Settings::default()
        };
        assert!(!layout.write_config_once(&changed).unwrap());
        assert_eq!(fs::read(layout.config_path()).unwrap(), first);
    }

    #[test]
    fn test_count_ignores_foreign_files() {
        let dir = tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path().join("nested").join("set"));
        layout.ensure_items_dir().unwrap();

        let item = DatasetItem::new().with(Field::Pos, Tensor::u8_1d(3));
        layout.write_item(0, &item).unwrap();
        layout.write_item(1, &item).unwrap();
        fs::write(layout.items_dir().join("notes.txt"), "hello").unwrap();
        fs::write(layout.items_dir().join(".0002.npz.partial"), "").unwrap();

        assert_eq!(layout.count_items().unwrap(), 2);
        assert_eq!(
            layout.item_paths().unwrap(),
            vec![layout.item_path(0), layout.item_path(1)]
        );
    }

    #[test]
    fn test_missing_items_dir_is_dataset_error() {
        let dir = tempdir().unwrap();
        let layout = DatasetLayout::new(dir.path());
        assert!(matches!(layout.count_items(), Err(DaqError::Dataset(_))));
    }
}
