//! Dataset readers.
//!
//! Two loaders consume the layout written by the recorder:
//!
//! - [`TactileDataset`] loads every item into memory at once and stacks each
//!   field along a new leading axis. Suited to datasets that fit in RAM.
//! - [`StreamingDataset`] infers a per-field [`FieldSpec`] from the first item
//!   and then decodes items one at a time, rejecting any that deviate.
//!
//! Both expose the config archive as [`ConfigSnapshot`] and index items in
//! ascending file-name order.

use crate::data::item::{DatasetItem, Field};
use crate::data::npz;
use crate::data::storage::DatasetLayout;
use crate::data::tensor::{DType, Scalar, Tensor};
use crate::error::{AppResult, DaqError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Settings archive of a dataset, one array per setting.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    entries: BTreeMap<String, Tensor>,
}

impl ConfigSnapshot {
    /// Load `config.npz` from a dataset directory.
    pub fn load(layout: &DatasetLayout) -> AppResult<Self> {
        let path = layout.config_path();
        if !path.exists() {
            return Err(DaqError::Dataset(format!(
                "No config archive at {}",
                path.display()
            )));
        }
        Ok(Self {
            entries: npz::read_npz(&path)?,
        })
    }

    /// Value of a one-element setting.
    pub fn get(&self, key: &str) -> Option<Scalar> {
        self.entries.get(key).and_then(Tensor::item)
    }

    /// Raw array of a setting, including multi-element ones.
    pub fn tensor(&self, key: &str) -> Option<&Tensor> {
        self.entries.get(key)
    }

    /// Setting names.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// One-element settings as a flat mapping of scalars.
    pub fn scalars(&self) -> BTreeMap<String, Scalar> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.item().map(|s| (k.clone(), s)))
            .collect()
    }
}

/// Shape and element type every item must have for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    /// Array shape.
    pub shape: Vec<usize>,
    /// Element type.
    pub dtype: DType,
}

impl FieldSpec {
    /// Spec describing `tensor`.
    pub fn of(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape().to_vec(),
            dtype: tensor.dtype(),
        }
    }

    fn matches(&self, tensor: &Tensor) -> bool {
        self.shape == tensor.shape() && self.dtype.same_kind(&tensor.dtype())
    }
}

impl fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}", self.shape, self.dtype)
    }
}

/// In-memory dataset with every field stacked across items.
#[derive(Debug, Clone)]
pub struct TactileDataset {
    meta: ConfigSnapshot,
    items: DatasetItem,
    len: usize,
}

impl TactileDataset {
    /// Load the whole dataset at `dataset_dir`.
    pub fn open(dataset_dir: impl AsRef<Path>) -> AppResult<Self> {
        let layout = DatasetLayout::new(dataset_dir.as_ref());
        let meta = ConfigSnapshot::load(&layout)?;
        let paths = layout.item_paths()?;
        if paths.is_empty() {
            return Err(DaqError::Dataset(format!(
                "No items in {}",
                layout.items_dir().display()
            )));
        }

        let items = paths
            .iter()
            .map(|path| load_item(path))
            .collect::<AppResult<Vec<_>>>()?;
        let len = items.len();
        let stacked = DatasetItem::stack(&items)?;
        info!(root = %layout.root().display(), items = len, "dataset loaded");

        Ok(Self {
            meta,
            items: stacked,
            len,
        })
    }

    /// Dataset settings.
    pub fn meta(&self) -> &ConfigSnapshot {
        &self.meta
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the dataset has no items. Never true for an opened dataset.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Item `idx`.
    pub fn get(&self, idx: usize) -> AppResult<DatasetItem> {
        if idx >= self.len {
            return Err(DaqError::Dataset(format!(
                "Index {} out of range for dataset of {} items",
                idx, self.len
            )));
        }
        self.items.index_axis0(idx)
    }

    /// Every field stacked across items.
    pub fn stacked(&self) -> &DatasetItem {
        &self.items
    }

    /// Per-item spec of each field.
    pub fn field_specs(&self) -> BTreeMap<Field, FieldSpec> {
        self.items
            .iter()
            .map(|(field, tensor)| {
                let shape = tensor.shape().get(1..).unwrap_or_default().to_vec();
                (
                    field,
                    FieldSpec {
                        shape,
                        dtype: tensor.dtype(),
                    },
                )
            })
            .collect()
    }
}

/// Lazily decoded dataset checked against the spec of its first item.
#[derive(Debug, Clone)]
pub struct StreamingDataset {
    meta: ConfigSnapshot,
    paths: Vec<PathBuf>,
    spec: BTreeMap<Field, FieldSpec>,
}

impl StreamingDataset {
    /// Open the dataset at `dataset_dir`, decoding only its first item.
    pub fn open(dataset_dir: impl AsRef<Path>) -> AppResult<Self> {
        let layout = DatasetLayout::new(dataset_dir.as_ref());
        let meta = ConfigSnapshot::load(&layout)?;
        let paths = layout.item_paths()?;
        let first = paths.first().ok_or_else(|| {
            DaqError::Dataset(format!("No items in {}", layout.items_dir().display()))
        })?;
        let spec = load_item(first)?
            .iter()
            .map(|(field, tensor)| (field, FieldSpec::of(tensor)))
            .collect();
        debug!(items = paths.len(), "streaming dataset opened");
        Ok(Self { meta, paths, spec })
    }

    /// Dataset settings.
    pub fn meta(&self) -> &ConfigSnapshot {
        &self.meta
    }

    /// Field specs inferred from the first item.
    pub fn spec(&self) -> &BTreeMap<Field, FieldSpec> {
        &self.spec
    }

    /// Number of item archives.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Returns true if there are no item archives.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Decode items in order, validating each against [`Self::spec`].
    pub fn iter(&self) -> impl Iterator<Item = AppResult<DatasetItem>> + '_ {
        (0..self.paths.len()).map(move |index| self.get(index))
    }

    /// Decode item `idx` and validate it against [`Self::spec`].
    pub fn get(&self, idx: usize) -> AppResult<DatasetItem> {
        let path = self.paths.get(idx).ok_or_else(|| {
            DaqError::Dataset(format!(
                "Index {} out of range for dataset of {} items",
                idx,
                self.paths.len()
            ))
        })?;
        let item = load_item(path)?;
        self.check(idx, &item)?;
        Ok(item)
    }

    fn check(&self, index: usize, item: &DatasetItem) -> AppResult<()> {
        for (field, spec) in &self.spec {
            match item.get(*field) {
                Some(tensor) if spec.matches(tensor) => {}
                Some(tensor) => {
                    return Err(DaqError::SpecMismatch {
                        index,
                        field: field.to_string(),
                        expected: spec.to_string(),
                        found: FieldSpec::of(tensor).to_string(),
                    })
                }
                None => {
                    return Err(DaqError::SpecMismatch {
                        index,
                        field: field.to_string(),
                        expected: spec.to_string(),
                        found: "missing".to_string(),
                    })
                }
            }
        }
        if let Some((field, tensor)) = item.iter().find(|(f, _)| !self.spec.contains_key(f)) {
            return Err(DaqError::SpecMismatch {
                index,
                field: field.to_string(),
                expected: "absent".to_string(),
                found: FieldSpec::of(tensor).to_string(),
            });
        }
        Ok(())
    }
}

fn load_item(path: &Path) -> AppResult<DatasetItem> {
    DatasetItem::from_entries(npz::read_npz(path)?)
}
