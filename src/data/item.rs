//! The per-episode dataset record.
//!
//! A [`DatasetItem`] maps a fixed vocabulary of [`Field`]s to tensors. It is
//! filled from two sources within one episode: the sensing step produces the
//! sensor fields and the operator's description produces `obj_hardness`.
//! The two halves are merged with `|`, the right-hand side winning on shared
//! fields.
//!
//! Sensor fields:
//! - `pos`: gripper position in `[0, 255]`.
//! - `force`: requested gripper force.
//! - `object_detected`: whether the gripper stopped on an object.
//! - `left_sensor` / `right_sensor`: tactile sensor RGB frames.
//! - `wrist_camera`: wrist camera RGB frame.
//!
//! Object fields:
//! - `obj_hardness`: subjective hardness class of the object.
//!
//! Any field may carry an extra leading dimension when a series of touches is
//! stacked into one item.

use crate::data::tensor::Tensor;
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

/// Field names a dataset item may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    /// Gripper position.
    Pos,
    /// Requested gripper force.
    Force,
    /// Object contact flag.
    ObjectDetected,
    /// Left tactile sensor frame.
    LeftSensor,
    /// Right tactile sensor frame.
    RightSensor,
    /// Wrist camera frame.
    WristCamera,
    /// Operator-provided hardness class.
    ObjHardness,
}

impl Field {
    /// Every field, in archive order.
    pub const ALL: [Field; 7] = [
        Field::Pos,
        Field::Force,
        Field::ObjectDetected,
        Field::LeftSensor,
        Field::RightSensor,
        Field::WristCamera,
        Field::ObjHardness,
    ];

    /// Fields produced by sensing.
    pub const SENSOR: [Field; 6] = [
        Field::Pos,
        Field::Force,
        Field::ObjectDetected,
        Field::LeftSensor,
        Field::RightSensor,
        Field::WristCamera,
    ];

    /// Archive member name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Pos => "pos",
            Field::Force => "force",
            Field::ObjectDetected => "object_detected",
            Field::LeftSensor => "left_sensor",
            Field::RightSensor => "right_sensor",
            Field::WristCamera => "wrist_camera",
            Field::ObjHardness => "obj_hardness",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .iter()
            .find(|field| field.as_str() == s)
            .copied()
            .ok_or_else(|| DaqError::Dataset(format!("Unknown dataset field '{}'", s)))
    }
}

/// Subjective hardness class of a touched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HardnessClass {
    /// Deforms noticeably under the gripper.
    Soft = 0,
    /// Does not deform under the gripper.
    Hard = 1,
}

impl TryFrom<i64> for HardnessClass {
    type Error = DaqError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HardnessClass::Soft),
            1 => Ok(HardnessClass::Hard),
            other => Err(DaqError::InvalidDescription(format!(
                "{} is not a valid hardness class (Soft=0, Hard=1)",
                other
            ))),
        }
    }
}

impl FromStr for HardnessClass {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s.trim().parse().map_err(|_| {
            DaqError::InvalidDescription(format!("'{}' is not an integer", s.trim()))
        })?;
        HardnessClass::try_from(value)
    }
}

/// Operator-provided description of the object under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescription {
    /// Hardness class.
    pub hardness: HardnessClass,
}

impl ObjectDescription {
    /// The description as the object half of an episode record.
    pub fn to_item(&self) -> DatasetItem {
        DatasetItem::new().with(Field::ObjHardness, Tensor::i64_1d(self.hardness as i64))
    }
}

/// Structured record of one episode's sensor and label fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetItem {
    fields: BTreeMap<Field, Tensor>,
}

impl DatasetItem {
    /// Empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, field: Field, tensor: Tensor) -> Self {
        self.fields.insert(field, tensor);
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, field: Field, tensor: Tensor) -> Option<Tensor> {
        self.fields.insert(field, tensor)
    }

    /// Field value, if present.
    pub fn get(&self, field: Field) -> Option<&Tensor> {
        self.fields.get(&field)
    }

    /// Whether the field is present.
    pub fn contains(&self, field: Field) -> bool {
        self.fields.contains_key(&field)
    }

    /// Number of populated fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no field is populated.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Populated fields in archive order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, &Tensor)> {
        self.fields.iter().map(|(field, tensor)| (*field, tensor))
    }

    /// Names of the populated fields.
    pub fn field_names(&self) -> Vec<Field> {
        self.fields.keys().copied().collect()
    }

    /// Merge `other` into `self`; `other` wins on shared fields.
    pub fn merge(mut self, other: DatasetItem) -> Self {
        self.fields.extend(other.fields);
        self
    }

    /// Stack a series of items along a new leading axis.
    ///
    /// Every item must populate the same fields with equally shaped arrays.
    pub fn stack(series: &[DatasetItem]) -> AppResult<DatasetItem> {
        let first = series
            .first()
            .ok_or_else(|| DaqError::Array("Cannot stack an empty series".to_string()))?;
        let names = first.field_names();
        if let Some(position) = series.iter().position(|item| item.field_names() != names) {
            return Err(DaqError::Dataset(format!(
                "Item {} has fields {:?}, expected {:?}",
                position,
                series[position].field_names(),
                names
            )));
        }

        let mut stacked = DatasetItem::new();
        for field in names {
            let tensors: Vec<&Tensor> = series.iter().filter_map(|item| item.get(field)).collect();
            let tensor = Tensor::stack(&tensors)
                .map_err(|err| DaqError::Dataset(format!("Field '{}': {}", field, err)))?;
            stacked.insert(field, tensor);
        }
        Ok(stacked)
    }

    /// Item at `index` along the leading axis of every field.
    pub fn index_axis0(&self, index: usize) -> AppResult<DatasetItem> {
        let mut item = DatasetItem::new();
        for (field, tensor) in self.iter() {
            item.insert(field, tensor.index_axis0(index)?);
        }
        Ok(item)
    }

    /// Build an item from archive members.
    pub fn from_entries(entries: BTreeMap<String, Tensor>) -> AppResult<DatasetItem> {
        let mut item = DatasetItem::new();
        for (name, tensor) in entries {
            item.insert(name.parse()?, tensor);
        }
        Ok(item)
    }
}

impl BitOr for DatasetItem {
    type Output = DatasetItem;

    fn bitor(self, rhs: DatasetItem) -> DatasetItem {
        self.merge(rhs)
    }
}
