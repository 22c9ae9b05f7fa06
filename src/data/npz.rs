//! NumPy `.npz` archive reading and writing.
//!
//! An `.npz` file is a zip archive holding one `<name>.npy` member per array.
//! Archives written here load with `numpy.load` unchanged, and archives
//! written by `numpy.savez` / `numpy.savez_compressed` load here as long as
//! their arrays use a supported [`DType`].
//!
//! Writes go to a hidden sibling file first and are renamed into place, so a
//! reader never observes a half-written archive under its final name.

use crate::data::tensor::{DType, Tensor};
use crate::error::{AppResult, DaqError};
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use npyz::WriterBuilder;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Member compression for a written archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Stored members, like `numpy.savez`.
    Stored,
    /// Deflated members, like `numpy.savez_compressed`.
    Deflated,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Stored => CompressionMethod::Stored,
            Compression::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// Write `entries` to `path` as an `.npz` archive.
pub fn write_npz<'a, I>(path: &Path, entries: I, compression: Compression) -> AppResult<()>
where
    I: IntoIterator<Item = (&'a str, &'a Tensor)>,
{
    let partial = partial_path(path);
    let result = write_members(&partial, entries, compression)
        .and_then(|()| fs::rename(&partial, path).map_err(DaqError::from));
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_members<'a, I>(path: &Path, entries: I, compression: Compression) -> AppResult<()>
where
    I: IntoIterator<Item = (&'a str, &'a Tensor)>,
{
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(compression.method());

    for (name, tensor) in entries {
        zip.start_file(format!("{}.npy", name), options)?;
        write_npy(&mut zip, tensor)
            .map_err(|err| DaqError::Array(format!("Failed to encode '{}': {}", name, err)))?;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    debug!(path = %path.display(), "npz archive written");
    Ok(())
}

/// Hidden temporary name used while `path` is being written.
pub fn partial_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.partial", name))
}

/// Read every member of the `.npz` archive at `path`.
pub fn read_npz(path: &Path) -> AppResult<BTreeMap<String, Tensor>> {
    let file = File::open(path).map_err(|err| {
        DaqError::Dataset(format!("Failed to open archive {}: {}", path.display(), err))
    })?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    let mut entries = BTreeMap::new();

    for i in 0..archive.len() {
        let member = archive.by_index(i)?;
        let member_name = member.name().to_string();
        let name = member_name
            .strip_suffix(".npy")
            .unwrap_or(&member_name)
            .to_string();
        let tensor = read_npy(member).map_err(|err| {
            DaqError::Array(format!(
                "Failed to decode '{}' in {}: {}",
                name,
                path.display(),
                err
            ))
        })?;
        entries.insert(name, tensor);
    }

    Ok(entries)
}

fn write_npy<W: Write>(writer: W, tensor: &Tensor) -> AppResult<()> {
    let shape: Vec<u64> = tensor.shape().iter().map(|&d| d as u64).collect();
    match tensor {
        Tensor::U8(a) => write_plain(writer, &shape, a.iter().copied()),
        Tensor::Bool(a) => write_plain(writer, &shape, a.iter().copied()),
        Tensor::I64(a) => write_plain(writer, &shape, a.iter().copied()),
        Tensor::F64(a) => write_plain(writer, &shape, a.iter().copied()),
        Tensor::Str(a) => {
            let type_str: npyz::TypeStr = tensor
                .dtype()
                .descr()
                .parse()
                .map_err(|err| DaqError::Array(format!("{:?}", err)))?;
            let mut npy = npyz::WriteOptions::new()
                .dtype(npyz::DType::Plain(type_str))
                .shape(&shape)
                .writer(writer)
                .begin_nd()?;
            npy.extend(a.iter().map(String::as_str))?;
            npy.finish()?;
            Ok(())
        }
    }
}

fn write_plain<W, T>(writer: W, shape: &[u64], values: impl Iterator<Item = T>) -> AppResult<()>
where
    W: Write,
    T: npyz::AutoSerialize,
{
    let mut npy = npyz::WriteOptions::new()
        .default_dtype()
        .shape(shape)
        .writer(writer)
        .begin_nd()?;
    npy.extend(values)?;
    npy.finish()?;
    Ok(())
}

fn read_npy<R: Read>(reader: R) -> AppResult<Tensor> {
    let npy = npyz::NpyFile::new(reader)?;
    let shape: Vec<usize> = npy.shape().iter().map(|&d| d as usize).collect();
    let fortran = matches!(npy.order(), npyz::Order::Fortran);
    let descr = match npy.dtype() {
        npyz::DType::Plain(type_str) => type_str.to_string(),
        other => {
            return Err(DaqError::Array(format!(
                "Structured dtype {:?} is not supported",
                other
            )))
        }
    };

    Ok(match DType::from_descr(&descr)? {
        DType::U8 => Tensor::U8(to_array(&shape, fortran, npy.into_vec::<u8>()?)?),
        DType::Bool => Tensor::Bool(to_array(&shape, fortran, npy.into_vec::<bool>()?)?),
        DType::I64 => Tensor::I64(to_array(&shape, fortran, npy.into_vec::<i64>()?)?),
        DType::F64 => Tensor::F64(to_array(&shape, fortran, npy.into_vec::<f64>()?)?),
        DType::Unicode(_) => {
            Tensor::Str(to_array(&shape, fortran, npy.into_vec::<String>()?)?)
        }
    })
}

/// Array from flat member data, normalized to row-major layout.
fn to_array<T: Clone>(shape: &[usize], fortran: bool, data: Vec<T>) -> AppResult<ArrayD<T>> {
    let array = ArrayD::from_shape_vec(IxDyn(shape).set_f(fortran), data)?;
    if fortran {
        Ok(array.as_standard_layout().into_owned())
    } else {
        Ok(array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tensor::Scalar;
    use ndarray::Array3;
    use tempfile::tempdir;

    fn sample_entries() -> BTreeMap<String, Tensor> {
        let mut frame = Array3::<u8>::zeros((4, 5, 3));
        frame[[1, 2, 0]] = 200;
        let mut entries = BTreeMap::new();
        entries.insert("left_sensor".to_string(), Tensor::from(frame.into_dyn()));
        entries.insert("object_detected".to_string(), Tensor::bool_1d(true));
        entries.insert("force".to_string(), Tensor::f64_1d(2.5));
        entries.insert("seed".to_string(), Tensor::scalar(Scalar::Int(1)));
        entries.insert(
            "host".to_string(),
            Tensor::scalar(Scalar::Str("192.168.1.179".into())),
        );
        entries
    }

    #[test]
    fn test_compressed_archive_preserves_arrays() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0000.npz");
        let entries = sample_entries();

        write_npz(
            &path,
            entries.iter().map(|(k, v)| (k.as_str(), v)),
            Compression::Deflated,
        )
        .unwrap();

        let loaded = read_npz(&path).unwrap();
        assert_eq!(loaded, entries);
        assert_eq!(loaded["seed"].shape(), &[] as &[usize]);
    }

    #[test]
    fn test_members_are_named_like_numpy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.npz");
        let entries = sample_entries();
        write_npz(
            &path,
            entries.iter().map(|(k, v)| (k.as_str(), v)),
            Compression::Stored,
        )
        .unwrap();

        let archive = ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "force.npy",
                "host.npy",
                "left_sensor.npy",
                "object_detected.npy",
                "seed.npy"
            ]
        );
    }

    #[test]
    fn test_no_partial_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("0001.npz");
        let entries = sample_entries();
        write_npz(
            &path,
            entries.iter().map(|(k, v)| (k.as_str(), v)),
            Compression::Deflated,
        )
        .unwrap();

        let listing: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(listing, vec![std::ffi::OsString::from("0001.npz")]);
    }

    /// Raw `.npy` v1.0 bytes for a `|u1` array.
    fn npy_u8(shape: &str, fortran: bool, data: &[u8]) -> Vec<u8> {
        let order = if fortran { "True" } else { "False" };
        let mut header = format!(
            "{{'descr': '|u1', 'fortran_order': {}, 'shape': {}, }}",
            order, shape
        );
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');

        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_fortran_order_member_reads_logically() {
        let bytes = npy_u8("(2, 3)", true, &[0, 3, 1, 4, 2, 5]);
        let tensor = read_npy(&bytes[..]).unwrap();
        let expected = ndarray::arr2(&[[0u8, 1, 2], [3, 4, 5]]).into_dyn();
        assert_eq!(tensor, Tensor::U8(expected));
    }

    #[test]
    fn test_c_order_member_reads_unchanged() {
        let bytes = npy_u8("(2, 3)", false, &[0, 1, 2, 3, 4, 5]);
        let tensor = read_npy(&bytes[..]).unwrap();
        let expected = ndarray::arr2(&[[0u8, 1, 2], [3, 4, 5]]).into_dyn();
        assert_eq!(tensor, Tensor::U8(expected));
    }

    #[test]
    fn test_missing_archive_is_dataset_error() {
        let dir = tempdir().unwrap();
        let err = read_npz(&dir.path().join("nope.npz")).unwrap_err();
        assert!(matches!(err, DaqError::Dataset(_)));
    }
}
