//! Compressed archive of simulated curves.
//!
//! Curves are collected in memory and written once as an `.npz` container: a
//! deflate-compressed zip holding one `.npy` array per key. Every array has shape
//! `(n, 3)` with columns frequency, real part and imaginary part, stored as
//! little-endian `f64` in C order, so the file loads directly with `numpy.load`.

use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::curve::SimulatedCurve;
use crate::error::{FitError, Result};

const NPY_MAGIC: &[u8] = b"\x93NUMPY";
const NPY_ALIGN: usize = 64;

/// Key of the curve recorded for a given iteration.
pub fn iteration_key(index: usize) -> String {
    format!("iter_{:04}", index)
}

/// Key of the final comparison curve.
pub const FINAL_KEY: &str = "final";

/// Write-once, in-memory collection of curves keyed by iteration identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurveArchive {
    curves: BTreeMap<String, SimulatedCurve>,
}

impl CurveArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a curve under `key`. Keys are never overwritten.
    pub fn insert(&mut self, key: impl Into<String>, curve: SimulatedCurve) -> Result<()> {
        let key = key.into();
        if self.curves.contains_key(&key) {
            return Err(FitError::History(format!(
                "curve archive already holds an entry for '{}'",
                key
            )));
        }
        self.curves.insert(key, curve);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&SimulatedCurve> {
        self.curves.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.curves.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }

    /// Write every curve to `path` as an `.npz` archive.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (key, curve) in &self.curves {
            zip.start_file(format!("{}.npy", key), options)?;
            zip.write_all(&encode_npy(&curve.to_array2()))?;
        }
        zip.finish()?;
        Ok(())
    }

    /// Read an archive written by [`CurveArchive::save`].
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut zip = ZipArchive::new(file)?;
        let mut archive = Self::new();

        for i in 0..zip.len() {
            let mut entry = zip.by_index(i)?;
            let name = entry.name().to_string();
            let Some(key) = name.strip_suffix(".npy") else {
                continue;
            };

            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            let table = decode_npy(&bytes)
                .map_err(|msg| FitError::History(format!("{}: {}", name, msg)))?;
            let curve = SimulatedCurve::from_array2(table.view())?;
            archive.insert(key, curve)?;
        }

        Ok(archive)
    }
}

/// Encode a 2-D `f64` array as NPY format version 1.0.
fn encode_npy(table: &Array2<f64>) -> Vec<u8> {
    let (rows, cols) = table.dim();
    let mut header = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows, cols
    );
    // magic + version + u16 length, then the header padded and newline-terminated
    let prefix = NPY_MAGIC.len() + 2 + 2;
    let total = (prefix + header.len() + 1).div_ceil(NPY_ALIGN) * NPY_ALIGN;
    while prefix + header.len() + 1 < total {
        header.push(' ');
    }
    header.push('\n');

    let mut bytes = Vec::with_capacity(total + rows * cols * 8);
    bytes.extend_from_slice(NPY_MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for value in table.iter() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode an NPY 1.x array of little-endian `f64` in C order with two dimensions.
fn decode_npy(bytes: &[u8]) -> std::result::Result<Array2<f64>, String> {
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err("not an NPY array".to_string());
    }
    if bytes[6] != 1 {
        return Err(format!("unsupported NPY version {}.{}", bytes[6], bytes[7]));
    }

    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    let header = bytes
        .get(10..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| "truncated header".to_string())?;

    if !header.contains("'descr': '<f8'") {
        return Err("expected little-endian f64 data".to_string());
    }
    if !header.contains("'fortran_order': False") {
        return Err("expected C-ordered data".to_string());
    }
    let (rows, cols) = parse_shape(header).ok_or_else(|| "malformed shape".to_string())?;

    let data = &bytes[data_start..];
    if data.len() != rows * cols * 8 {
        return Err(format!(
            "expected {} data bytes, found {}",
            rows * cols * 8,
            data.len()
        ));
    }

    let values: Vec<f64> = data
        .chunks_exact(8)
        .map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect();
    Array2::from_shape_vec((rows, cols), values).map_err(|e| e.to_string())
}

fn parse_shape(header: &str) -> Option<(usize, usize)> {
    let start = header.find("'shape': (")? + "'shape': (".len();
    let end = start + header[start..].find(')')?;
    let mut dims = header[start..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().ok());
    let rows = dims.next()??;
    let cols = dims.next()??;
    if dims.next().is_some() {
        return None;
    }
    Some((rows, cols))
}
