use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errors::CliError;

/// Reads a `.fvecs` file: every record is a little endian `i32` dimension followed by that many
/// little endian `f32` components. All records must share one dimension.
pub fn read_fvecs(path: &Path) -> Result<Vec<Vec<f32>>, CliError> {
    let bytes = std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_fvecs(&bytes).map_err(|reason| CliError::MalformedFvecs {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_fvecs(mut bytes: &[u8]) -> Result<Vec<Vec<f32>>, String> {
    let mut dataset: Vec<Vec<f32>> = Vec::new();
    while !bytes.is_empty() {
        let (header, rest) = bytes
            .split_first_chunk::<4>()
            .ok_or_else(|| format!("truncated header after {} vectors", dataset.len()))?;
        let dimension = i32::from_le_bytes(*header);
        if dimension <= 0 {
            return Err(format!("vector {} has dimension {dimension}", dataset.len()));
        }
        let dimension = dimension as usize;
        if let Some(first) = dataset.first() {
            if first.len() != dimension {
                return Err(format!(
                    "vector {} has dimension {dimension}, expected {}",
                    dataset.len(),
                    first.len()
                ));
            }
        }
        let length = dimension * 4;
        if rest.len() < length {
            return Err(format!("vector {} is truncated", dataset.len()));
        }
        let (body, rest) = rest.split_at(length);
        let vector = body
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        dataset.push(vector);
        bytes = rest;
    }
    Ok(dataset)
}

/// Uniform vectors in `[-1, 1)^dimension`
pub fn random_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

#[cfg(test)]
pub(crate) fn write_fvecs(path: &Path, vectors: &[Vec<f32>]) {
    let mut bytes = Vec::new();
    for vector in vectors {
        bytes.extend_from_slice(&(vector.len() as i32).to_le_bytes());
        for component in vector {
            bytes.extend_from_slice(&component.to_le_bytes());
        }
    }
    std::fs::write(path, bytes).unwrap();
}
