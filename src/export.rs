//! Benchmark results persistence.
//!
//! The test reporting path can persist the raw whole-graph logits so an
//! external scorer can consume them. The file is JSON: category name, shape,
//! and one row of logits per category node.

use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::errors::HgnnError;

#[derive(Debug, Serialize, Deserialize)]
struct ResultsFile {
    category: String,
    num_nodes: usize,
    num_classes: usize,
    logits: Vec<Vec<f32>>,
}

/// Write the logits for the full category node set to `path`, overwriting
/// any existing file.
pub fn save_logits(path: &Path, category: &str, logits: &Array2<f32>) -> Result<(), HgnnError> {
    let rows: Vec<Vec<f32>> = logits.outer_iter().map(|row| row.to_vec()).collect();
    let payload = ResultsFile {
        category: category.to_string(),
        num_nodes: logits.nrows(),
        num_classes: logits.ncols(),
        logits: rows,
    };
    let json = serde_json::to_string(&payload)?;
    fs::write(path, json)?;
    Ok(())
}

/// Read a results file back into a logits matrix. Mainly for consumers and
/// tests; training never reads one.
pub fn load_logits(path: &Path) -> Result<(String, Array2<f32>), HgnnError> {
    let json = fs::read_to_string(path)?;
    let payload: ResultsFile = serde_json::from_str(&json)?;
    let flat: Vec<f32> = payload.logits.into_iter().flatten().collect();
    let logits = Array2::from_shape_vec((payload.num_nodes, payload.num_classes), flat)
        .map_err(HgnnError::from)?;
    Ok((payload.category, logits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let logits = array![[0.5f32, -1.0], [2.0, 0.25], [0.0, 0.125]];

        save_logits(&path, "paper", &logits).unwrap();
        let (category, loaded) = load_logits(&path).unwrap();
        assert_eq!(category, "paper");
        assert_eq!(loaded, logits);
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let logits = array![[0.0f32]];
        let path = Path::new("/definitely/not/a/real/dir/results.json");
        assert!(save_logits(path, "paper", &logits).is_err());
    }
}
