//! This module provides utilities for loading coefficient operators from files.
//!
//! Operators are read from the Matrix Market exchange format, restricted to the
//! variants that describe a real sparse matrix:
//!
//! ```text
//! %%MatrixMarket matrix coordinate real general
//! % optional comment lines
//! <rows> <cols> <entries>
//! <i> <j> <value>        (1-based indices, one entry per line)
//! ```
//!
//! `integer` values are accepted and converted to `f64`, and the `symmetric` qualifier
//! mirrors every off-diagonal entry.

use faer::sparse::{SparseColMat, Triplet};
use std::{
    fs::File,
    io::{self, BufRead, BufReader},
    path::Path,
};
use thiserror::Error;

/// Represents all possible errors that can occur during data loading and parsing.
#[derive(Error, Debug)]
pub enum DataLoaderError {
    /// Wraps a standard I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Occurs when a string cannot be parsed into an integer.
    #[error("Parse error: Failed to parse integer from '{0}'")]
    ParseInt(String),
    /// Occurs when a string cannot be parsed into a float.
    #[error("Parse error: Failed to parse float from '{0}'")]
    ParseFloat(String),
    /// Occurs if the `%%MatrixMarket` banner is missing.
    #[error("Format error: The '%%MatrixMarket' header line was not found.")]
    HeaderMissing,
    /// Occurs for banners describing anything but a real or integer coordinate matrix.
    #[error("Format error: Unsupported Matrix Market variant '{0}'.")]
    UnsupportedFormat(String),
    /// Occurs when the end of a file is reached unexpectedly during parsing.
    #[error("Format error: Unexpected end of file while reading data.")]
    UnexpectedEof,
    /// Occurs if the number of entries does not match the size line.
    #[error("Dimension mismatch: size line declares {declared} entries, but the file has {found}.")]
    EntryCountMismatch { declared: usize, found: usize },
    /// Occurs if an entry lies outside the declared shape.
    #[error("Format error: Entry ({row}, {col}) is outside the declared {nrows}x{ncols} shape.")]
    IndexOutOfBounds {
        row: usize,
        col: usize,
        nrows: usize,
        ncols: usize,
    },
    /// Occurs if the sparse matrix construction fails internally.
    #[error("Internal error: Failed to construct the sparse matrix from triplets.")]
    SparseMatrixConstructionError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Symmetry {
    General,
    Symmetric,
}

/// Parses the `%%MatrixMarket` banner and returns the symmetry qualifier.
fn parse_header(line: &str) -> Result<Symmetry, DataLoaderError> {
    let parts: Vec<String> = line.split_whitespace().map(str::to_lowercase).collect();
    if parts.first().map(String::as_str) != Some("%%matrixmarket") {
        return Err(DataLoaderError::HeaderMissing);
    }
    match parts.as_slice() {
        [_, object, format, field, symmetry]
            if object == "matrix"
                && format == "coordinate"
                && (field == "real" || field == "integer") =>
        {
            match symmetry.as_str() {
                "general" => Ok(Symmetry::General),
                "symmetric" => Ok(Symmetry::Symmetric),
                _ => Err(DataLoaderError::UnsupportedFormat(line.trim().to_string())),
            }
        }
        _ => Err(DataLoaderError::UnsupportedFormat(line.trim().to_string())),
    }
}

fn parse_usize(token: &str) -> Result<usize, DataLoaderError> {
    token
        .parse::<usize>()
        .map_err(|_| DataLoaderError::ParseInt(token.to_string()))
}

/// Parses a Matrix Market coordinate file from any buffered reader.
pub fn parse_matrix_market(reader: impl BufRead) -> Result<SparseColMat<usize, f64>, DataLoaderError> {
    let mut lines = reader.lines();

    let header = lines.next().ok_or(DataLoaderError::HeaderMissing)??;
    let symmetry = parse_header(&header)?;

    // The size line is the first line that is neither blank nor a comment.
    let (nrows, ncols, declared) = loop {
        let line = lines.next().ok_or(DataLoaderError::UnexpectedEof)??;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() != 3 {
            return Err(DataLoaderError::ParseInt(trimmed.to_string()));
        }
        break (
            parse_usize(parts[0])?,
            parse_usize(parts[1])?,
            parse_usize(parts[2])?,
        );
    };

    let capacity = match symmetry {
        Symmetry::General => declared,
        Symmetry::Symmetric => 2 * declared,
    };
    let mut triplets: Vec<Triplet<usize, usize, f64>> = Vec::with_capacity(capacity);
    let mut found = 0;

    for line in lines {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        let parts: Vec<&str> = trimmed.split_whitespace().collect();
        if parts.len() < 3 {
            return Err(DataLoaderError::UnexpectedEof);
        }

        // Indices are 1-based in the file.
        let row = parse_usize(parts[0])?;
        let col = parse_usize(parts[1])?;
        if row == 0 || col == 0 || row > nrows || col > ncols {
            return Err(DataLoaderError::IndexOutOfBounds {
                row,
                col,
                nrows,
                ncols,
            });
        }
        let val = parts[2]
            .parse::<f64>()
            .map_err(|_| DataLoaderError::ParseFloat(parts[2].to_string()))?;

        triplets.push(Triplet {
            row: row - 1,
            col: col - 1,
            val,
        });
        if symmetry == Symmetry::Symmetric && row != col {
            triplets.push(Triplet {
                row: col - 1,
                col: row - 1,
                val,
            });
        }
        found += 1;
    }

    if found != declared {
        return Err(DataLoaderError::EntryCountMismatch { declared, found });
    }

    SparseColMat::try_new_from_triplets(nrows, ncols, &triplets)
        .map_err(|_| DataLoaderError::SparseMatrixConstructionError)
}

/// Loads a sparse matrix from a Matrix Market file.
///
/// # Arguments
/// * `path`: The path to the `.mtx` file.
///
/// # Returns
/// The matrix in compressed sparse column format, ready to be wrapped in an
/// [`crate::operator::Operator`].
pub fn load_matrix_market(
    path: impl AsRef<Path>,
) -> Result<SparseColMat<usize, f64>, DataLoaderError> {
    let file = File::open(path.as_ref())?;
    let matrix = parse_matrix_market(BufReader::new(file))?;
    log::info!(
        "Loaded {}x{} matrix with {} stored entries from {}.",
        matrix.nrows(),
        matrix.ncols(),
        matrix.triplet_iter().count(),
        path.as_ref().display()
    );
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Operator;

    const GENERAL: &str = "%%MatrixMarket matrix coordinate real general
% a 3x3 tridiagonal block
3 3 7
1 1 -2.0
2 1 1.0
1 2 1.0
2 2 -2.0
3 2 1.0
2 3 1.0
3 3 -2.0
";

    #[test]
    fn test_parse_general() {
        let a = parse_matrix_market(GENERAL.as_bytes()).unwrap();
        assert_eq!((a.nrows(), a.ncols()), (3, 3));
        let dense = Operator::from(a).to_dense();
        assert_eq!(dense[(0, 0)], -2.0);
        assert_eq!(dense[(2, 1)], 1.0);
        assert_eq!(dense[(0, 2)], 0.0);
    }

    #[test]
    fn test_parse_symmetric_mirrors_entries() {
        let text = "%%MatrixMarket matrix coordinate integer symmetric
2 2 2
1 1 4
2 1 -1
";
        let a = parse_matrix_market(text.as_bytes()).unwrap();
        let dense = Operator::from(a).to_dense();
        assert_eq!(dense[(0, 1)], -1.0);
        assert_eq!(dense[(1, 0)], -1.0);
        assert_eq!(dense[(0, 0)], 4.0);
        assert_eq!(dense[(1, 1)], 0.0);
    }

    #[test]
    fn test_missing_header() {
        let error = parse_matrix_market("3 3 0\n".as_bytes()).unwrap_err();
        assert!(matches!(error, DataLoaderError::HeaderMissing));
    }

    #[test]
    fn test_unsupported_variant() {
        let text = "%%MatrixMarket matrix array real general\n2 2\n1.0\n";
        let error = parse_matrix_market(text.as_bytes()).unwrap_err();
        assert!(matches!(error, DataLoaderError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_entry_count_mismatch() {
        let text = "%%MatrixMarket matrix coordinate real general\n2 2 3\n1 1 1.0\n2 2 1.0\n";
        let error = parse_matrix_market(text.as_bytes()).unwrap_err();
        assert!(matches!(
            error,
            DataLoaderError::EntryCountMismatch {
                declared: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn test_out_of_bounds_entry() {
        let text = "%%MatrixMarket matrix coordinate real general\n2 2 1\n3 1 1.0\n";
        let error = parse_matrix_market(text.as_bytes()).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Format error: Entry (3, 1) is outside the declared 2x2 shape."
        );
    }

    #[test]
    fn test_bad_float() {
        let text = "%%MatrixMarket matrix coordinate real general\n1 1 1\n1 1 abc\n";
        let error = parse_matrix_market(text.as_bytes()).unwrap_err();
        assert!(matches!(error, DataLoaderError::ParseFloat(ref s) if s == "abc"));
    }
}
