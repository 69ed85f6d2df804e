//! Shared checkbox state store.
//!
//! Owns the fixed-length array of 0/1 cells. The length is set once at
//! construction and never changes; all mutation flows through [`CheckboxStore::set`]
//! and all reads go through whole-array snapshots, so a reader can never
//! observe a torn write: the read lock is held for the entire copy.

use tokio::sync::RwLock;

/// The shared cell array.
///
/// Cells are stored one byte per cell (0 or 1). At the practical scale of
/// ~10^6 cells a snapshot is a ~1MB memcpy per diff window, which is cheap
/// next to the broadcast it feeds.
pub struct CheckboxStore {
    cells: RwLock<Vec<u8>>,
    len: usize,
}

impl CheckboxStore {
    /// Create a store of `len` cells, all unchecked.
    pub fn new(len: usize) -> Self {
        assert!(len >= 1, "store must hold at least one cell");
        Self {
            cells: RwLock::new(vec![0; len]),
            len,
        }
    }

    /// Number of cells. Fixed for the lifetime of the store.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set one cell.
    pub async fn set(&self, index: usize, value: bool) -> Result<(), StoreError> {
        if index >= self.len {
            return Err(StoreError::IndexOutOfRange { index, len: self.len });
        }
        let mut cells = self.cells.write().await;
        cells[index] = u8::from(value);
        Ok(())
    }

    /// Full, independent copy of the cell array.
    pub async fn snapshot(&self) -> Vec<u8> {
        self.cells.read().await.clone()
    }

    /// Number of cells currently checked.
    pub async fn checked_count(&self) -> usize {
        self.cells.read().await.iter().filter(|&&c| c == 1).count()
    }
}

/// Store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Index addressed a cell beyond the fixed array length.
    IndexOutOfRange { index: usize, len: usize },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexOutOfRange { index, len } => {
                write!(f, "cell index {index} out of range for {len} cells")
            }
        }
    }
}

impl std::error::Error for StoreError {}
