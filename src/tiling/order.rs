//! Tile enumeration strategies.
//!
//! The enumeration order fixes where every tile's points land in the
//! container, so each strategy must be a pure function of the grid size.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TileError};

/// Grid coordinate of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub col: u16,
    pub row: u16,
}

impl TileKey {
    pub const fn new(col: u16, row: u16) -> Self {
        Self { col, row }
    }
}

pub(crate) trait TileEnumerator: Send + Sync {
    /// Every key of a `cols × rows` grid, each exactly once.
    fn enumerate(&self, cols: u16, rows: u16) -> Vec<TileKey>;
}

/// Rows outer, columns inner.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RowMajorOrder;

impl TileEnumerator for RowMajorOrder {
    fn enumerate(&self, cols: u16, rows: u16) -> Vec<TileKey> {
        let mut keys = Vec::with_capacity(cols as usize * rows as usize);
        for row in 0..rows {
            for col in 0..cols {
                keys.push(TileKey::new(col, row));
            }
        }
        keys
    }
}

/// Quad-tree order: the grid is split into quadrants recursively and the
/// 2×2 leaves are visited row by row. Spatially close tiles stay close in the
/// file.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TreeOrder;

impl TileEnumerator for TreeOrder {
    fn enumerate(&self, cols: u16, rows: u16) -> Vec<TileKey> {
        let (cols, rows) = (cols as u32, rows as u32);
        let mut keys = Vec::with_capacity((cols * rows) as usize);
        let side = cols.max(rows).max(1);
        let base_level = side.next_power_of_two().trailing_zeros();

        let mut stack = vec![(base_level, 0u32, 0u32)];
        while let Some((level, y, x)) = stack.pop() {
            if y >= rows || x >= cols {
                continue;
            }
            if level <= 1 {
                for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    let (ty, tx) = (y + dy, x + dx);
                    if ty < rows && tx < cols {
                        keys.push(TileKey::new(tx as u16, ty as u16));
                    }
                }
            } else {
                let jump = 1u32 << (level - 1);
                stack.push((level - 1, y + jump, x + jump));
                stack.push((level - 1, y + jump, x));
                stack.push((level - 1, y, x + jump));
                stack.push((level - 1, y, x));
            }
        }
        keys
    }
}

/// Persistable selection of a built-in strategy.
///
/// The set is closed: a container stores only the order id, and a reader must
/// rebuild the same enumeration from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileOrder {
    #[default]
    RowMajor,
    Tree,
}

impl TileOrder {
    pub fn id(&self) -> i32 {
        match self {
            TileOrder::RowMajor => 0,
            TileOrder::Tree => 1,
        }
    }

    pub fn from_id(id: i32) -> Result<Self> {
        match id {
            0 => Ok(TileOrder::RowMajor),
            1 => Ok(TileOrder::Tree),
            other => Err(TileError::Format(format!("unknown tile order {}", other))),
        }
    }

    pub(crate) fn enumerator(&self) -> &'static dyn TileEnumerator {
        match self {
            TileOrder::RowMajor => &RowMajorOrder,
            TileOrder::Tree => &TreeOrder,
        }
    }

    pub fn enumerate(&self, cols: u16, rows: u16) -> Vec<TileKey> {
        self.enumerator().enumerate(cols, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_covers(keys: &[TileKey], cols: u16, rows: u16) {
        assert_eq!(keys.len(), cols as usize * rows as usize);
        let unique: HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), keys.len());
        assert!(keys.iter().all(|k| k.col < cols && k.row < rows));
    }

    #[test]
    fn test_row_major() {
        let keys = RowMajorOrder.enumerate(3, 2);
        assert_eq!(
            keys,
            vec![
                TileKey::new(0, 0),
                TileKey::new(1, 0),
                TileKey::new(2, 0),
                TileKey::new(0, 1),
                TileKey::new(1, 1),
                TileKey::new(2, 1),
            ]
        );
    }

    #[test]
    fn test_tree_order_4x4() {
        let keys = TreeOrder.enumerate(4, 4);
        let expected: Vec<TileKey> = [
            (0, 0), (1, 0), (0, 1), (1, 1),
            (2, 0), (3, 0), (2, 1), (3, 1),
            (0, 2), (1, 2), (0, 3), (1, 3),
            (2, 2), (3, 2), (2, 3), (3, 3),
        ]
        .iter()
        .map(|(c, r)| TileKey::new(*c, *r))
        .collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_tree_order_covers_irregular_grids() {
        for (cols, rows) in [(1, 1), (1, 7), (5, 3), (13, 9), (64, 1), (100, 37)] {
            assert_covers(&TreeOrder.enumerate(cols, rows), cols, rows);
        }
    }

    #[test]
    fn test_orders_are_deterministic() {
        assert_eq!(TreeOrder.enumerate(11, 6), TreeOrder.enumerate(11, 6));
        assert_eq!(
            TileOrder::RowMajor.enumerate(4, 4),
            RowMajorOrder.enumerate(4, 4)
        );
    }

    #[test]
    fn test_order_ids() {
        for order in [TileOrder::RowMajor, TileOrder::Tree] {
            assert_eq!(TileOrder::from_id(order.id()).unwrap(), order);
        }
        assert!(TileOrder::from_id(9).is_err());
    }
}
