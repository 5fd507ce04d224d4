//! A worker's rectangular sub-domain of one grid.

use crate::error::CouplerError;

/// 1-based, row-major global point identifier. Row is the slow dimension,
/// column the fast dimension (`spec.md` §3).
pub type GlobalPoint = u32;

/// 0-based position of a global point within a tile's sorted `points`
/// vector. Mappings store every point reference this way so the transfer
/// hot path never performs a search.
pub type LocalPos = u32;

/// The byte layout of a [`Tile`] descriptor on the wire: `tile_id` followed
/// by the 8 box extents, all 4-byte signed integers (`spec.md` §4.1).
pub const RECORD_LEN: usize = 9;

/// A worker's rectangular sub-domain of one grid, plus the sorted list of
/// global point identifiers it owns.
///
/// `points` is always strictly ascending; `Tile::new` is the only
/// constructor and it establishes this invariant once, from the box
/// extents, so every other method can binary-search without re-checking.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    tile_id: i32,
    lis: i32,
    lie: i32,
    ljs: i32,
    lje: i32,
    gis: i32,
    gie: i32,
    gjs: i32,
    gje: i32,
    points: Vec<GlobalPoint>,
}

/// Computes the 1-based, row-major global point identifier for `(i, j)` on
/// a grid with column extent `[gjs, gje)` and row start `gis`, per the
/// formula in `spec.md` §3: `id = (gje - gjs) * (i - gis) + (j - gjs) + 1`.
pub fn global_point_id(i: i32, j: i32, gis: i32, gjs: i32, gje: i32) -> GlobalPoint {
    ((gje - gjs) * (i - gis) + (j - gjs) + 1) as GlobalPoint
}

impl Tile {
    /// Builds a `Tile` from its domain box, enumerating owned points in
    /// ascending order. Panics (a programming error, not a runtime one) if
    /// the box extents violate `lis >= gis`, `lie <= gie`, `ljs >= gjs`,
    /// `lje <= gje` — callers are expected to validate user-supplied boxes
    /// before construction.
    pub fn new(
        tile_id: i32,
        lis: i32,
        lie: i32,
        ljs: i32,
        lje: i32,
        gis: i32,
        gie: i32,
        gjs: i32,
        gje: i32,
    ) -> Self {
        assert!(lis >= gis && lie <= gie && ljs >= gjs && lje <= gje);
        let mut points = Vec::with_capacity(((lie - lis) * (lje - ljs)).max(0) as usize);
        for i in lis..lie {
            for j in ljs..lje {
                points.push(global_point_id(i, j, gis, gjs, gje));
            }
        }
        Self {
            tile_id,
            lis,
            lie,
            ljs,
            lje,
            gis,
            gie,
            gjs,
            gje,
            points,
        }
    }

    pub fn tile_id(&self) -> i32 {
        self.tile_id
    }

    pub fn points(&self) -> &[GlobalPoint] {
        &self.points
    }

    pub fn local_extent(&self) -> (i32, i32, i32, i32) {
        (self.lis, self.lie, self.ljs, self.lje)
    }

    pub fn global_extent(&self) -> (i32, i32, i32, i32) {
        (self.gis, self.gie, self.gjs, self.gje)
    }

    /// The number of points this tile's global grid spans, `(gie-gis)*(gje-gjs)`.
    pub fn grid_size(&self) -> i64 {
        (self.gie - self.gis) as i64 * (self.gje - self.gjs) as i64
    }

    /// True if `global` is one of this tile's owned points. Binary search
    /// over the sorted `points` vector.
    pub fn has_point(&self, global: GlobalPoint) -> bool {
        self.points.binary_search(&global).is_ok()
    }

    /// The local array position of a global point. The point must belong to
    /// this tile — callers that might ask about a foreign point should
    /// check with [`Tile::has_point`] first, since this is a programming
    /// error, not a recoverable one.
    pub fn local_of(&self, global: GlobalPoint) -> LocalPos {
        self.points
            .binary_search(&global)
            .unwrap_or_else(|_| panic!("point {global} does not belong to tile {}", self.tile_id))
            as LocalPos
    }

    /// Packs this tile's descriptor into the fixed 9-integer wire record
    /// from `spec.md` §4.1.
    pub fn pack(&self) -> [i32; RECORD_LEN] {
        [
            self.tile_id,
            self.lis,
            self.lie,
            self.ljs,
            self.lje,
            self.gis,
            self.gie,
            self.gjs,
            self.gje,
        ]
    }

    /// Reconstructs a `Tile` from a wire record produced by [`Tile::pack`].
    pub fn unpack(record: [i32; RECORD_LEN]) -> Self {
        Self::new(
            record[0], record[1], record[2], record[3], record[4], record[5], record[6],
            record[7], record[8],
        )
    }

    /// Validates that this tile's declared global grid size matches an
    /// externally-asserted size (typically the weight file's implied
    /// extent), per `spec.md` §4.4.1.
    pub fn assert_grid_size(&self, declared: i64) -> Result<(), CouplerError> {
        if self.grid_size() != declared {
            return Err(CouplerError::grid_size_mismatch(declared, self.grid_size()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn points_are_ascending_and_product_of_extents() {
        let t = Tile::new(0, 0, 4, 0, 4, 0, 4, 0, 4);
        assert_eq!(t.points().len(), 16);
        assert!(t.points().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn global_point_id_matches_spec_formula() {
        // A 2x2 grid: | 3 4 |
        //             | 1 2 |
        assert_eq!(global_point_id(0, 0, 0, 0, 2), 1);
        assert_eq!(global_point_id(0, 1, 0, 0, 2), 2);
        assert_eq!(global_point_id(1, 0, 0, 0, 2), 3);
        assert_eq!(global_point_id(1, 1, 0, 0, 2), 4);
    }

    #[test]
    fn has_point_and_local_of_round_trip() {
        let t = Tile::new(7, 2, 4, 2, 4, 0, 4, 0, 4);
        for (local, &p) in t.points().iter().enumerate() {
            assert!(t.has_point(p));
            assert_eq!(t.local_of(p), local as LocalPos);
        }
        assert!(!t.has_point(1));
    }

    #[test]
    fn pack_unpack_round_trips() {
        let t = Tile::new(3, 1, 3, 0, 2, 0, 4, 0, 4);
        let round = Tile::unpack(t.pack());
        assert_eq!(t, round);
    }

    #[test]
    #[should_panic]
    fn local_of_panics_on_foreign_point() {
        let t = Tile::new(0, 0, 2, 0, 2, 0, 4, 0, 4);
        t.local_of(9999);
    }

    #[test]
    fn quadrant_partition_of_4x4_grid_is_disjoint_and_covering() {
        let tiles = [
            Tile::new(0, 0, 2, 0, 2, 0, 4, 0, 4),
            Tile::new(1, 0, 2, 2, 4, 0, 4, 0, 4),
            Tile::new(2, 2, 4, 0, 2, 0, 4, 0, 4),
            Tile::new(3, 2, 4, 2, 4, 0, 4, 0, 4),
        ];
        let mut all: Vec<GlobalPoint> = tiles.iter().flat_map(|t| t.points().to_vec()).collect();
        all.sort_unstable();
        let expected: Vec<GlobalPoint> = (1..=16).collect();
        assert_eq!(all, expected);
    }
}
