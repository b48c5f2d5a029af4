//! Resolution state of a tile's parent and cardinal neighbors.
//!
//! The registry rebuilds a [`Family`] for every tile each frame and swaps it
//! in whole; the tile only ever reads it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::layers::{LayerKind, NO_LOD};
use crate::coord::Relative;
use crate::map::LayerUid;

/// LOD state of one family member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyEntry {
    /// Whether the member exists in the active tile set.
    pub expected: bool,
    pub elevation_lod: i32,
    pub image_lods: BTreeMap<LayerUid, i32>,
}

impl FamilyEntry {
    /// An entry for a member that does not exist.
    pub fn absent() -> Self {
        Self {
            expected: false,
            elevation_lod: NO_LOD,
            image_lods: BTreeMap::new(),
        }
    }

    /// An entry for an existing member with the given LODs.
    pub fn present(elevation_lod: i32, image_lods: BTreeMap<LayerUid, i32>) -> Self {
        Self {
            expected: true,
            elevation_lod,
            image_lods,
        }
    }

    /// The member's LOD for a layer, [`NO_LOD`] if it holds none.
    pub fn lod(&self, kind: LayerKind) -> i32 {
        match kind {
            LayerKind::Elevation => self.elevation_lod,
            LayerKind::Image(uid) => self.image_lods.get(&uid).copied().unwrap_or(NO_LOD),
        }
    }
}

impl Default for FamilyEntry {
    fn default() -> Self {
        Self::absent()
    }
}

/// Parent plus west, north, east and south neighbors, indexed by [`Relative`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Family {
    entries: [FamilyEntry; 5],
}

impl Family {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, relative: Relative) -> &FamilyEntry {
        &self.entries[relative.index()]
    }

    pub fn set(&mut self, relative: Relative, entry: FamilyEntry) {
        self.entries[relative.index()] = entry;
    }

    pub fn with(mut self, relative: Relative, entry: FamilyEntry) -> Self {
        self.set(relative, entry);
        self
    }

    pub fn parent(&self) -> &FamilyEntry {
        self.get(Relative::Parent)
    }

    /// The four cardinal neighbors with their direction.
    pub fn neighbors(&self) -> impl Iterator<Item = (Relative, &FamilyEntry)> {
        [Relative::West, Relative::North, Relative::East, Relative::South]
            .into_iter()
            .map(move |r| (r, self.get(r)))
    }
}

/// Holder that swaps family snapshots atomically.
#[derive(Debug, Default)]
pub struct FamilyCell {
    current: RwLock<Arc<Family>>,
}

impl FamilyCell {
    pub fn load(&self) -> Arc<Family> {
        Arc::clone(&self.current.read())
    }

    /// Installs a new snapshot. Returns false if it equals the current one.
    pub fn store(&self, family: Family) -> bool {
        let mut current = self.current.write();
        if **current == family {
            return false;
        }
        *current = Arc::new(family);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_entry_has_no_lod() {
        let entry = FamilyEntry::absent();
        assert!(!entry.expected);
        assert_eq!(entry.lod(LayerKind::Elevation), NO_LOD);
        assert_eq!(entry.lod(LayerKind::Image(3)), NO_LOD);
    }

    #[test]
    fn test_entry_lookup_by_layer() {
        let entry = FamilyEntry::present(4, BTreeMap::from([(1, 2)]));
        assert_eq!(entry.lod(LayerKind::Elevation), 4);
        assert_eq!(entry.lod(LayerKind::Image(1)), 2);
        assert_eq!(entry.lod(LayerKind::Image(2)), NO_LOD);
    }

    #[test]
    fn test_neighbors_exclude_parent() {
        let family = Family::new()
            .with(Relative::Parent, FamilyEntry::present(1, BTreeMap::new()))
            .with(Relative::East, FamilyEntry::present(2, BTreeMap::new()));
        let expected: Vec<_> = family
            .neighbors()
            .filter(|(_, e)| e.expected)
            .map(|(r, _)| r)
            .collect();
        assert_eq!(expected, vec![Relative::East]);
        assert_eq!(family.parent().elevation_lod, 1);
    }

    #[test]
    fn test_cell_swaps_whole_snapshot() {
        let cell = FamilyCell::default();
        let before = cell.load();
        let family = Family::new().with(Relative::West, FamilyEntry::present(3, BTreeMap::new()));

        assert!(cell.store(family.clone()));
        assert!(!cell.store(family));
        assert_eq!(before.get(Relative::West).elevation_lod, NO_LOD);
        assert_eq!(cell.load().get(Relative::West).elevation_lod, 3);
    }
}
