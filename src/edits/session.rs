use std::collections::{BTreeMap, HashMap, HashSet};

use log::{debug, error, info};
use serde::Serialize;

use crate::{
    data::osm::{EntityKey, OsmEntity, OsmId},
    errors::{Error, Result},
};

/// Hands out placeholder ids for locally created entities: -1, -2, -3, ... Never reset during a
/// session, so ids stay unique even across uploads.
#[derive(Debug)]
pub struct IdAllocator {
    next: OsmId,
    issued: HashSet<OsmId>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator { next: -1, issued: HashSet::new() }
    }
}

impl IdAllocator {
    pub fn allocate(&mut self) -> Result<OsmId> {
        let id = self.next;
        if id >= 0 || !self.issued.insert(id) {
            error!(id = id; "Id allocator produced a duplicate id");
            return Err(Error::DuplicateAllocation(id));
        }
        self.next -= 1;
        Ok(id)
    }
}

/// Entities pending upload, split the way the OSM API wants them.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct ChangeSet {
    /// Locally created entities, still under their placeholder ids.
    pub creates: Vec<OsmEntity>,
    /// Server-known entities that differ from their downloaded version.
    pub modifies: Vec<OsmEntity>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.modifies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.creates.len() + self.modifies.len()
    }
}

/// Local edits of one editing session: the latest version of every touched entity plus the id
/// allocator for new ones.
#[derive(Debug, Default)]
pub struct EditSession {
    changes: BTreeMap<EntityKey, OsmEntity>,
    /// Downloaded version of each modified entity, as it was before the first edit.
    originals: HashMap<EntityKey, OsmEntity>,
    allocator: IdAllocator,
}

impl EditSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entity` as the latest local version and returns how many distinct entities are
    /// changed now.
    pub fn record_change(&mut self, entity: OsmEntity) -> usize {
        debug!(entity = entity.key().to_string().as_str(); "Recording change");
        self.changes.insert(entity.key(), entity);
        self.changes.len()
    }

    /// Keeps the server version of an entity around so edits that end up reverting it can be
    /// left out of the upload. Only the first call per entity counts.
    pub fn remember_original(&mut self, entity: &OsmEntity) {
        if entity.id() > 0 {
            self.originals.entry(entity.key()).or_insert_with(|| entity.clone());
        }
    }

    pub fn allocate_id(&mut self) -> Result<OsmId> {
        self.allocator.allocate()
    }

    pub fn get(&self, key: EntityKey) -> Option<&OsmEntity> {
        self.changes.get(&key)
    }

    pub fn changes_count(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn build_change_set(&self) -> ChangeSet {
        let mut change_set = ChangeSet::default();
        for (key, entity) in &self.changes {
            if key.id < 0 {
                change_set.creates.push(entity.clone());
            } else if self.originals.get(key) != Some(entity) {
                change_set.modifies.push(entity.clone());
            }
        }
        change_set
    }

    /// Moves created entities from their placeholder ids to the ids the server assigned, and
    /// rewrites every reference to them. Fails without touching anything if an id in the map
    /// isn't a locally created entity of this session.
    pub fn remap_ids(&mut self, id_map: &HashMap<OsmId, OsmId>) -> Result<()> {
        let created: HashSet<OsmId> = self.changes.keys().filter(|k| k.id < 0).map(|k| k.id).collect();
        if let Some(unknown) = id_map.keys().find(|old| !created.contains(old)) {
            return Err(Error::UnknownEntity(*unknown));
        }

        let changes = std::mem::take(&mut self.changes);
        self.changes = changes
            .into_values()
            .map(|mut entity| {
                if let Some(new_id) = id_map.get(&entity.id()) {
                    entity.set_id(*new_id);
                }
                entity.remap_refs(|_, id| id_map.get(&id).copied());
                (entity.key(), entity)
            })
            .collect();
        info!(remapped = id_map.len(); "Remapped placeholder ids");
        Ok(())
    }

    /// Forgets all recorded changes after a successful upload. The allocator keeps counting.
    pub fn commit(&mut self) {
        self.changes.clear();
        self.originals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::{ElementType, Member, Node, Provenance, Relation, Tags, Way};

    fn way(id: OsmId, nodes: Vec<OsmId>) -> OsmEntity {
        Way {
            id,
            version: 3,
            nodes,
            tags: [("highway", "residential")].into_iter().collect(),
            meta: Provenance::default(),
        }
        .into()
    }

    #[test]
    fn test_allocated_ids_strictly_decrease() {
        let mut session = EditSession::new();
        let ids: Vec<OsmId> = (0..50).map(|_| session.allocate_id().unwrap()).collect();
        assert_eq!(ids[0], -1);
        assert!(ids.windows(2).all(|pair| pair[1] < pair[0]));
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 50);
    }

    #[test]
    fn test_duplicate_allocation_is_reported() {
        let mut allocator = IdAllocator::default();
        assert_eq!(allocator.allocate().unwrap(), -1);
        allocator.next = -1;
        assert!(matches!(allocator.allocate(), Err(Error::DuplicateAllocation(-1))));
    }

    #[test]
    fn test_record_change_counts_distinct_entities() {
        let mut session = EditSession::new();
        assert_eq!(session.record_change(way(10, vec![1, 2])), 1);
        assert_eq!(session.record_change(way(10, vec![1, 2, 3])), 1);
        let node = Node { id: 10, version: 1, lat: 0.0, lon: 0.0, tags: Tags::new(), meta: Provenance::default() };
        // Same id, different type.
        assert_eq!(session.record_change(node.into()), 2);
    }

    #[test]
    fn test_change_set_partitions_and_skips_reverted() {
        let mut session = EditSession::new();
        let original = way(10, vec![1, 2, 3]);
        session.remember_original(&original);
        session.record_change(way(10, vec![1, 2]));
        session.record_change(way(-1, vec![2, 3]));
        session.remember_original(&way(11, vec![4, 5]));
        session.record_change(way(11, vec![4, 5]));

        let change_set = session.build_change_set();
        assert_eq!(change_set.creates.iter().map(|e| e.id()).collect::<Vec<_>>(), vec![-1]);
        assert_eq!(change_set.modifies.iter().map(|e| e.id()).collect::<Vec<_>>(), vec![10]);
        assert_eq!(change_set.modifies[0].version(), 3);

        session.record_change(original);
        assert_eq!(session.build_change_set().len(), 1);
    }

    #[test]
    fn test_remap_rewrites_ids_and_references() {
        let mut session = EditSession::new();
        session.record_change(way(-1, vec![3, 4, 5]));
        session.record_change(
            Relation {
                id: 7,
                version: 1,
                members: vec![Member { kind: ElementType::Way, member_ref: -1, role: String::new() }],
                tags: Tags::new(),
                meta: Provenance::default(),
            }
            .into(),
        );

        session.remap_ids(&HashMap::from([(-1, 9001)])).unwrap();
        assert!(session.get(EntityKey::new(ElementType::Way, -1)).is_none());
        assert!(session.get(EntityKey::new(ElementType::Way, 9001)).is_some());
        let Some(OsmEntity::Relation(relation)) = session.get(EntityKey::new(ElementType::Relation, 7)) else {
            panic!("relation missing");
        };
        assert_eq!(relation.members[0].member_ref, 9001);
    }

    #[test]
    fn test_remap_of_unknown_id_changes_nothing() {
        let mut session = EditSession::new();
        session.record_change(way(-1, vec![1, 2]));
        let err = session.remap_ids(&HashMap::from([(-1, 100), (-5, 101)])).unwrap_err();
        assert!(matches!(err, Error::UnknownEntity(-5)));
        assert!(session.get(EntityKey::new(ElementType::Way, -1)).is_some());
    }

    #[test]
    fn test_commit_keeps_allocator_running() {
        let mut session = EditSession::new();
        assert_eq!(session.allocate_id().unwrap(), -1);
        session.record_change(way(-1, vec![1, 2]));
        session.commit();
        assert!(session.is_empty());
        assert_eq!(session.allocate_id().unwrap(), -2);
    }
}
