use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

use self::osm::{ElementType, EntityKey, LatLon, Node, OsmEntity, OsmId, Relation, Way};

pub mod osm;
pub mod parking;

/// Map data for one or more bounding boxes, as handed over by the download client. Entities are
/// kept without any processing; `node_coords` covers every node seen, tagged or not.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ParsedOsmData {
    pub nodes: HashMap<OsmId, Node>,
    pub ways: HashMap<OsmId, Way>,
    pub relations: HashMap<OsmId, Relation>,
    pub node_coords: HashMap<OsmId, LatLon>,
}

/// Ids that a merge actually inserted. Ids already present are skipped, not counted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MergedIds {
    pub nodes: Vec<OsmId>,
    pub ways: Vec<OsmId>,
    pub relations: Vec<OsmId>,
}

impl ParsedOsmData {
    pub fn from_elements(elements: impl IntoIterator<Item = OsmEntity>) -> Self {
        let mut data = ParsedOsmData::default();
        for element in elements {
            data.insert(element);
        }
        data
    }

    /// Inserts or replaces one entity.
    pub fn insert(&mut self, entity: OsmEntity) {
        match entity {
            OsmEntity::Node(node) => {
                self.node_coords.insert(node.id, node.coords());
                self.nodes.insert(node.id, node);
            }
            OsmEntity::Way(way) => {
                self.ways.insert(way.id, way);
            }
            OsmEntity::Relation(relation) => {
                self.relations.insert(relation.id, relation);
            }
        }
    }

    pub fn get(&self, key: EntityKey) -> Option<OsmEntity> {
        match key.kind {
            ElementType::Node => self.nodes.get(&key.id).cloned().map(OsmEntity::Node),
            ElementType::Way => self.ways.get(&key.id).cloned().map(OsmEntity::Way),
            ElementType::Relation => self.relations.get(&key.id).cloned().map(OsmEntity::Relation),
        }
    }

    /// Adds everything from `other` whose id isn't known yet. Known entities are left alone, so
    /// results from several downloads can be merged in any order and a locally edited copy is
    /// never overwritten by a fresh server snapshot.
    pub fn merge(&mut self, other: ParsedOsmData) -> MergedIds {
        let mut merged = MergedIds::default();
        for (id, coords) in other.node_coords {
            self.node_coords.entry(id).or_insert(coords);
        }
        for (id, node) in other.nodes {
            if !self.nodes.contains_key(&id) {
                self.nodes.insert(id, node);
                merged.nodes.push(id);
            }
        }
        for (id, way) in other.ways {
            if !self.ways.contains_key(&id) {
                self.ways.insert(id, way);
                merged.ways.push(id);
            }
        }
        for (id, relation) in other.relations {
            if !self.relations.contains_key(&id) {
                self.relations.insert(id, relation);
                merged.relations.push(id);
            }
        }
        merged.nodes.sort_unstable();
        merged.ways.sort_unstable();
        merged.relations.sort_unstable();
        merged
    }

    /// Coordinates of a way's nodes, in way order.
    pub fn way_coords(&self, way: &Way) -> Result<Vec<LatLon>> {
        way.nodes
            .iter()
            .map(|nd| {
                self.node_coords.get(nd).copied().ok_or_else(|| Error::InvalidGeometry {
                    entity: way.key(),
                    reason: format!("missing coordinates for node {}", nd),
                })
            })
            .collect()
    }

    /// Moves entities to new ids and rewrites every way/relation reference to them.
    pub fn remap_ids(&mut self, id_map: &HashMap<OsmId, OsmId>) {
        for (old, new) in id_map {
            if let Some(mut way) = self.ways.remove(old) {
                way.id = *new;
                self.ways.insert(*new, way);
            }
            if let Some(mut node) = self.nodes.remove(old) {
                node.id = *new;
                self.nodes.insert(*new, node);
            }
            if let Some(coords) = self.node_coords.remove(old) {
                self.node_coords.insert(*new, coords);
            }
            if let Some(mut relation) = self.relations.remove(old) {
                relation.id = *new;
                self.relations.insert(*new, relation);
            }
        }
        for way in self.ways.values_mut() {
            for nd in way.nodes.iter_mut() {
                if let Some(new) = id_map.get(nd) {
                    *nd = *new;
                }
            }
        }
        for relation in self.relations.values_mut() {
            for member in relation.members.iter_mut() {
                if let Some(new) = id_map.get(&member.member_ref) {
                    member.member_ref = *new;
                }
            }
        }
    }
}
