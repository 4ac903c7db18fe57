use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Negative ids belong to entities created locally that the server has never seen.
pub type OsmId = i64;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Node,
    Way,
    Relation,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Node => "node",
            ElementType::Way => "way",
            ElementType::Relation => "relation",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ids are only unique per element type, so anything holding mixed entities keys by this.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: ElementType,
    pub id: OsmId,
}

impl EntityKey {
    pub fn new(kind: ElementType, id: OsmId) -> Self {
        EntityKey { kind, id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.kind, self.id)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

impl LatLon {
    pub fn new(lat: f64, lon: f64) -> Self {
        LatLon { lat, lon }
    }
}

/// Raw OSM key/value pairs. Keys are unique and iteration is sorted by key.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Self {
        Tags(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is(&self, key: &str, value: &str) -> bool {
        self.get(key) == Some(value)
    }

    pub fn is_any(&self, key: &str, values: &[&str]) -> bool {
        self.get(key).map_or(false, |v| values.contains(&v))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Tags(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Server-side history of an entity. Locally created entities have none of it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changeset: Option<u64>,
}

impl Provenance {
    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.uid.is_none() && self.timestamp.is_none() && self.changeset.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Node {
    pub id: OsmId,
    #[serde(default)]
    pub version: u32,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub tags: Tags,
    #[serde(flatten)]
    pub meta: Provenance,
}

impl Node {
    pub fn coords(&self) -> LatLon {
        LatLon::new(self.lat, self.lon)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Way {
    pub id: OsmId,
    #[serde(default)]
    pub version: u32,
    pub nodes: Vec<OsmId>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(flatten)]
    pub meta: Provenance,
}

impl Way {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(ElementType::Way, self.id)
    }

    pub fn is_closed(&self) -> bool {
        self.nodes.len() > 2 && self.nodes.first() == self.nodes.last()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Member {
    #[serde(rename = "type")]
    pub kind: ElementType,
    #[serde(rename = "ref")]
    pub member_ref: OsmId,
    #[serde(default)]
    pub role: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: OsmId,
    #[serde(default)]
    pub version: u32,
    pub members: Vec<Member>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(flatten)]
    pub meta: Provenance,
}

impl Relation {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(ElementType::Relation, self.id)
    }
}

/// One element as found in OSM JSON (`{"type": "way", "id": 1, ...}`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OsmEntity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl OsmEntity {
    pub fn kind(&self) -> ElementType {
        match self {
            OsmEntity::Node(_) => ElementType::Node,
            OsmEntity::Way(_) => ElementType::Way,
            OsmEntity::Relation(_) => ElementType::Relation,
        }
    }

    pub fn id(&self) -> OsmId {
        match self {
            OsmEntity::Node(n) => n.id,
            OsmEntity::Way(w) => w.id,
            OsmEntity::Relation(r) => r.id,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.id())
    }

    pub fn version(&self) -> u32 {
        match self {
            OsmEntity::Node(n) => n.version,
            OsmEntity::Way(w) => w.version,
            OsmEntity::Relation(r) => r.version,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            OsmEntity::Node(n) => &n.tags,
            OsmEntity::Way(w) => &w.tags,
            OsmEntity::Relation(r) => &r.tags,
        }
    }

    pub fn meta(&self) -> &Provenance {
        match self {
            OsmEntity::Node(n) => &n.meta,
            OsmEntity::Way(w) => &w.meta,
            OsmEntity::Relation(r) => &r.meta,
        }
    }

    pub fn set_id(&mut self, id: OsmId) {
        match self {
            OsmEntity::Node(n) => n.id = id,
            OsmEntity::Way(w) => w.id = id,
            OsmEntity::Relation(r) => r.id = id,
        }
    }

    /// Rewrites every reference to another entity (way node refs, relation members) through
    /// `remap`. Returns true if anything changed.
    pub fn remap_refs(&mut self, remap: impl Fn(ElementType, OsmId) -> Option<OsmId>) -> bool {
        let mut changed = false;
        match self {
            OsmEntity::Node(_) => {}
            OsmEntity::Way(w) => {
                for nd in w.nodes.iter_mut() {
                    if let Some(new_id) = remap(ElementType::Node, *nd) {
                        *nd = new_id;
                        changed = true;
                    }
                }
            }
            OsmEntity::Relation(r) => {
                for m in r.members.iter_mut() {
                    if let Some(new_id) = remap(m.kind, m.member_ref) {
                        m.member_ref = new_id;
                        changed = true;
                    }
                }
            }
        }
        changed
    }

    pub fn osm_url(&self) -> String {
        format!("https://openstreetmap.org/{}/{}", self.kind(), self.id())
    }
}

impl From<Node> for OsmEntity {
    fn from(value: Node) -> Self {
        OsmEntity::Node(value)
    }
}

impl From<Way> for OsmEntity {
    fn from(value: Way) -> Self {
        OsmEntity::Way(value)
    }
}

impl From<Relation> for OsmEntity {
    fn from(value: Relation) -> Self {
        OsmEntity::Relation(value)
    }
}
