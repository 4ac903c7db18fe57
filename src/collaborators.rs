//! Seams to the network side. The core never talks to the OSM API itself, it is handed a
//! client for each download and upload.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    config::EditorIdentity,
    data::{osm::OsmId, ParsedOsmData},
    edits::ChangeSet,
    errors::Result,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

pub trait DownloadClient {
    /// All nodes, ways and relations intersecting `bbox`.
    fn download(&mut self, bbox: &BoundingBox) -> Result<ParsedOsmData>;
}

pub trait UploadClient {
    /// Uploads `change_set` in one changeset and returns the server id of every entity that was
    /// created under a placeholder id.
    fn upload(&mut self, change_set: &ChangeSet, editor: &EditorIdentity) -> Result<HashMap<OsmId, OsmId>>;
}
