//! The one owner of all mutable state: the entity arena, what is drawn, and the edit session.
//! Every user action goes through here, one at a time.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDateTime;
use log::{info, warn};
use serde::Serialize;

use crate::{
    collaborators::{BoundingBox, DownloadClient, UploadClient},
    config::{AssemblyContext, EditorIdentity, UserConfig},
    data::{
        osm::{ElementType, EntityKey, LatLon, OsmEntity, OsmId, Tags, Way},
        ParsedOsmData,
    },
    edits::{ChangeSet, EditSession, WaySplitter},
    errors::{Error, Result},
    geometry::get_backlights,
    lanes::{self, LaneMap},
    render_state::RenderState,
};

/// Handed out when a download starts. Only the newest ticket may apply its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadTicket {
    generation: u64,
}

/// What a download merge added to the map.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub lanes_added: usize,
    pub areas_added: usize,
    pub points_added: usize,
    /// Entities that could not be rendered and were left out.
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutMarker {
    pub node_id: OsmId,
    pub position: LatLon,
}

fn is_parking(tags: &Tags) -> bool {
    tags.is("amenity", "parking")
}

pub struct Controller {
    store: ParsedOsmData,
    render: RenderState,
    session: EditSession,
    splitter: WaySplitter,
    generation: u64,
    context: AssemblyContext,
    view_min_zoom: u8,
    editor: EditorIdentity,
    selected: Option<OsmId>,
}

impl Controller {
    pub fn new(context: AssemblyContext, view_min_zoom: u8, editor: EditorIdentity) -> Self {
        Controller {
            store: ParsedOsmData::default(),
            render: RenderState::default(),
            session: EditSession::new(),
            splitter: WaySplitter::default(),
            generation: 0,
            context,
            view_min_zoom,
            editor,
            selected: None,
        }
    }

    pub fn from_config(config: &UserConfig) -> Result<Self> {
        Ok(Self::new(config.context()?, config.view_min_zoom, config.editor()))
    }

    pub fn store(&self) -> &ParsedOsmData {
        &self.store
    }

    pub fn render_state(&self) -> &RenderState {
        &self.render
    }

    pub fn session(&self) -> &EditSession {
        &self.session
    }

    pub fn context(&self) -> &AssemblyContext {
        &self.context
    }

    pub fn into_render_state(self) -> RenderState {
        self.render
    }

    pub fn should_download(&self, zoom: u8) -> bool {
        zoom >= self.view_min_zoom
    }

    /// Starts a new download generation. Results of older tickets are refused from now on.
    pub fn begin_download(&mut self) -> DownloadTicket {
        self.generation += 1;
        DownloadTicket { generation: self.generation }
    }

    /// Merges a download into the arena and renders whatever it brought that isn't drawn yet.
    /// Entities that fail to render are logged and counted, never fatal.
    pub fn apply_download(&mut self, ticket: DownloadTicket, data: ParsedOsmData) -> Result<MergeReport> {
        if ticket.generation != self.generation {
            info!(got = ticket.generation, current = self.generation; "Discarding stale download");
            return Err(Error::StaleDownload { got: ticket.generation, current: self.generation });
        }
        let relation_ids: BTreeSet<OsmId> = data.relations.keys().copied().collect();
        let way_ids: BTreeSet<OsmId> = data.ways.keys().copied().collect();
        let node_ids: BTreeSet<OsmId> = data.nodes.keys().copied().collect();
        self.store.merge(data);

        let mut report = MergeReport::default();
        for id in relation_ids {
            let Some(relation) = self.store.relations.get(&id) else { continue };
            let key = relation.key();
            if !is_parking(&relation.tags) || self.render.areas.contains_key(&key) {
                continue;
            }
            match lanes::assemble_area_relation(relation, &self.store, &self.context) {
                Ok(area) => {
                    self.render.areas.insert(key, area);
                    report.areas_added += 1;
                }
                Err(err) => skip(&mut report, key, &err),
            }
        }

        let ways: Vec<Way> = way_ids.iter().filter_map(|id| self.store.ways.get(id).cloned()).collect();
        for way in ways.iter().filter(|w| w.tags.contains_key("highway")) {
            if self.render.has_lanes_for(way.id) {
                continue;
            }
            match self.assemble_lanes(way) {
                Ok(lanes) => {
                    report.lanes_added += lanes.len();
                    self.render.lanes.extend(lanes);
                }
                Err(err) => skip(&mut report, way.key(), &err),
            }
        }
        for way in ways.iter().filter(|w| is_parking(&w.tags)) {
            if self.render.areas.contains_key(&way.key()) {
                continue;
            }
            match lanes::assemble_area_way(way, &self.store, &self.context) {
                Ok(area) => {
                    self.render.areas.insert(way.key(), area);
                    report.areas_added += 1;
                }
                Err(err) => skip(&mut report, way.key(), &err),
            }
        }

        for id in node_ids {
            let Some(node) = self.store.nodes.get(&id) else { continue };
            if node.tags.is_any("amenity", &["parking", "parking_entrance"]) && !self.render.points.contains_key(&id) {
                self.render.points.insert(id, lanes::assemble_point(node, &self.context));
                report.points_added += 1;
            }
        }

        info!(
            lanes = report.lanes_added,
            areas = report.areas_added,
            points = report.points_added,
            skipped = report.skipped;
            "Merged download"
        );
        Ok(report)
    }

    pub fn download<C: DownloadClient>(&mut self, client: &mut C, bbox: &BoundingBox) -> Result<MergeReport> {
        let ticket = self.begin_download();
        let data = client.download(bbox)?;
        self.apply_download(ticket, data)
    }

    fn assemble_lanes(&self, way: &Way) -> Result<LaneMap> {
        let coords = self.store.way_coords(way)?;
        lanes::assemble(way, &coords, &self.context)
    }

    /// Re-assembles the lanes of every street. Failures only drop that street's lanes.
    fn refresh_lanes(&mut self) {
        let mut ids: Vec<OsmId> = self
            .store
            .ways
            .values()
            .filter(|w| w.tags.contains_key("highway"))
            .map(|w| w.id)
            .collect();
        ids.sort_unstable();
        for id in ids {
            self.refresh_way(id);
        }
    }

    /// Redraws one way from the arena. Records it no longer qualifies for are removed.
    fn refresh_way(&mut self, way_id: OsmId) {
        let Some(way) = self.store.ways.get(&way_id) else { return };
        let key = way.key();
        if way.tags.contains_key("highway") {
            match self.assemble_lanes(way) {
                Ok(lanes) => self.render.replace_way_lanes(way_id, lanes),
                Err(err) => {
                    warn!(entity = key.to_string().as_str(), err = err.to_string().as_str(); "Dropping lanes");
                    self.render.remove_way_lanes(way_id);
                }
            }
        } else {
            self.render.remove_way_lanes(way_id);
        }

        if !is_parking(&way.tags) {
            self.render.areas.remove(&key);
            return;
        }
        match lanes::assemble_area_way(way, &self.store, &self.context) {
            Ok(area) => {
                self.render.areas.insert(key, area);
            }
            Err(err) => {
                warn!(entity = key.to_string().as_str(), err = err.to_string().as_str(); "Dropping area");
                self.render.areas.remove(&key);
            }
        }
    }

    pub fn set_datetime(&mut self, instant: NaiveDateTime) {
        self.context.instant = instant;
        self.render.recolor_areas(instant);
        // The instant decides which sides resolve to `unknown` and which ones collapse.
        self.refresh_lanes();
    }

    pub fn set_zoom(&mut self, zoom: u8) {
        if zoom == self.context.zoom {
            return;
        }
        self.context.zoom = zoom;
        self.refresh_lanes();
        self.render.restyle_points(zoom);
        if let Some(way_id) = self.selected {
            if self.select_way(way_id).is_err() {
                self.clear_selection();
            }
        }
    }

    /// Leaving editor mode removes the `unknown` lanes shown as tagging prompts, entering it
    /// brings them back.
    pub fn set_editor_mode(&mut self, editor_mode: bool) {
        if editor_mode == self.context.editor_mode {
            return;
        }
        self.context.editor_mode = editor_mode;
        if editor_mode {
            self.refresh_lanes();
        } else {
            let removed = self.render.drop_unknown_lanes();
            info!(removed = removed; "Left editor mode");
        }
    }

    fn way(&self, way_id: OsmId) -> Result<&Way> {
        self.store.ways.get(&way_id).ok_or(Error::UnknownEntity(way_id))
    }

    pub fn select_way(&mut self, way_id: OsmId) -> Result<()> {
        let way = self.way(way_id)?;
        let coords = self.store.way_coords(way)?;
        let backlights = get_backlights(&coords, self.context.zoom, self.context.split_min_zoom)
            .map_err(|e| Error::InvalidGeometry { entity: way.key(), reason: e.to_string() })?;
        self.render.selection = Some(backlights);
        self.selected = Some(way_id);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.render.clear_selection();
        self.selected = None;
    }

    /// Replaces the tags of a way, redraws it and records the edit. Returns the number of
    /// changed entities.
    pub fn edit_tags(&mut self, way_id: OsmId, tags: Tags) -> Result<usize> {
        let original = self.way(way_id)?.clone();
        let edited = Way { tags, ..original.clone() };
        // Validated before anything is touched.
        self.store.way_coords(&edited)?;

        self.session.remember_original(&original.into());
        self.store.insert(edited.clone().into());
        self.refresh_way(way_id);
        Ok(self.session.record_change(edited.into()))
    }

    /// Marks a way for cutting and returns where it can be cut.
    pub fn begin_cut(&mut self, way_id: OsmId) -> Result<Vec<CutMarker>> {
        let way = self.way(way_id)?;
        let coords = self.store.way_coords(way)?;
        let way = way.clone();
        let nodes = self.splitter.begin(&way)?;
        Ok(nodes
            .into_iter()
            .zip(coords.into_iter().skip(1))
            .map(|(node_id, position)| CutMarker { node_id, position })
            .collect())
    }

    pub fn cancel_cut(&mut self, way_id: OsmId) -> bool {
        self.splitter.cancel(way_id)
    }

    /// Cuts a way at one of its interior nodes and returns the id of the new way.
    pub fn cut(&mut self, way_id: OsmId, node_id: OsmId) -> Result<OsmId> {
        let way = self.way(way_id)?.clone();
        let (head, tail) = self.splitter.cut(&way, node_id, &mut self.session)?;
        let new_id = tail.id;
        self.store.insert(head.into());
        self.store.insert(tail.into());
        self.refresh_way(way_id);
        self.refresh_way(new_id);
        if self.selected == Some(way_id) {
            self.select_way(way_id)?;
        }
        Ok(new_id)
    }

    pub fn change_set(&self) -> ChangeSet {
        self.session.build_change_set()
    }

    /// Uploads all pending changes, moves created entities to their server ids everywhere and
    /// starts a fresh session. Returns the server's id map. An id in that map that no created
    /// entity carried is reported as `UnknownEntity` after the rest has been applied.
    pub fn save<C: UploadClient>(&mut self, client: &mut C) -> Result<HashMap<OsmId, OsmId>> {
        let change_set = self.session.build_change_set();
        if change_set.is_empty() {
            return Ok(HashMap::new());
        }
        let id_map = client.upload(&change_set, &self.editor)?;

        // The upload went through, so local state follows it even when the answer names ids
        // this session never created.
        let created: HashSet<OsmId> = change_set.creates.iter().map(|entity| entity.id()).collect();
        let (id_map, unexpected): (HashMap<OsmId, OsmId>, HashMap<OsmId, OsmId>) =
            id_map.into_iter().partition(|(old, _)| created.contains(old));
        self.session.remap_ids(&id_map)?;

        for entity in &change_set.modifies {
            self.bump_version(entity.key());
        }
        self.store.remap_ids(&id_map);
        self.render.rekey(&id_map);
        self.splitter.rekey(&id_map);
        if let Some(selected) = self.selected {
            self.selected = Some(*id_map.get(&selected).unwrap_or(&selected));
        }
        self.session.commit();
        info!(uploaded = change_set.len(), created = id_map.len(); "Saved changes");

        if let Some(old) = unexpected.keys().min() {
            warn!(old_id = *old, new_id = unexpected[old]; "Server mapped an id that was never created");
            return Err(Error::UnknownEntity(*old));
        }
        Ok(id_map)
    }

    /// The server increments the version of every modified entity.
    fn bump_version(&mut self, key: EntityKey) {
        match key.kind {
            ElementType::Node => self.store.nodes.get_mut(&key.id).map(|n| n.version += 1),
            ElementType::Way => self.store.ways.get_mut(&key.id).map(|w| w.version += 1),
            ElementType::Relation => self.store.relations.get_mut(&key.id).map(|r| r.version += 1),
        };
    }

    pub fn entity_url(&self, key: EntityKey) -> Option<String> {
        self.store.get(key).map(|entity: OsmEntity| entity.osm_url())
    }
}

fn skip(report: &mut MergeReport, entity: EntityKey, err: &Error) {
    warn!(entity = entity.to_string().as_str(), err = err.to_string().as_str(); "Skipping entity");
    report.skipped += 1;
}
