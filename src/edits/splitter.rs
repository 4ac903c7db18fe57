use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
    data::osm::{OsmId, Provenance, Way},
    errors::{Error, Result},
};

use super::session::EditSession;

/// Splits `way` at `split_node` into the original way, now ending at the split node, and a new
/// way `new_id` that starts there. Both keep the original tags. The new way starts at version 1
/// without any server provenance.
pub fn cut_way(way: &Way, split_node: OsmId, new_id: OsmId) -> Result<(Way, Way)> {
    let idx = interior_index(way, split_node)?;
    let head = Way { nodes: way.nodes[..=idx].to_vec(), ..way.clone() };
    let tail = Way {
        id: new_id,
        version: 1,
        nodes: way.nodes[idx..].to_vec(),
        tags: way.tags.clone(),
        meta: Provenance::default(),
    };
    Ok((head, tail))
}

fn interior_index(way: &Way, node_id: OsmId) -> Result<usize> {
    let last = way.nodes.len().saturating_sub(1);
    way.nodes
        .iter()
        .enumerate()
        .position(|(idx, nd)| *nd == node_id && idx > 0 && idx < last)
        .ok_or(Error::InvalidSplitPoint { way_id: way.id, node_id })
}

/// Nodes a way can be cut at.
pub fn interior_nodes(way: &Way) -> &[OsmId] {
    match way.nodes.len() {
        0..=2 => &[],
        n => &way.nodes[1..n - 1],
    }
}

/// Tracks which ways have a cut in progress, so a way is never split twice at once.
#[derive(Debug, Default)]
pub struct WaySplitter {
    pending: HashSet<OsmId>,
}

impl WaySplitter {
    /// Marks `way` as being cut and returns the nodes it can be cut at.
    pub fn begin(&mut self, way: &Way) -> Result<Vec<OsmId>> {
        if self.pending.contains(&way.id) {
            return Err(Error::SplitInProgress(way.id));
        }
        self.pending.insert(way.id);
        Ok(interior_nodes(way).to_vec())
    }

    pub fn is_pending(&self, way_id: OsmId) -> bool {
        self.pending.contains(&way_id)
    }

    pub fn cancel(&mut self, way_id: OsmId) -> bool {
        self.pending.remove(&way_id)
    }

    /// Follows ways that were uploaded while a cut was in progress.
    pub fn rekey(&mut self, id_map: &HashMap<OsmId, OsmId>) {
        self.pending = self.pending.iter().map(|id| *id_map.get(id).unwrap_or(id)).collect();
    }

    /// Cuts `way` and records both halves in `session`. An invalid split point leaves the
    /// session and the marker as they were.
    pub fn cut(&mut self, way: &Way, split_node: OsmId, session: &mut EditSession) -> Result<(Way, Way)> {
        interior_index(way, split_node)?;
        let new_id = session.allocate_id()?;
        let (head, tail) = cut_way(way, split_node, new_id)?;

        session.remember_original(&way.clone().into());
        session.record_change(head.clone().into());
        session.record_change(tail.clone().into());
        self.pending.remove(&way.id);
        debug!(way_id = way.id, new_way_id = new_id, node_id = split_node; "Cut way");
        Ok((head, tail))
    }
}
