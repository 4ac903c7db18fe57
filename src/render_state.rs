use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::{
    data::{
        osm::{EntityKey, OsmId},
        parking::{ConditionCategory, LaneKey, LaneSide, ParkingArea, ParkingPoint, RenderKey},
    },
    geometry::Backlights,
    lanes::{recolor_area, recolor_point, restyle_point, LaneMap},
};

/// Everything currently drawn on the map, keyed so that re-rendering an entity replaces its
/// old records instead of stacking new ones on top.
#[derive(Serialize, Debug, Default, Clone)]
pub struct RenderState {
    #[serde(serialize_with = "serialize_lanes")]
    pub lanes: LaneMap,
    #[serde(serialize_with = "serialize_areas")]
    pub areas: BTreeMap<EntityKey, ParkingArea>,
    pub points: BTreeMap<OsmId, ParkingPoint>,
    /// Highlight of the selected way, if any.
    pub selection: Option<Backlights>,
}

/// Lanes are written out as a map from `right123`-style names.
fn serialize_lanes<S: serde::Serializer>(lanes: &LaneMap, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(lanes.iter().map(|(key, lane)| (key.to_string(), lane)))
}

fn serialize_areas<S: serde::Serializer>(
    areas: &BTreeMap<EntityKey, ParkingArea>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(areas.iter().map(|(key, area)| (key.to_string(), area)))
}

impl RenderState {
    pub fn has_lanes_for(&self, way_id: OsmId) -> bool {
        LaneKey::ALL.iter().any(|lane| self.lanes.contains_key(&RenderKey::new(*lane, way_id)))
    }

    /// Drops every lane of `way_id`, returning how many there were.
    pub fn remove_way_lanes(&mut self, way_id: OsmId) -> usize {
        LaneKey::ALL
            .iter()
            .filter(|lane| self.lanes.remove(&RenderKey::new(**lane, way_id)).is_some())
            .count()
    }

    /// Swaps the lanes of `way_id` for a freshly assembled set.
    pub fn replace_way_lanes(&mut self, way_id: OsmId, lanes: LaneMap) {
        self.remove_way_lanes(way_id);
        self.lanes.extend(lanes);
    }

    pub fn drop_unknown_lanes(&mut self) -> usize {
        let before = self.lanes.len();
        self.lanes.retain(|_, lane| lane.category != ConditionCategory::Unknown);
        before - self.lanes.len()
    }

    /// Moves records of placeholder ids to the ids the server assigned.
    pub fn rekey(&mut self, id_map: &HashMap<OsmId, OsmId>) {
        let lanes = std::mem::take(&mut self.lanes);
        self.lanes = lanes
            .into_values()
            .map(|mut lane: LaneSide| {
                if let Some(new_id) = id_map.get(&lane.way_id) {
                    lane.way_id = *new_id;
                }
                (lane.key(), lane)
            })
            .collect();

        let areas = std::mem::take(&mut self.areas);
        self.areas = areas
            .into_values()
            .map(|mut area| {
                if let Some(new_id) = id_map.get(&area.key.id) {
                    area.key.id = *new_id;
                }
                (area.key, area)
            })
            .collect();

        let points = std::mem::take(&mut self.points);
        self.points = points
            .into_values()
            .map(|mut point| {
                if let Some(new_id) = id_map.get(&point.node_id) {
                    point.node_id = *new_id;
                }
                (point.node_id, point)
            })
            .collect();
    }

    /// Re-resolves areas and points for a new instant. Lanes can appear or vanish with the
    /// instant, so they are re-assembled instead.
    pub fn recolor_areas(&mut self, instant: NaiveDateTime) {
        self.areas.values_mut().for_each(|area| recolor_area(area, instant));
        self.points.values_mut().for_each(|point| recolor_point(point, instant));
    }

    pub fn restyle_points(&mut self, zoom: u8) {
        self.points.values_mut().for_each(|point| restyle_point(point, zoom));
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::osm::LatLon,
        geometry::lane_style,
    };

    fn lane(way_id: OsmId, side: LaneKey, category: ConditionCategory) -> LaneSide {
        let coords = vec![LatLon::new(52.5, 13.4), LatLon::new(52.5, 13.41)];
        LaneSide {
            way_id,
            side,
            centerline: coords.clone(),
            geometry: coords,
            rules: Vec::new(),
            category,
            style: lane_style(side, category, 17, 15),
        }
    }

    fn lanes(items: Vec<LaneSide>) -> LaneMap {
        items.into_iter().map(|l| (l.key(), l)).collect()
    }

    #[test]
    fn test_replace_never_duplicates() {
        let mut state = RenderState::default();
        state.replace_way_lanes(1, lanes(vec![lane(1, LaneKey::Empty, ConditionCategory::Free)]));
        state.replace_way_lanes(1, lanes(vec![
            lane(1, LaneKey::Left, ConditionCategory::Free),
            lane(1, LaneKey::Right, ConditionCategory::Ticket),
        ]));
        assert_eq!(state.lanes.len(), 2);
        assert!(state.has_lanes_for(1));
        assert!(!state.has_lanes_for(2));
        assert_eq!(state.remove_way_lanes(1), 2);
        assert!(state.lanes.is_empty());
    }

    #[test]
    fn test_drop_unknown_and_rekey() {
        let mut state = RenderState::default();
        state.replace_way_lanes(-1, lanes(vec![
            lane(-1, LaneKey::Left, ConditionCategory::Free),
            lane(-1, LaneKey::Right, ConditionCategory::Unknown),
        ]));
        assert_eq!(state.drop_unknown_lanes(), 1);

        state.rekey(&HashMap::from([(-1, 9001)]));
        let keys: Vec<String> = state.lanes.keys().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["left9001"]);
        assert_eq!(state.lanes[&RenderKey::new(LaneKey::Left, 9001)].way_id, 9001);
    }

    #[test]
    fn test_serializes_lanes_by_name() {
        let mut state = RenderState::default();
        state.replace_way_lanes(7, lanes(vec![lane(7, LaneKey::Right, ConditionCategory::NoStopping)]));
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["lanes"]["right7"]["category"], "no_stopping");
        assert_eq!(json["lanes"]["right7"]["style"]["color"], ConditionCategory::NoStopping.color());
    }
}
