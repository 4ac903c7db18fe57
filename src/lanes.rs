//! Turns OSM entities into renderable parking records: lanes for streets, areas for parking
//! lots, points for parking nodes and entrances.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use log::debug;

use crate::{
    conditions::{parse, parse_area, resolve, resolver::is_tagged},
    config::AssemblyContext,
    data::{
        osm::{ElementType, EntityKey, LatLon, Node, OsmId, Relation, Way},
        parking::{
            ConditionCategory, ConditionRule, LaneKey, LaneSide, ParkingArea, ParkingPoint, RenderKey, Side,
        },
        ParsedOsmData,
    },
    errors::{Error, Result},
    geometry::{lane_style, offset_path, point_style, GeometryError},
};

pub type LaneMap = BTreeMap<RenderKey, LaneSide>;

fn invalid(entity: EntityKey, err: GeometryError) -> Error {
    Error::InvalidGeometry { entity, reason: err.to_string() }
}

/// Builds the lanes of one way. Returns nothing for ways without `highway`.
///
/// Tagged sides become `left`/`right` lanes. When both sides resolve to the same category
/// below the split zoom they collapse into one `empty` lane on the centerline. In editor mode a
/// way without any parking tags gets an `unknown` `empty` lane as a prompt, outside editor mode
/// `unknown` lanes are left out entirely.
pub fn assemble(way: &Way, coords: &[LatLon], ctx: &AssemblyContext) -> Result<LaneMap> {
    if !way.tags.contains_key("highway") {
        return Ok(LaneMap::new());
    }
    // Validates the geometry even if no lane ends up being drawn.
    offset_path(coords, Side::Both, ctx.zoom, ctx.split_min_zoom).map_err(|e| invalid(way.key(), e))?;

    let lanes = assemble_sides(way, coords, ctx)?;
    debug!(
        way_id = way.id,
        lanes = lanes.len(),
        keys = lanes.keys().map(|k| k.to_string()).collect::<Vec<_>>().join(",").as_str();
        "Assembled lanes"
    );
    Ok(lanes)
}

fn assemble_sides(way: &Way, coords: &[LatLon], ctx: &AssemblyContext) -> Result<LaneMap> {
    let mut lanes = LaneMap::new();
    let rules = parse(&way.tags);
    let left_tagged = is_tagged(&rules, Side::Left);
    let right_tagged = is_tagged(&rules, Side::Right);

    if !left_tagged && !right_tagged {
        if ctx.editor_mode {
            let lane = make_lane(way, LaneKey::Empty, coords, rules, ConditionCategory::Unknown, ctx)?;
            lanes.insert(lane.key(), lane);
        }
        return Ok(lanes);
    }

    let left = resolve(&rules, Side::Left, ctx.instant);
    let right = resolve(&rules, Side::Right, ctx.instant);
    let visible = |category: ConditionCategory| ctx.editor_mode || category != ConditionCategory::Unknown;

    if left_tagged && right_tagged && left == right && ctx.zoom < ctx.split_min_zoom {
        if visible(left) {
            let lane = make_lane(way, LaneKey::Empty, coords, rules, left, ctx)?;
            lanes.insert(lane.key(), lane);
        }
        return Ok(lanes);
    }

    for (tagged, key, category) in [(left_tagged, LaneKey::Left, left), (right_tagged, LaneKey::Right, right)] {
        if tagged && visible(category) {
            let lane = make_lane(way, key, coords, rules.clone(), category, ctx)?;
            lanes.insert(lane.key(), lane);
        }
    }
    Ok(lanes)
}

fn make_lane(
    way: &Way,
    key: LaneKey,
    coords: &[LatLon],
    rules: Vec<ConditionRule>,
    category: ConditionCategory,
    ctx: &AssemblyContext,
) -> Result<LaneSide> {
    let geometry = offset_path(coords, lane_side(key), ctx.zoom, ctx.split_min_zoom).map_err(|e| invalid(way.key(), e))?;
    Ok(LaneSide {
        way_id: way.id,
        side: key,
        centerline: coords.to_vec(),
        geometry,
        rules,
        category,
        style: lane_style(key, category, ctx.zoom, ctx.split_min_zoom),
    })
}

fn lane_side(key: LaneKey) -> Side {
    match key {
        LaneKey::Left => Side::Left,
        LaneKey::Right => Side::Right,
        LaneKey::Empty => Side::Both,
    }
}

pub fn assemble_area_way(way: &Way, data: &ParsedOsmData, ctx: &AssemblyContext) -> Result<ParkingArea> {
    if !way.is_closed() {
        return Err(Error::InvalidGeometry { entity: way.key(), reason: "area way is not closed".to_string() });
    }
    let ring = data.way_coords(way)?;
    Ok(make_area(way.key(), vec![ring], parse_area(&way.tags), ctx.instant))
}

/// Builds a multipolygon parking area. Member ways are joined end to end into closed rings,
/// outer rings first.
pub fn assemble_area_relation(relation: &Relation, data: &ParsedOsmData, ctx: &AssemblyContext) -> Result<ParkingArea> {
    let mut outer = Vec::new();
    let mut inner = Vec::new();
    for member in relation.members.iter().filter(|m| m.kind == ElementType::Way) {
        let way = data.ways.get(&member.member_ref).ok_or_else(|| Error::InvalidGeometry {
            entity: relation.key(),
            reason: format!("member way {} is missing", member.member_ref),
        })?;
        if member.role == "inner" {
            inner.push(way.nodes.clone());
        } else {
            outer.push(way.nodes.clone());
        }
    }
    let to_invalid = |reason: String| Error::InvalidGeometry { entity: relation.key(), reason };

    let mut rings = Vec::new();
    for node_ring in join_rings(outer).map_err(to_invalid)?.into_iter().chain(join_rings(inner).map_err(to_invalid)?) {
        let coords = node_ring
            .iter()
            .map(|nd| {
                data.node_coords.get(nd).copied().ok_or_else(|| Error::InvalidGeometry {
                    entity: relation.key(),
                    reason: format!("missing coordinates for node {}", nd),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        rings.push(coords);
    }
    if rings.is_empty() {
        return Err(to_invalid("relation has no member ways".to_string()));
    }
    Ok(make_area(relation.key(), rings, parse_area(&relation.tags), ctx.instant))
}

fn make_area(key: EntityKey, rings: Vec<Vec<LatLon>>, rules: Vec<ConditionRule>, instant: NaiveDateTime) -> ParkingArea {
    let category = resolve(&rules, Side::Both, instant);
    ParkingArea { key, rings, rules, category, color: category.color() }
}

pub fn recolor_area(area: &mut ParkingArea, instant: NaiveDateTime) {
    area.category = resolve(&area.rules, Side::Both, instant);
    area.color = area.category.color();
}

/// Joins open node sequences that share endpoints into closed rings.
fn join_rings(mut segments: Vec<Vec<OsmId>>) -> std::result::Result<Vec<Vec<OsmId>>, String> {
    segments.retain(|s| !s.is_empty());
    let mut rings = Vec::new();
    while !segments.is_empty() {
        let mut ring = segments.remove(0);
        while ring.len() < 2 || ring.first() != ring.last() {
            let end = *ring.last().ok_or("empty ring")?;
            let Some(idx) = segments.iter().position(|s| s.first() == Some(&end) || s.last() == Some(&end)) else {
                return Err(format!("ring ending at node {} is not closed", end));
            };
            let mut next = segments.remove(idx);
            if next.first() != Some(&end) {
                next.reverse();
            }
            ring.extend(next.into_iter().skip(1));
        }
        rings.push(ring);
    }
    Ok(rings)
}

pub fn assemble_point(node: &Node, ctx: &AssemblyContext) -> ParkingPoint {
    let rules = parse_area(&node.tags);
    let category = resolve(&rules, Side::Both, ctx.instant);
    ParkingPoint {
        node_id: node.id,
        position: node.coords(),
        entrance: node.tags.is("amenity", "parking_entrance"),
        rules,
        category,
        style: point_style(category, ctx.zoom),
    }
}

pub fn recolor_point(point: &mut ParkingPoint, instant: NaiveDateTime) {
    point.category = resolve(&point.rules, Side::Both, instant);
    point.style.color = point.category.color();
}

pub fn restyle_point(point: &mut ParkingPoint, zoom: u8) {
    point.style = point_style(point.category, zoom);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::osm::{Member, Provenance, Tags};

    fn ctx(zoom: u8, editor_mode: bool) -> AssemblyContext {
        AssemblyContext {
            zoom,
            editor_mode,
            instant: crate::config::parse_datetime("2026-10-19 09:00").unwrap(),
            split_min_zoom: 15,
        }
    }

    fn way(id: OsmId, nodes: Vec<OsmId>, tags: &[(&str, &str)]) -> Way {
        Way { id, version: 1, nodes, tags: tags.iter().copied().collect(), meta: Provenance::default() }
    }

    fn coords() -> Vec<LatLon> {
        (0..5).map(|i| LatLon::new(52.5, 13.4 + i as f64 * 0.001)).collect()
    }

    #[test]
    fn test_two_sided_way() {
        let w = way(1, vec![1, 2, 3, 4, 5], &[
            ("highway", "residential"),
            ("parking:condition:left", "free"),
            ("parking:condition:right", "no_parking"),
        ]);
        let lanes = assemble(&w, &coords(), &ctx(17, false)).unwrap();
        assert_eq!(lanes.len(), 2);
        let left = &lanes[&RenderKey::new(LaneKey::Left, 1)];
        let right = &lanes[&RenderKey::new(LaneKey::Right, 1)];
        assert_eq!(left.category, ConditionCategory::Free);
        assert_eq!(left.style.color, "limegreen");
        assert_eq!(right.category, ConditionCategory::NoParking);
        assert_eq!(right.style.color, "orange");
        assert_ne!(left.geometry, right.geometry);
    }

    #[test]
    fn test_equal_sides_collapse_below_split_zoom() {
        let w = way(2, vec![1, 2, 3, 4, 5], &[("highway", "residential"), ("parking:condition:both", "ticket")]);
        let low = assemble(&w, &coords(), &ctx(13, false)).unwrap();
        assert_eq!(low.keys().copied().collect::<Vec<_>>(), vec![RenderKey::new(LaneKey::Empty, 2)]);
        assert_eq!(low[&RenderKey::new(LaneKey::Empty, 2)].geometry, coords());

        let high = assemble(&w, &coords(), &ctx(17, false)).unwrap();
        assert_eq!(high.len(), 2);
    }

    #[test]
    fn test_editor_mode_controls_unknown_lanes() {
        let untagged = way(3, vec![1, 2, 3, 4, 5], &[("highway", "residential")]);
        assert!(assemble(&untagged, &coords(), &ctx(17, false)).unwrap().is_empty());
        let lanes = assemble(&untagged, &coords(), &ctx(17, true)).unwrap();
        assert_eq!(lanes[&RenderKey::new(LaneKey::Empty, 3)].category, ConditionCategory::Unknown);

        let half = way(4, vec![1, 2, 3, 4, 5], &[("highway", "residential"), ("parking:condition:left", "bogus")]);
        assert!(assemble(&half, &coords(), &ctx(17, false)).unwrap().is_empty());
        assert_eq!(assemble(&half, &coords(), &ctx(17, true)).unwrap().len(), 1);
    }

    #[test]
    fn test_non_highway_and_bad_geometry() {
        let w = way(5, vec![1, 2], &[("amenity", "parking")]);
        assert!(assemble(&w, &coords(), &ctx(17, true)).unwrap().is_empty());

        let w = way(6, vec![1], &[("highway", "residential"), ("parking:condition", "free")]);
        let err = assemble(&w, &coords()[..1], &ctx(17, true)).unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry { entity, .. } if entity.id == 6));
    }

    #[test]
    fn test_assemble_is_idempotent() {
        let w = way(7, vec![1, 2, 3, 4, 5], &[
            ("highway", "residential"),
            ("parking:condition:left", "ticket"),
            ("parking:condition:left:time_interval", "Mo-Fr 08:00-18:00"),
            ("parking:condition:right", "residents"),
        ]);
        for zoom in [13, 15, 19] {
            let first = assemble(&w, &coords(), &ctx(zoom, true)).unwrap();
            let second = assemble(&w, &coords(), &ctx(zoom, true)).unwrap();
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_sides_follow_the_clock() {
        let w = way(8, vec![1, 2, 3, 4, 5], &[
            ("highway", "residential"),
            ("parking:condition:left", "ticket"),
            ("parking:condition:left:time_interval", "Mo-Fr 08:00-18:00"),
            ("parking:condition:right", "free"),
            ("parking:condition:right:conditional", "no_stopping @ (Mo-Fr 07:00-10:00)"),
        ]);
        let at = |instant: &str, editor_mode: bool| AssemblyContext {
            instant: crate::config::parse_datetime(instant).unwrap(),
            ..ctx(17, editor_mode)
        };

        let monday = assemble(&w, &coords(), &at("2026-10-19 09:00", false)).unwrap();
        assert_eq!(monday[&RenderKey::new(LaneKey::Left, 8)].category, ConditionCategory::Ticket);
        assert_eq!(monday[&RenderKey::new(LaneKey::Right, 8)].category, ConditionCategory::NoStopping);

        let later = assemble(&w, &coords(), &at("2026-10-19 11:00", false)).unwrap();
        assert_eq!(later[&RenderKey::new(LaneKey::Right, 8)].style.color, "limegreen");

        // Outside the interval the left side has no rule left, so only editors see it.
        let sunday = assemble(&w, &coords(), &at("2026-10-18 09:00", false)).unwrap();
        assert_eq!(sunday.keys().copied().collect::<Vec<_>>(), vec![RenderKey::new(LaneKey::Right, 8)]);
        let sunday = assemble(&w, &coords(), &at("2026-10-18 09:00", true)).unwrap();
        assert_eq!(sunday[&RenderKey::new(LaneKey::Left, 8)].category, ConditionCategory::Unknown);
    }

    #[test]
    fn test_multipolygon_area() {
        let mut data = ParsedOsmData::default();
        for (id, lat, lon) in [(1, 0.0, 0.0), (2, 0.0, 1.0), (3, 1.0, 1.0), (4, 1.0, 0.0)] {
            data.node_coords.insert(id, LatLon::new(lat, lon));
        }
        data.ways.insert(10, way(10, vec![1, 2, 3], &[]));
        data.ways.insert(11, way(11, vec![1, 4, 3], &[]));
        let relation = Relation {
            id: 20,
            version: 1,
            members: vec![
                Member { kind: ElementType::Way, member_ref: 10, role: "outer".to_string() },
                Member { kind: ElementType::Way, member_ref: 11, role: "outer".to_string() },
            ],
            tags: [("amenity", "parking"), ("type", "multipolygon"), ("fee", "no")].into_iter().collect::<Tags>(),
            meta: Provenance::default(),
        };
        let area = assemble_area_relation(&relation, &data, &ctx(17, false)).unwrap();
        assert_eq!(area.rings.len(), 1);
        assert_eq!(area.rings[0].len(), 5);
        assert_eq!(area.rings[0].first(), area.rings[0].last());
        assert_eq!(area.category, ConditionCategory::Free);

        data.ways.remove(&11);
        assert!(assemble_area_relation(&relation, &data, &ctx(17, false)).is_err());
    }

    #[test]
    fn test_points() {
        let node = Node {
            id: 30,
            version: 1,
            lat: 52.5,
            lon: 13.4,
            tags: [("amenity", "parking_entrance"), ("access", "customers")].into_iter().collect(),
            meta: Provenance::default(),
        };
        let mut point = assemble_point(&node, &ctx(17, false));
        assert!(point.entrance);
        assert_eq!(point.category, ConditionCategory::Customers);
        let radius = point.style.radius;
        restyle_point(&mut point, 19);
        assert!(point.style.radius > radius);
    }
}
