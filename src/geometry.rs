//! Lane geometry. Offsets are computed in Web Mercator pixel space at the display zoom, so a
//! given offset looks the same on screen at every zoom level, then projected back to lat/lon.

use std::f64::consts::PI;

use serde::Serialize;
use thiserror::Error;

use crate::data::{
    osm::LatLon,
    parking::{ConditionCategory, LaneKey, PointStyle, Side, StyleParams},
};

const TILE_SIZE: f64 = 256.0;
const MAX_LATITUDE: f64 = 85.051_128_78;
/// Sharp corners would otherwise push the shifted vertex arbitrarily far out.
const MITER_LIMIT: f64 = 4.0;
const BACKLIGHT_EXTRA_WEIGHT: f64 = 4.0;
pub const BACKLIGHT_COLOR: &str = "fuchsia";

/// Stroke weight in pixels by zoom. Zooms outside the table clamp to its ends.
#[rustfmt::skip]
const WEIGHT_BY_ZOOM: [(u8, f64); 9] = [
    (12, 1.0), (13, 1.5), (14, 2.0), (15, 3.0), (16, 4.0),
    (17, 5.0), (18, 7.0), (19, 9.0), (20, 11.0),
];

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("a path needs at least 2 nodes, got {0}")]
    TooFewNodes(usize),
    #[error("all nodes of the path are at the same position")]
    ZeroLength,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Pt {
    x: f64,
    y: f64,
}

fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * 2f64.powi(zoom as i32)
}

fn project(c: LatLon, zoom: u8) -> Pt {
    let lat = c.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let size = world_size(zoom);
    Pt {
        x: (c.lon + 180.0) / 360.0 * size,
        y: (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * size,
    }
}

fn unproject(p: Pt, zoom: u8) -> LatLon {
    let size = world_size(zoom);
    let n = PI * (1.0 - 2.0 * p.y / size);
    LatLon {
        lat: n.sinh().atan().to_degrees(),
        lon: p.x / size * 360.0 - 180.0,
    }
}

pub fn lane_weight(zoom: u8) -> f64 {
    let (first_zoom, first_weight) = WEIGHT_BY_ZOOM[0];
    if zoom <= first_zoom {
        return first_weight;
    }
    WEIGHT_BY_ZOOM
        .iter()
        .rev()
        .find(|(z, _)| *z <= zoom)
        .map_or(first_weight, |(_, w)| *w)
}

/// Distance in pixels between the way and a side lane's centerline. Zero below
/// `split_min_zoom`, where sides aren't drawn apart.
pub fn lane_offset(zoom: u8, split_min_zoom: u8) -> f64 {
    if zoom < split_min_zoom {
        0.0
    } else {
        lane_weight(zoom)
    }
}

pub fn lane_style(lane: LaneKey, category: ConditionCategory, zoom: u8, split_min_zoom: u8) -> StyleParams {
    StyleParams {
        weight: lane_weight(zoom),
        offset: match lane {
            LaneKey::Empty => 0.0,
            LaneKey::Left | LaneKey::Right => lane_offset(zoom, split_min_zoom),
        },
        color: category.color(),
    }
}

pub fn point_style(category: ConditionCategory, zoom: u8) -> PointStyle {
    PointStyle { radius: lane_weight(zoom) + 2.0, color: category.color() }
}

/// Shifts `coords` sideways by the lane offset for `zoom`. Left and right are relative to the
/// node order, `Both` stays on the centerline. Node count and direction are preserved.
pub fn offset_path(
    coords: &[LatLon],
    side: Side,
    zoom: u8,
    split_min_zoom: u8,
) -> Result<Vec<LatLon>, GeometryError> {
    let pixels = match side {
        Side::Left => lane_offset(zoom, split_min_zoom),
        Side::Right => -lane_offset(zoom, split_min_zoom),
        Side::Both => 0.0,
    };
    shift(coords, pixels, zoom)
}

/// Positive `pixels` shift to the left of the direction of travel.
fn shift(coords: &[LatLon], pixels: f64, zoom: u8) -> Result<Vec<LatLon>, GeometryError> {
    if coords.len() < 2 {
        return Err(GeometryError::TooFewNodes(coords.len()));
    }
    let pts: Vec<Pt> = coords.iter().map(|c| project(*c, zoom)).collect();
    let normals = segment_normals(&pts)?;
    if pixels == 0.0 {
        return Ok(coords.to_vec());
    }

    let last = pts.len() - 1;
    let shifted = pts
        .iter()
        .enumerate()
        .map(|(idx, pt)| {
            let (nx, ny) = if idx == 0 {
                normals[0]
            } else if idx == last {
                normals[last - 1]
            } else {
                miter(normals[idx - 1], normals[idx])
            };
            unproject(Pt { x: pt.x + nx * pixels, y: pt.y + ny * pixels }, zoom)
        })
        .collect();
    Ok(shifted)
}

/// Left-hand unit normal of every segment (y grows downwards). Zero-length segments borrow
/// from their neighbours.
fn segment_normals(pts: &[Pt]) -> Result<Vec<(f64, f64)>, GeometryError> {
    let raw: Vec<Option<(f64, f64)>> = pts
        .windows(2)
        .map(|pair| {
            let (dx, dy) = (pair[1].x - pair[0].x, pair[1].y - pair[0].y);
            let len = dx.hypot(dy);
            (len > f64::EPSILON).then(|| (dy / len, -dx / len))
        })
        .collect();
    let first_valid = raw.iter().flatten().next().copied().ok_or(GeometryError::ZeroLength)?;

    let mut previous = first_valid;
    Ok(raw
        .into_iter()
        .map(|n| {
            let n = n.unwrap_or(previous);
            previous = n;
            n
        })
        .collect())
}

/// Offset direction at a joint, scaled so both adjoining shifted segments meet.
fn miter(n1: (f64, f64), n2: (f64, f64)) -> (f64, f64) {
    let (mx, my) = (n1.0 + n2.0, n1.1 + n2.1);
    let len = mx.hypot(my);
    if len < 1e-9 {
        // The path doubles back on itself. Keep the first segment's offset.
        return n1;
    }
    let (mx, my) = (mx / len, my / len);
    let cos = mx * n1.0 + my * n1.1;
    let scale = (1.0 / cos).min(MITER_LIMIT);
    (mx * scale, my * scale)
}

/// Selection highlight drawn beneath the lanes of a clicked way.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Backlights {
    pub left: Vec<LatLon>,
    pub right: Vec<LatLon>,
    pub style: StyleParams,
}

pub fn get_backlights(coords: &[LatLon], zoom: u8, split_min_zoom: u8) -> Result<Backlights, GeometryError> {
    let offset = lane_offset(zoom, split_min_zoom);
    Ok(Backlights {
        left: shift(coords, offset, zoom)?,
        right: shift(coords, -offset, zoom)?,
        style: StyleParams {
            weight: lane_weight(zoom) + BACKLIGHT_EXTRA_WEIGHT,
            offset,
            color: BACKLIGHT_COLOR,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> Vec<LatLon> {
        vec![
            LatLon::new(52.5000, 13.4000),
            LatLon::new(52.5000, 13.4010),
            LatLon::new(52.5008, 13.4018),
            LatLon::new(52.5016, 13.4018),
            LatLon::new(52.5020, 13.4030),
        ]
    }

    fn assert_close(a: &[LatLon], b: &[LatLon]) {
        assert_eq!(a.len(), b.len());
        for (p, q) in a.iter().zip(b) {
            assert!((p.lat - q.lat).abs() < 1e-9 && (p.lon - q.lon).abs() < 1e-9, "{:?} != {:?}", p, q);
        }
    }

    #[test]
    fn test_projection_round_trips() {
        for c in path() {
            let back = unproject(project(c, 17), 17);
            assert!((back.lat - c.lat).abs() < 1e-9 && (back.lon - c.lon).abs() < 1e-9);
        }
    }

    #[test]
    fn test_offset_preserves_node_count_and_side() {
        let eastwards = vec![LatLon::new(52.5, 13.40), LatLon::new(52.5, 13.41)];
        let left = offset_path(&eastwards, Side::Left, 17, 15).unwrap();
        let right = offset_path(&eastwards, Side::Right, 17, 15).unwrap();
        assert_eq!(left.len(), 2);
        // Heading east, left is north.
        assert!(left.iter().all(|c| c.lat > 52.5));
        assert!(right.iter().all(|c| c.lat < 52.5));
        assert_eq!(offset_path(&path(), Side::Left, 18, 15).unwrap().len(), path().len());
    }

    #[test]
    fn test_offset_grows_with_zoom_in_pixels() {
        let mut previous = 0.0;
        for zoom in 10..=22 {
            let offset = lane_offset(zoom, 15);
            assert!(offset >= previous);
            previous = offset;
        }
        assert_eq!(lane_offset(14, 15), 0.0);
        assert!(lane_offset(15, 15) > 0.0);
    }

    #[test]
    fn test_below_split_zoom_stays_on_centerline() {
        assert_eq!(offset_path(&path(), Side::Left, 13, 15).unwrap(), path());
        assert_eq!(offset_path(&path(), Side::Both, 18, 15).unwrap(), path());
    }

    #[test]
    fn test_reversed_path_mirrors_instead_of_swapping() {
        let forward = path();
        let mut reversed = path();
        reversed.reverse();

        let mut right_of_forward = offset_path(&forward, Side::Right, 18, 15).unwrap();
        right_of_forward.reverse();
        assert_close(&offset_path(&reversed, Side::Left, 18, 15).unwrap(), &right_of_forward);

        let mut left_of_forward = offset_path(&forward, Side::Left, 18, 15).unwrap();
        left_of_forward.reverse();
        assert_close(&offset_path(&reversed, Side::Right, 18, 15).unwrap(), &left_of_forward);
    }

    #[test]
    fn test_degenerate_paths_are_rejected() {
        assert_eq!(offset_path(&[], Side::Left, 17, 15), Err(GeometryError::TooFewNodes(0)));
        assert_eq!(
            offset_path(&path()[..1], Side::Left, 17, 15),
            Err(GeometryError::TooFewNodes(1))
        );
        let same = vec![LatLon::new(52.5, 13.4); 3];
        assert_eq!(offset_path(&same, Side::Right, 17, 15), Err(GeometryError::ZeroLength));
    }

    #[test]
    fn test_duplicate_nodes_keep_count() {
        let mut coords = path();
        coords.insert(2, coords[1]);
        assert_eq!(offset_path(&coords, Side::Left, 18, 15).unwrap().len(), coords.len());
    }

    #[test]
    fn test_backlights_are_wider_than_lanes() {
        let lights = get_backlights(&path(), 17, 15).unwrap();
        let lane = lane_style(LaneKey::Left, ConditionCategory::Free, 17, 15);
        assert!(lights.style.weight > lane.weight);
        assert_eq!(lights.style.color, BACKLIGHT_COLOR);
        assert_close(&lights.left, &offset_path(&path(), Side::Left, 17, 15).unwrap());
        assert_close(&lights.right, &offset_path(&path(), Side::Right, 17, 15).unwrap());
    }
}
