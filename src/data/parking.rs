use std::fmt;

use serde::Serialize;

use crate::conditions::opening_hours::TimeSpan;

use super::osm::{EntityKey, LatLon, OsmId};

/// Semantic parking rule classification. Tag strings never leave the parser, everything
/// downstream matches on this.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCategory {
    Free,
    Disc,
    NoParking,
    NoStopping,
    NotApplicable,
    Ticket,
    Customers,
    Residents,
    Disabled,
    SeparatelyMapped,
    Unknown,
}

impl ConditionCategory {
    /// Maps a raw tag value. `no` and `separate` are the spellings used in the tags.
    pub fn from_tag_value(value: &str) -> Option<Self> {
        Some(match value.trim() {
            "free" => ConditionCategory::Free,
            "disc" => ConditionCategory::Disc,
            "no_parking" => ConditionCategory::NoParking,
            "no_stopping" => ConditionCategory::NoStopping,
            "no" | "not_applicable" => ConditionCategory::NotApplicable,
            "ticket" => ConditionCategory::Ticket,
            "customers" => ConditionCategory::Customers,
            "residents" => ConditionCategory::Residents,
            "disabled" => ConditionCategory::Disabled,
            "separate" | "separately_mapped" => ConditionCategory::SeparatelyMapped,
            _ => return None,
        })
    }

    pub fn legend(&self) -> Option<&'static LegendEntry> {
        LEGEND.iter().find(|entry| entry.category == *self)
    }

    pub fn color(&self) -> &'static str {
        self.legend().map_or(UNKNOWN_COLOR, |entry| entry.color)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegendEntry {
    pub category: ConditionCategory,
    pub color: &'static str,
    pub text: &'static str,
}

/// Colour for lanes nobody tagged yet. Only shown in editor mode.
pub const UNKNOWN_COLOR: &str = "black";

#[rustfmt::skip]
pub static LEGEND: [LegendEntry; 10] = [
    LegendEntry { category: ConditionCategory::Free,             color: "limegreen",   text: "Free parking" },
    LegendEntry { category: ConditionCategory::Disc,             color: "yellowgreen", text: "Disc" },
    LegendEntry { category: ConditionCategory::NoParking,        color: "orange",      text: "No parking" },
    LegendEntry { category: ConditionCategory::NoStopping,       color: "salmon",      text: "No stopping" },
    LegendEntry { category: ConditionCategory::NotApplicable,    color: "#FFC7B6",     text: "Not applicable" },
    LegendEntry { category: ConditionCategory::Ticket,           color: "dodgerblue",  text: "Paid parking" },
    LegendEntry { category: ConditionCategory::Customers,        color: "greenyellow", text: "For customers" },
    LegendEntry { category: ConditionCategory::Residents,        color: "hotpink",     text: "For residents" },
    LegendEntry { category: ConditionCategory::Disabled,         color: "turquoise",   text: "Disabled" },
    LegendEntry { category: ConditionCategory::SeparatelyMapped, color: "gray",        text: "Parking street site mapped separately" },
];

/// Side relative to the way's node direction.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
    Both,
}

impl Side {
    /// Whether a rule scoped to `self` is in force when asking about `query`.
    pub fn applies_to(&self, query: Side) -> bool {
        *self == query || *self == Side::Both
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
            Side::Both => "both",
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConditionRule {
    pub time_span: TimeSpan,
    pub category: ConditionCategory,
    pub side: Side,
}

impl ConditionRule {
    pub fn always(category: ConditionCategory, side: Side) -> Self {
        ConditionRule { time_span: TimeSpan::Always, category, side }
    }
}

/// Which rendered lane of a way a record is. `Empty` is the single unsplit lane drawn on the
/// centerline.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LaneKey {
    Left,
    Right,
    Empty,
}

impl LaneKey {
    pub const ALL: [LaneKey; 3] = [LaneKey::Right, LaneKey::Left, LaneKey::Empty];

    pub fn as_str(&self) -> &'static str {
        match self {
            LaneKey::Left => "left",
            LaneKey::Right => "right",
            LaneKey::Empty => "empty",
        }
    }
}

/// Key of a lane in the render state, displayed as e.g. `right123` or `empty-1`.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderKey {
    pub way_id: OsmId,
    pub lane: LaneKey,
}

impl RenderKey {
    pub fn new(lane: LaneKey, way_id: OsmId) -> Self {
        RenderKey { way_id, lane }
    }
}

impl fmt::Display for RenderKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.lane.as_str(), self.way_id)
    }
}

/// Stroke parameters in screen pixels at one zoom level.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct StyleParams {
    pub weight: f64,
    pub offset: f64,
    pub color: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct LaneSide {
    pub way_id: OsmId,
    pub side: LaneKey,
    /// The way's own node path. Kept so zoom changes can re-offset without the source data.
    pub centerline: Vec<LatLon>,
    pub geometry: Vec<LatLon>,
    pub rules: Vec<ConditionRule>,
    pub category: ConditionCategory,
    pub style: StyleParams,
}

impl LaneSide {
    pub fn key(&self) -> RenderKey {
        RenderKey::new(self.side, self.way_id)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ParkingArea {
    pub key: EntityKey,
    /// Closed rings, outer ones first.
    pub rings: Vec<Vec<LatLon>>,
    pub rules: Vec<ConditionRule>,
    pub category: ConditionCategory,
    pub color: &'static str,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct PointStyle {
    pub radius: f64,
    pub color: &'static str,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ParkingPoint {
    pub node_id: OsmId,
    pub position: LatLon,
    pub entrance: bool,
    pub rules: Vec<ConditionRule>,
    pub category: ConditionCategory,
    pub style: PointStyle,
}
