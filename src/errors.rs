use std::{io, num::{ParseFloatError, ParseIntError}};

use quick_xml::events::attributes::AttrError;
use thiserror::Error;

use crate::data::osm::{EntityKey, OsmId};

#[derive(Debug, Error)]
pub enum Error {
    /// A parking tag could not be understood. The parser never returns this, it degrades the
    /// rule to `unknown` and logs it; it exists so the reason can be formatted and tested.
    #[error("malformed tag `{key}={value}`: {reason}")]
    MalformedTag {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid geometry for {entity}: {reason}")]
    InvalidGeometry { entity: EntityKey, reason: String },

    #[error("node {node_id} is not an interior node of way {way_id}")]
    InvalidSplitPoint { way_id: OsmId, node_id: OsmId },

    #[error("way {0} already has a split in progress")]
    SplitInProgress(OsmId),

    #[error("id allocator handed out {0} twice")]
    DuplicateAllocation(OsmId),

    #[error("unknown entity {0}")]
    UnknownEntity(OsmId),

    #[error("download generation {got} is stale, current generation is {current}")]
    StaleDownload { got: u64, current: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttr(#[from] AttrError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    ParseInt(#[from] ParseIntError),

    #[error(transparent)]
    ParseFloat(#[from] ParseFloatError),

    #[error(transparent)]
    DateTime(#[from] chrono::ParseError),
}

impl From<&str> for Error {
    fn from(value: &str) -> Self {
        Error::Config(value.to_string())
    }
}

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error::Config(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
