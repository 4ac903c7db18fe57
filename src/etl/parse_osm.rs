use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use log::{info, warn};
use quick_xml::{
    events::{BytesStart, Event},
    reader::Reader,
};
use xz::bufread::XzDecoder;

use crate::{
    data::{
        osm::{ElementType, Member, Node, OsmEntity, OsmId, Provenance, Relation, Tags, Way},
        ParsedOsmData,
    },
    errors::{Error, Result},
};

use super::Etl;

pub const ETL_NAME: &str = "parse_osm";
pub const OUTPUT_FILE_NAME: &str = "osm_data.json";

enum ParserState {
    Top,
    Element(OsmEntity),
    /// Inside an element that failed to parse; its children are ignored.
    Skip,
}

struct Header {
    id: OsmId,
    version: u32,
    lat: Option<f64>,
    lon: Option<f64>,
    meta: Provenance,
}

pub struct ParseOsmEtl {
    data_path: PathBuf,
}

impl ParseOsmEtl {
    pub fn new(data_path: impl Into<PathBuf>) -> ParseOsmEtl {
        ParseOsmEtl { data_path: data_path.into() }
    }

    fn create_osm_reader(path: &Path) -> Result<Reader<Box<dyn BufRead>>> {
        let file_reader = BufReader::new(File::open(path)?);
        let input: Box<dyn BufRead> = if path.extension().is_some_and(|ext| ext == "xz") {
            Box::new(BufReader::new(XzDecoder::new(file_reader)))
        } else {
            Box::new(file_reader)
        };
        let mut reader = Reader::from_reader(input);
        reader.trim_text(true);
        Ok(reader)
    }

    fn parse_header(el: &BytesStart) -> Result<Header> {
        let mut id: Option<OsmId> = None;
        let mut header = Header { id: 0, version: 0, lat: None, lon: None, meta: Provenance::default() };
        for attribute in el.attributes() {
            let attribute = attribute?;
            let value = attribute.unescape_value()?;
            match attribute.key.as_ref() {
                b"id" => id = Some(value.parse()?),
                b"version" => header.version = value.parse()?,
                b"lat" => header.lat = Some(value.parse()?),
                b"lon" => header.lon = Some(value.parse()?),
                b"user" => header.meta.user = Some(value.into_owned()),
                b"uid" => header.meta.uid = Some(value.parse()?),
                b"timestamp" => header.meta.timestamp = Some(value.into_owned()),
                b"changeset" => header.meta.changeset = Some(value.parse()?),
                _ => (),
            }
        }
        header.id = id.ok_or("element without id")?;
        Ok(header)
    }

    fn parse_element(el: &BytesStart) -> Result<Option<OsmEntity>> {
        let kind = match el.name().as_ref() {
            b"node" => ElementType::Node,
            b"way" => ElementType::Way,
            b"relation" => ElementType::Relation,
            _ => return Ok(None),
        };
        let Header { id, version, lat, lon, meta } = Self::parse_header(el)?;
        let entity = match kind {
            ElementType::Node => {
                let (Some(lat), Some(lon)) = (lat, lon) else {
                    return Err(format!("node {} has no coordinates", id).into());
                };
                OsmEntity::Node(Node { id, version, lat, lon, tags: Tags::new(), meta })
            }
            ElementType::Way => OsmEntity::Way(Way { id, version, nodes: Vec::new(), tags: Tags::new(), meta }),
            ElementType::Relation => {
                OsmEntity::Relation(Relation { id, version, members: Vec::new(), tags: Tags::new(), meta })
            }
        };
        Ok(Some(entity))
    }

    fn attribute(el: &BytesStart, name: &[u8]) -> Result<String> {
        for attribute in el.attributes() {
            let attribute = attribute?;
            if attribute.key.as_ref() == name {
                return Ok(attribute.unescape_value()?.into_owned());
            }
        }
        Err(format!("<{}> without {}", String::from_utf8_lossy(el.name().as_ref()), String::from_utf8_lossy(name)).into())
    }

    /// Applies a `<tag>`, `<nd>` or `<member>` to the element being parsed.
    fn apply_child(entity: &mut OsmEntity, el: &BytesStart) -> Result<()> {
        match (el.name().as_ref(), entity) {
            (b"tag", entity) => {
                let (k, v) = (Self::attribute(el, b"k")?, Self::attribute(el, b"v")?);
                match entity {
                    OsmEntity::Node(n) => n.tags.insert(k, v),
                    OsmEntity::Way(w) => w.tags.insert(k, v),
                    OsmEntity::Relation(r) => r.tags.insert(k, v),
                };
            }
            (b"nd", OsmEntity::Way(way)) => way.nodes.push(Self::attribute(el, b"ref")?.parse()?),
            (b"member", OsmEntity::Relation(relation)) => {
                let kind = match Self::attribute(el, b"type")?.as_str() {
                    "node" => ElementType::Node,
                    "way" => ElementType::Way,
                    "relation" => ElementType::Relation,
                    other => return Err(format!("unknown member type {}", other).into()),
                };
                relation.members.push(Member {
                    kind,
                    member_ref: Self::attribute(el, b"ref")?.parse()?,
                    role: Self::attribute(el, b"role").unwrap_or_default(),
                });
            }
            _ => (),
        }
        Ok(())
    }

    fn skip_element(state: &mut ParserState, element: &str, err: Error) {
        warn!(element = element, err = err.to_string().as_str(); "Skipping malformed element");
        *state = ParserState::Skip;
    }

    /// Streams an OSM XML document into entities. Malformed elements are logged and skipped.
    pub fn parse<R: BufRead>(reader: &mut Reader<R>) -> Result<ParsedOsmData> {
        let mut data = ParsedOsmData::default();
        let mut state = ParserState::Top;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Eof => break,
                Event::Start(e) => match &mut state {
                    ParserState::Top => match Self::parse_element(&e) {
                        Ok(Some(entity)) => state = ParserState::Element(entity),
                        Ok(None) => (),
                        Err(err) => Self::skip_element(&mut state, &String::from_utf8_lossy(e.name().as_ref()), err),
                    },
                    ParserState::Element(entity) => {
                        if let Err(err) = Self::apply_child(entity, &e) {
                            let key = entity.key().to_string();
                            Self::skip_element(&mut state, &key, err);
                        }
                    }
                    ParserState::Skip => (),
                },
                Event::Empty(e) => match &mut state {
                    ParserState::Top => match Self::parse_element(&e) {
                        Ok(Some(entity)) => data.insert(entity),
                        Ok(None) => (),
                        Err(err) => {
                            warn!(err = err.to_string().as_str(); "Skipping malformed element");
                        }
                    },
                    ParserState::Element(entity) => {
                        if let Err(err) = Self::apply_child(entity, &e) {
                            let key = entity.key().to_string();
                            Self::skip_element(&mut state, &key, err);
                        }
                    }
                    ParserState::Skip => (),
                },
                Event::End(e) => {
                    if matches!(e.name().as_ref(), b"node" | b"way" | b"relation") {
                        if let ParserState::Element(entity) = std::mem::replace(&mut state, ParserState::Top) {
                            data.insert(entity);
                        }
                    }
                }
                _ => (),
            }
            buf.clear();
        }
        info!(
            nodes = data.nodes.len(),
            ways = data.ways.len(),
            relations = data.relations.len();
            "Parsed OSM data"
        );
        Ok(data)
    }
}

impl Etl for ParseOsmEtl {
    type Input = Reader<Box<dyn BufRead>>;
    type Output = ParsedOsmData;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> &str {
        OUTPUT_FILE_NAME
    }

    fn extract(&mut self, _dir: &Path) -> Result<Self::Input> {
        Self::create_osm_reader(&self.data_path)
    }

    fn transform(&mut self, mut input: Self::Input) -> Result<Self::Output> {
        Self::parse(&mut input)
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let output_file = File::create(dir.join(OUTPUT_FILE_NAME))?;
        serde_json::to_writer(output_file, &output)?;
        Ok(())
    }
}
