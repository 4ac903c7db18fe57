//! OSM API 0.6 documents for uploading a [`ChangeSet`]: the changeset envelope, the
//! `osmChange` body, and the `diffResult` the server answers with.

use std::{collections::HashMap, io::Cursor};

use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, Event},
    reader::Reader,
    writer::Writer,
};

use crate::{
    data::osm::{ElementType, OsmEntity, OsmId, Tags},
    errors::Result,
};

use super::session::ChangeSet;

const GENERATOR_COMMENT: &str = "Parking lanes";

type XmlWriter = Writer<Cursor<Vec<u8>>>;

fn new_writer() -> Result<XmlWriter> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

fn finish(writer: XmlWriter) -> String {
    String::from_utf8_lossy(&writer.into_inner().into_inner()).into_owned()
}

fn write_tags(writer: &mut XmlWriter, tags: &Tags) -> Result<()> {
    for (k, v) in tags.iter() {
        let mut tag = BytesStart::new("tag");
        tag.push_attribute(("k", k));
        tag.push_attribute(("v", v));
        writer.write_event(Event::Empty(tag))?;
    }
    Ok(())
}

/// Body of the `PUT /api/0.6/changeset/create` request.
pub fn changeset_document(editor_name: &str, editor_version: &str) -> Result<String> {
    let mut writer = new_writer()?;
    writer.write_event(Event::Start(BytesStart::new("osm")))?;
    writer.write_event(Event::Start(BytesStart::new("changeset")))?;
    let tags: Tags = [
        ("created_by", format!("{} {}", editor_name, editor_version)),
        ("comment", GENERATOR_COMMENT.to_string()),
    ]
    .into_iter()
    .collect();
    write_tags(&mut writer, &tags)?;
    writer.write_event(Event::End(BytesEnd::new("changeset")))?;
    writer.write_event(Event::End(BytesEnd::new("osm")))?;
    Ok(finish(writer))
}

fn write_entity(writer: &mut XmlWriter, entity: &OsmEntity, changeset_id: u64) -> Result<()> {
    let kind = entity.kind().as_str();
    let id = entity.id().to_string();
    let version = entity.version().to_string();
    let changeset = changeset_id.to_string();

    let mut start = BytesStart::new(kind);
    start.push_attribute(("id", id.as_str()));
    start.push_attribute(("version", version.as_str()));
    start.push_attribute(("changeset", changeset.as_str()));
    if let OsmEntity::Node(node) = entity {
        let (lat, lon) = (node.lat.to_string(), node.lon.to_string());
        start.push_attribute(("lat", lat.as_str()));
        start.push_attribute(("lon", lon.as_str()));
    }
    writer.write_event(Event::Start(start))?;

    match entity {
        OsmEntity::Node(_) => {}
        OsmEntity::Way(way) => {
            for nd in &way.nodes {
                let mut el = BytesStart::new("nd");
                el.push_attribute(("ref", nd.to_string().as_str()));
                writer.write_event(Event::Empty(el))?;
            }
        }
        OsmEntity::Relation(relation) => {
            for member in &relation.members {
                let mut el = BytesStart::new("member");
                el.push_attribute(("type", member.kind.as_str()));
                el.push_attribute(("ref", member.member_ref.to_string().as_str()));
                el.push_attribute(("role", member.role.as_str()));
                writer.write_event(Event::Empty(el))?;
            }
        }
    }
    write_tags(writer, entity.tags())?;
    writer.write_event(Event::End(BytesEnd::new(kind)))?;
    Ok(())
}

fn sorted(entities: &[OsmEntity]) -> Vec<&OsmEntity> {
    let mut sorted: Vec<&OsmEntity> = entities.iter().collect();
    sorted.sort_by_key(|e| e.key());
    sorted
}

/// The `osmChange` upload body. Entities are ordered by type, then id, so nodes a created way
/// refers to always come first.
pub fn osm_change_document(change_set: &ChangeSet, changeset_id: u64) -> Result<String> {
    let mut writer = new_writer()?;
    let mut root = BytesStart::new("osmChange");
    root.push_attribute(("version", "0.6"));
    writer.write_event(Event::Start(root))?;

    for (section, entities) in [("create", &change_set.creates), ("modify", &change_set.modifies)] {
        if entities.is_empty() {
            continue;
        }
        writer.write_event(Event::Start(BytesStart::new(section)))?;
        for entity in sorted(entities) {
            write_entity(&mut writer, entity, changeset_id)?;
        }
        writer.write_event(Event::End(BytesEnd::new(section)))?;
    }

    writer.write_event(Event::End(BytesEnd::new("osmChange")))?;
    Ok(finish(writer))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffEntry {
    pub kind: ElementType,
    pub old_id: OsmId,
    pub new_id: OsmId,
    pub new_version: u32,
}

fn parse_diff_entry(kind: ElementType, el: &BytesStart) -> Result<DiffEntry> {
    let mut old_id: Option<OsmId> = None;
    let mut new_id: Option<OsmId> = None;
    let mut new_version: Option<u32> = None;
    for attribute in el.attributes() {
        let attribute = attribute?;
        let value = attribute.unescape_value()?;
        match attribute.key.as_ref() {
            b"old_id" => old_id = Some(value.parse()?),
            b"new_id" => new_id = Some(value.parse()?),
            b"new_version" => new_version = Some(value.parse()?),
            _ => (),
        }
    }
    let old_id = old_id.ok_or("diff entry without old_id")?;
    Ok(DiffEntry {
        kind,
        old_id,
        new_id: new_id.unwrap_or(old_id),
        new_version: new_version.unwrap_or_default(),
    })
}

/// Reads the server's answer to an `osmChange` upload.
pub fn parse_diff_result(xml: &str) -> Result<Vec<DiffEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut entries = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(el) | Event::Empty(el) => {
                let kind = match el.name().as_ref() {
                    b"node" => ElementType::Node,
                    b"way" => ElementType::Way,
                    b"relation" => ElementType::Relation,
                    _ => continue,
                };
                entries.push(parse_diff_entry(kind, &el)?);
            }
            _ => (),
        }
    }
    Ok(entries)
}

/// Placeholder id to server id, for every entry whose id changed.
pub fn id_map(entries: &[DiffEntry]) -> HashMap<OsmId, OsmId> {
    entries
        .iter()
        .filter(|e| e.old_id != e.new_id)
        .map(|e| (e.old_id, e.new_id))
        .collect()
}
