use std::{fs::File, path::Path};

use serde::Serialize;

use crate::{
    config::{AssemblyContext, EditorIdentity, UserConfig},
    controller::{Controller, MergeReport},
    data::{
        parking::{LegendEntry, LEGEND},
        ParsedOsmData,
    },
    errors::Result,
    etl::parse_osm,
    render_state::RenderState,
};

use super::Etl;

pub const ETL_NAME: &str = "parking_map";
pub const OUTPUT_FILE_NAME: &str = "parking_map.json";

#[derive(Serialize, Debug)]
pub struct ParkingMap {
    pub datetime: String,
    pub zoom: u8,
    pub editor_mode: bool,
    pub legend: &'static [LegendEntry],
    pub report: MergeReport,
    #[serde(flatten)]
    pub render: RenderState,
}

/// Resolves the parsed map for one instant and zoom, as a single download would.
pub struct ParkingMapEtl {
    context: AssemblyContext,
    view_min_zoom: u8,
    editor: EditorIdentity,
}

impl ParkingMapEtl {
    pub fn new(context: AssemblyContext, view_min_zoom: u8, editor: EditorIdentity) -> ParkingMapEtl {
        ParkingMapEtl { context, view_min_zoom, editor }
    }

    pub fn from_config(config: &UserConfig) -> Result<ParkingMapEtl> {
        Ok(Self::new(config.context()?, config.view_min_zoom, config.editor()))
    }
}

impl Etl for ParkingMapEtl {
    type Input = ParsedOsmData;
    type Output = ParkingMap;

    fn etl_name(&self) -> &str {
        ETL_NAME
    }

    fn output_file_name(&self) -> &str {
        OUTPUT_FILE_NAME
    }

    fn extract(&mut self, dir: &Path) -> Result<Self::Input> {
        let input_file = File::open(dir.join(parse_osm::OUTPUT_FILE_NAME))?;
        Ok(serde_json::from_reader(std::io::BufReader::new(input_file))?)
    }

    fn transform(&mut self, input: Self::Input) -> Result<Self::Output> {
        let mut controller = Controller::new(self.context, self.view_min_zoom, self.editor.clone());
        let ticket = controller.begin_download();
        let report = controller.apply_download(ticket, input)?;
        Ok(ParkingMap {
            datetime: self.context.instant.format("%Y-%m-%dT%H:%M").to_string(),
            zoom: self.context.zoom,
            editor_mode: self.context.editor_mode,
            legend: &LEGEND,
            report,
            render: controller.into_render_state(),
        })
    }

    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()> {
        let output_file = File::create(dir.join(OUTPUT_FILE_NAME))?;
        serde_json::to_writer_pretty(output_file, &output)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{config::parse_datetime, etl::parse_osm::ParseOsmEtl};

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6">
  <node id="1" version="1" lat="52.5000" lon="13.4000"/>
  <node id="2" version="1" lat="52.5000" lon="13.4010"/>
  <node id="3" version="1" lat="52.5010" lon="13.4010"/>
  <node id="4" version="1" lat="52.5010" lon="13.4000"/>
  <way id="10" version="1">
    <nd ref="1"/><nd ref="2"/>
    <tag k="highway" v="residential"/>
    <tag k="parking:condition:left" v="free"/>
    <tag k="parking:condition:right" v="ticket"/>
  </way>
  <way id="11" version="1">
    <nd ref="1"/><nd ref="2"/><nd ref="3"/><nd ref="4"/><nd ref="1"/>
    <tag k="amenity" v="parking"/>
    <tag k="fee" v="yes"/>
  </way>
</osm>"#;

    #[test]
    fn test_pipeline_writes_parking_map() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("sample.osm");
        File::create(&input).unwrap().write_all(SAMPLE.as_bytes()).unwrap();

        ParseOsmEtl::new(&input).process(dir.path()).unwrap();
        let context = AssemblyContext {
            zoom: 17,
            editor_mode: false,
            instant: parse_datetime("2026-10-19T09:00").unwrap(),
            split_min_zoom: 15,
        };
        let mut etl = ParkingMapEtl::new(context, 15, EditorIdentity::default());
        etl.process(dir.path()).unwrap();

        let json: serde_json::Value =
            serde_json::from_reader(File::open(dir.path().join(OUTPUT_FILE_NAME)).unwrap()).unwrap();
        assert_eq!(json["report"]["lanes_added"], 2);
        assert_eq!(json["report"]["areas_added"], 1);
        assert_eq!(json["lanes"]["left10"]["style"]["color"], "limegreen");
        assert_eq!(json["lanes"]["right10"]["category"], "ticket");
        assert_eq!(json["areas"]["way11"]["category"], "ticket");
        assert_eq!(json["legend"].as_array().unwrap().len(), 10);
    }
}
