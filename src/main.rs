use std::fs::create_dir_all;
use std::io;
use std::path::{Path, PathBuf};

use clap::Parser;
use log::info;
use structured_logger::json::new_writer;
use structured_logger::Builder;

use parking_lanes::config::UserConfig;
use parking_lanes::errors::Result;
use parking_lanes::etl::parking_map::ParkingMapEtl;
use parking_lanes::etl::parse_osm::ParseOsmEtl;
use parking_lanes::etl::Etl;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON configuration file.
    #[arg(short = 'C', long, default_value = "config.json", value_hint = clap::ValueHint::FilePath)]
    config: PathBuf,

    /// Instant to resolve conditions for, e.g. 2026-10-19T09:00. Defaults to now.
    #[arg(long)]
    datetime: Option<String>,

    #[arg(short, long)]
    zoom: Option<u8>,

    /// Keep lanes without a known condition.
    #[arg(long)]
    editor: bool,

    /// Ignore cached results of earlier runs.
    #[arg(short, long)]
    force: bool,
}

fn load_user_config(args: &Args) -> Result<UserConfig> {
    let mut config = UserConfig::load(&args.config)?;
    if let Some(datetime) = &args.datetime {
        config.datetime = Some(datetime.clone());
    }
    if let Some(zoom) = args.zoom {
        config.zoom = zoom;
    }
    config.editor_mode |= args.editor;
    config.validate()?;
    Ok(config)
}

fn create_output_dir(config: &UserConfig) -> Result<PathBuf> {
    let input_fname = Path::new(&config.data_path)
        .file_name()
        .ok_or("Could not get input file name")?;
    let output_dir = Path::new(&config.dest_path).join(input_fname);
    create_dir_all(&output_dir)?;
    Ok(output_dir)
}

fn setup_logging(level: &str) {
    Builder::with_level(level)
        .with_target_writer("*", new_writer(io::stdout()))
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_user_config(&args)?;
    setup_logging(&config.log_level);

    let output_dir = create_output_dir(&config)?;
    let mut parse_osm = ParseOsmEtl::new(&config.data_path);
    let mut parking_map = ParkingMapEtl::from_config(&config)?;
    if args.force {
        parse_osm.clean(&output_dir)?;
    }
    // The map depends on datetime, zoom and mode, so it is never reused.
    parking_map.clean(&output_dir)?;

    parse_osm.process(&output_dir)?;
    parking_map.process(&output_dir)?;
    info!(output_dir = output_dir.display().to_string().as_str(); "Done");
    Ok(())
}
