pub mod parking_map;
pub mod parse_osm;

use std::{fs, path::Path, time::Instant};
use log::{debug, error, info};

use crate::errors::Result;

#[derive(Debug, Clone, Copy)]
enum Stage {
    Extract,
    Transform,
    Load,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        }
    }
}

fn logged<T>(etl_name: &str, stage: Stage, result: Result<T>) -> Result<T> {
    result.inspect_err(|err| {
        error!(etl_name = etl_name, stage = stage.as_str(), err = err.to_string().as_str(); "ETL stage failed")
    })
}

/// One step of the batch pipeline. Each step reads what the previous one left in the output
/// directory and writes a single file there, which later runs reuse as a cache.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;
    fn output_file_name(&self) -> &str;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    fn is_cached(&self, dir: &Path) -> Result<bool> {
        Ok(dir.join(self.output_file_name()).try_exists()?)
    }

    fn clean(&self, dir: &Path) -> Result<()> {
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Removing cached output");
            fs::remove_file(dir.join(self.output_file_name()))?;
        }
        Ok(())
    }

    fn process(&mut self, dir: &Path) -> Result<()> {
        let name = self.etl_name().to_string();
        let output_path = dir.join(self.output_file_name());
        if self.is_cached(dir)? {
            info!(etl_name = name.as_str(), output = output_path.display().to_string().as_str(); "Reusing cached output");
            return Ok(());
        }

        let started = Instant::now();
        info!(etl_name = name.as_str(); "Extracting");
        let input = logged(&name, Stage::Extract, self.extract(dir))?;
        debug!(etl_name = name.as_str(); "Transforming");
        let output = logged(&name, Stage::Transform, self.transform(input))?;
        debug!(etl_name = name.as_str(); "Loading");
        logged(&name, Stage::Load, self.load(dir, output))?;
        info!(
            etl_name = name.as_str(),
            output = output_path.display().to_string().as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64;
            "Stage output written"
        );
        Ok(())
    }
}
