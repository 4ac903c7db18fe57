pub mod osm_change;
pub mod session;
pub mod splitter;

pub use session::{ChangeSet, EditSession};
pub use splitter::WaySplitter;
