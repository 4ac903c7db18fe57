pub mod opening_hours;
pub mod parser;
pub mod resolver;

pub use parser::{parse, parse_area};
pub use resolver::resolve;
