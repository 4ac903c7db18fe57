use chrono::NaiveDateTime;

use crate::data::parking::{ConditionCategory, ConditionRule, Side};

/// The category in force on `side` at `instant`: the first rule, in parser priority order, that
/// applies to the side and whose time span contains the instant. `Unknown` fills every gap.
pub fn resolve(rules: &[ConditionRule], side: Side, instant: NaiveDateTime) -> ConditionCategory {
    rules
        .iter()
        .filter(|rule| rule.side.applies_to(side))
        .find(|rule| rule.time_span.contains(instant))
        .map_or(ConditionCategory::Unknown, |rule| rule.category)
}

/// Whether any rule speaks about `side` at all, regardless of time.
pub fn is_tagged(rules: &[ConditionRule], side: Side) -> bool {
    rules.iter().any(|rule| rule.side.applies_to(side))
}
