use std::sync::OnceLock;

use log::warn;
use regex::Regex;

use crate::{
    data::{
        osm::Tags,
        parking::{ConditionCategory, ConditionRule, Side},
    },
    errors::Error,
};

use super::opening_hours::TimeSpan;

const CONDITION: &str = "parking:condition";
const LANE: &str = "parking:lane";

/// `parking:lane` values that settle a side on their own.
const LANE_OVERRIDES: [&str; 4] = ["no_parking", "no_stopping", "no", "separate"];

/// Rules with a time span sort ahead of unconditional ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Timed,
    Always,
}

struct Candidate {
    tier: Tier,
    rule: ConditionRule,
}

/// Whether the entity is a street that can carry parking lanes at all.
pub fn is_lane_bearing(tags: &Tags) -> bool {
    tags.contains_key("highway")
}

pub fn has_parking_tags(tags: &Tags) -> bool {
    tags.iter().any(|(k, _)| k.starts_with(CONDITION) || k.starts_with(LANE))
}

/// Turns an entity's tags into rules in priority order: timed rules before `Always`, and inside
/// each tier side-specific rules before `both` ones, then tag order. Malformed values never
/// fail the parse, the affected rule becomes `unknown`.
pub fn parse(tags: &Tags) -> Vec<ConditionRule> {
    let mut candidates = Vec::new();
    for side in [Side::Left, Side::Right, Side::Both] {
        parse_scope(tags, side, &mut candidates);
    }
    // Stable, so tag order survives inside a (tier, sidedness) bucket.
    candidates.sort_by_key(|c| (c.tier, c.rule.side == Side::Both));
    candidates.into_iter().map(|c| c.rule).collect()
}

/// Rules for parking areas and points. Falls back to `fee`/`access` when nothing more specific
/// is tagged.
pub fn parse_area(tags: &Tags) -> Vec<ConditionRule> {
    let rules = parse(tags);
    if !rules.is_empty() {
        return rules;
    }
    let category = if tags.is("access", "customers") {
        ConditionCategory::Customers
    } else if tags.is_any("access", &["private", "no"]) {
        ConditionCategory::NotApplicable
    } else if tags.is("fee", "yes") {
        ConditionCategory::Ticket
    } else if tags.is("fee", "no") {
        ConditionCategory::Free
    } else {
        return Vec::new();
    };
    vec![ConditionRule::always(category, Side::Both)]
}

/// Finds `{namespace}{scope}{suffix}`. The unsided scope answers to both `parking:condition`
/// and `parking:condition:both`, the latter wins.
fn lookup<'a>(tags: &'a Tags, namespace: &str, side: Side, suffix: &str) -> Option<(String, &'a str)> {
    let scopes: &[&str] = match side {
        Side::Left => &[":left"],
        Side::Right => &[":right"],
        Side::Both => &[":both", ""],
    };
    scopes.iter().find_map(|scope| {
        let key = format!("{}{}{}", namespace, scope, suffix);
        tags.get(&key).map(|value| (key, value))
    })
}

fn parse_scope(tags: &Tags, side: Side, out: &mut Vec<Candidate>) {
    if let Some((key, value)) = lookup(tags, LANE, side, "") {
        if LANE_OVERRIDES.contains(&value) {
            out.push(Candidate {
                tier: Tier::Always,
                rule: ConditionRule::always(category(&key, value), side),
            });
        }
    }

    if let Some((key, value)) = lookup(tags, CONDITION, side, ":conditional") {
        for part in split_top_level(value) {
            out.push(Candidate { tier: Tier::Timed, rule: parse_conditional_part(&key, part, side) });
        }
    }

    let base = lookup(tags, CONDITION, side, "");
    let disc_if_maxstay = |c: ConditionCategory| {
        if c == ConditionCategory::Free && lookup(tags, CONDITION, side, ":maxstay").is_some() {
            ConditionCategory::Disc
        } else {
            c
        }
    };

    if let Some((interval_key, interval)) = lookup(tags, CONDITION, side, ":time_interval") {
        let interval_category = match &base {
            Some((key, value)) => disc_if_maxstay(category(key, value)),
            None => {
                malformed(&interval_key, interval, "time interval without a condition");
                ConditionCategory::Unknown
            }
        };
        out.push(Candidate {
            tier: Tier::Timed,
            rule: timed_rule(&interval_key, interval, interval_category, side),
        });

        if let Some((key, value)) = lookup(tags, CONDITION, side, ":default") {
            out.push(Candidate {
                tier: Tier::Always,
                rule: ConditionRule::always(disc_if_maxstay(category(&key, value)), side),
            });
        }
    } else if let Some((key, value)) = &base {
        out.push(Candidate {
            tier: Tier::Always,
            rule: ConditionRule::always(disc_if_maxstay(category(key, value)), side),
        });
    }
}

/// One `value @ (time expression)` clause of a `:conditional` tag.
fn parse_conditional_part(key: &str, part: &str, side: Side) -> ConditionRule {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"^(?<value>[^@]+?)\s*@\s*(?<when>.+)$").expect("conditional regex")
    });

    let Some(caps) = re.captures(part.trim()) else {
        malformed(key, part, "expected `value @ (time)`");
        return ConditionRule::always(ConditionCategory::Unknown, side);
    };
    let when = caps["when"].trim();
    let when = when
        .strip_prefix('(')
        .and_then(|w| w.strip_suffix(')'))
        .unwrap_or(when);
    timed_rule(key, when, category(key, &caps["value"]), side)
}

fn timed_rule(key: &str, expression: &str, category: ConditionCategory, side: Side) -> ConditionRule {
    match TimeSpan::parse(expression) {
        Ok(time_span) => ConditionRule { time_span, category, side },
        Err(reason) => {
            malformed(key, expression, &reason);
            ConditionRule::always(ConditionCategory::Unknown, side)
        }
    }
}

fn category(key: &str, value: &str) -> ConditionCategory {
    ConditionCategory::from_tag_value(value).unwrap_or_else(|| {
        malformed(key, value, "unknown condition");
        ConditionCategory::Unknown
    })
}

fn malformed(key: &str, value: &str, reason: &str) {
    let err = Error::MalformedTag {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };
    warn!(key = key, value = value; "Degrading parking rule to unknown: {}", err);
}

/// Splits on `;` outside parentheses.
fn split_top_level(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                parts.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&value[start..]);
    parts.into_iter().map(str::trim).filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_sided_plain_conditions() {
        let rules = parse(&tags(&[
            ("highway", "residential"),
            ("parking:condition:left", "free"),
            ("parking:condition:right", "no_parking"),
        ]));
        assert_eq!(
            rules,
            vec![
                ConditionRule::always(ConditionCategory::Free, Side::Left),
                ConditionRule::always(ConditionCategory::NoParking, Side::Right),
            ]
        );
    }

    #[test]
    fn test_conditional_is_decomposed_in_order() {
        let rules = parse(&tags(&[
            ("parking:condition:right", "free"),
            ("parking:condition:right:conditional", "no @ (Mo-Fr 08:00-18:00); ticket @ (Sa 08:00-13:00)"),
        ]));
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].category, ConditionCategory::NotApplicable);
        assert!(matches!(rules[0].time_span, TimeSpan::Recurring(_)));
        assert_eq!(rules[1].category, ConditionCategory::Ticket);
        assert_eq!(rules[2], ConditionRule::always(ConditionCategory::Free, Side::Right));
    }

    #[test]
    fn test_time_interval_with_default() {
        let rules = parse(&tags(&[
            ("parking:condition:both", "ticket"),
            ("parking:condition:both:time_interval", "Mo-Sa 09:00-20:00"),
            ("parking:condition:both:default", "free"),
        ]));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].category, ConditionCategory::Ticket);
        assert_eq!(rules[0].side, Side::Both);
        assert!(!rules[0].time_span.is_always());
        assert_eq!(rules[1], ConditionRule::always(ConditionCategory::Free, Side::Both));
    }

    #[test]
    fn test_sided_rules_rank_before_unsided_in_the_same_tier() {
        let rules = parse(&tags(&[
            ("parking:condition", "ticket"),
            ("parking:condition:left", "residents"),
        ]));
        assert_eq!(
            rules,
            vec![
                ConditionRule::always(ConditionCategory::Residents, Side::Left),
                ConditionRule::always(ConditionCategory::Ticket, Side::Both),
            ]
        );
    }

    #[test]
    fn test_both_alias_wins_over_bare_key() {
        let rules = parse(&tags(&[("parking:condition", "ticket"), ("parking:condition:both", "free")]));
        assert_eq!(rules, vec![ConditionRule::always(ConditionCategory::Free, Side::Both)]);
    }

    #[test]
    fn test_malformed_values_degrade_to_unknown() {
        let rules = parse(&tags(&[
            ("parking:condition:left", "free"),
            ("parking:condition:left:conditional", "ticket @ (whenever); no_parking"),
            ("parking:condition:right", "sometimes"),
        ]));
        assert_eq!(rules.len(), 4);
        // Degraded timed rules keep their place ahead of the unconditional ones.
        assert_eq!(rules[0], ConditionRule::always(ConditionCategory::Unknown, Side::Left));
        assert_eq!(rules[1], ConditionRule::always(ConditionCategory::Unknown, Side::Left));
        assert_eq!(rules[2], ConditionRule::always(ConditionCategory::Free, Side::Left));
        assert_eq!(rules[3], ConditionRule::always(ConditionCategory::Unknown, Side::Right));
    }

    #[test]
    fn test_lane_overrides_and_maxstay() {
        let rules = parse(&tags(&[
            ("parking:lane:left", "no_stopping"),
            ("parking:lane:right", "parallel"),
            ("parking:condition:right", "free"),
            ("parking:condition:right:maxstay", "2 h"),
        ]));
        assert_eq!(
            rules,
            vec![
                ConditionRule::always(ConditionCategory::NoStopping, Side::Left),
                ConditionRule::always(ConditionCategory::Disc, Side::Right),
            ]
        );
    }

    #[test]
    fn test_area_fallback() {
        assert_eq!(
            parse_area(&tags(&[("amenity", "parking"), ("fee", "yes")])),
            vec![ConditionRule::always(ConditionCategory::Ticket, Side::Both)]
        );
        assert_eq!(
            parse_area(&tags(&[("amenity", "parking"), ("access", "customers"), ("fee", "yes")])),
            vec![ConditionRule::always(ConditionCategory::Customers, Side::Both)]
        );
        assert!(parse_area(&tags(&[("amenity", "parking")])).is_empty());
    }

    #[test]
    fn test_split_top_level_keeps_parenthesised_semicolons() {
        assert_eq!(
            split_top_level("no @ (Mo 08:00-10:00; Tu 08:00-10:00); free @ (Su)"),
            vec!["no @ (Mo 08:00-10:00; Tu 08:00-10:00)", "free @ (Su)"]
        );
    }
}
