//! The routing tree: recursive matcher with continue semantics, timing
//! and groupBy inheritance.

use crate::error::CoreError;
use crate::label::LabelSet;
use crate::matcher::MatcherSet;
use chrono::Duration;
use std::collections::{BTreeSet, HashSet};

pub type RouteId = usize;

/// How a resolved node groups alerts. `Labels(vec![])` means "collapse
/// all matching alerts into one group per route"; `Wildcard` means
/// "every alert is its own group" (groupKey = alert fingerprint).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GroupBy {
    Wildcard,
    Labels(Vec<String>),
}

/// The raw, as-configured groupBy value on one node, before inheritance
/// is resolved. `Inherit` (the default) means "take the ancestor's
/// value verbatim".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum GroupBySpec {
    #[default]
    Inherit,
    Wildcard,
    Explicit(Vec<String>),
}

/// A route node as provided by the (external) config loader, before
/// construction-time validation and inheritance resolution.
#[derive(Clone, Debug, Default)]
pub struct RouteSpec {
    pub matchers: MatcherSet,
    pub continue_: bool,
    pub group_by: GroupBySpec,
    pub group_wait: Option<Duration>,
    pub group_interval: Option<Duration>,
    pub repeat_interval: Option<Duration>,
    pub receiver: Option<String>,
    pub children: Vec<RouteSpec>,
}

/// Scalar defaults supplied by configuration, used to fill in whatever
/// the root node leaves unset.
#[derive(Clone, Debug)]
pub struct RouteDefaults {
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
}

/// A fully resolved route node: every inheritable field has a concrete
/// value, filled in from the nearest ancestor that declared one.
#[derive(Clone, Debug)]
pub struct Route {
    pub id: RouteId,
    pub matchers: MatcherSet,
    pub continue_: bool,
    pub group_by: GroupBy,
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
    pub receiver: String,
    pub children: Vec<Route>,
}

/// A leaf destination returned by [`RouteTree::match_labels`].
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedRoute {
    pub route_id: RouteId,
    pub receiver: String,
    pub group_by: GroupBy,
    pub group_wait: Duration,
    pub group_interval: Duration,
    pub repeat_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct RouteTree {
    pub root: Route,
}

impl RouteTree {
    /// Builds and validates a route tree against the set of configured
    /// receiver names. Collects every violation into a single
    /// `ConfigInvalid` report rather than failing on the first one.
    pub fn build(spec: RouteSpec, receivers: &HashSet<String>, defaults: RouteDefaults) -> Result<RouteTree, CoreError> {
        if !spec.matchers.is_empty() {
            return Err(CoreError::config_invalid("root route must not declare matchers"));
        }
        if spec.continue_ {
            return Err(CoreError::config_invalid("root route must not declare continue"));
        }
        let mut errors = Vec::new();
        let mut next_id = 0usize;
        let root = resolve_node(
            &spec,
            &GroupBy::Labels(vec![]),
            defaults.group_wait,
            defaults.group_interval,
            defaults.repeat_interval,
            None,
            receivers,
            &mut next_id,
            &mut errors,
        );
        if !errors.is_empty() {
            return Err(CoreError::config_invalid(errors.join("; ")));
        }
        // root must end up with a receiver one way or another
        let root = root.expect("root resolution only fails by pushing to `errors`");
        Ok(RouteTree { root })
    }

    /// Depth-first, left-to-right match. Pure: same tree + same labels
    /// always produces the same, order-deterministic result.
    pub fn match_labels(&self, labels: &LabelSet) -> Vec<MatchedRoute> {
        let mut out = Vec::new();
        match_node(&self.root, labels, &mut out);
        out
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_node(
    spec: &RouteSpec,
    inherited_group_by: &GroupBy,
    inherited_group_wait: Duration,
    inherited_group_interval: Duration,
    inherited_repeat_interval: Duration,
    inherited_receiver: Option<&str>,
    receivers: &HashSet<String>,
    next_id: &mut usize,
    errors: &mut Vec<String>,
) -> Option<Route> {
    let id = *next_id;
    *next_id += 1;

    if let GroupBySpec::Explicit(labels) = &spec.group_by {
        let mut seen = BTreeSet::new();
        for l in labels {
            if !seen.insert(l.clone()) {
                errors.push(format!("route {id}: duplicate groupBy label {l:?}"));
            }
        }
    }

    let group_by = match resolve_group_by(inherited_group_by, &spec.group_by) {
        Ok(gb) => gb,
        Err(e) => {
            errors.push(format!("route {id}: {e}"));
            inherited_group_by.clone()
        }
    };

    let group_wait = spec.group_wait.unwrap_or(inherited_group_wait);
    let group_interval = spec.group_interval.unwrap_or(inherited_group_interval);
    let repeat_interval = spec.repeat_interval.unwrap_or(inherited_repeat_interval);

    if group_interval <= Duration::zero() {
        errors.push(format!("route {id}: groupInterval must be > 0"));
    }
    if repeat_interval <= Duration::zero() {
        errors.push(format!("route {id}: repeatInterval must be > 0"));
    }
    if group_wait < Duration::zero() {
        errors.push(format!("route {id}: groupWait must be >= 0"));
    }

    let receiver = spec.receiver.clone().or_else(|| inherited_receiver.map(str::to_string));
    match &receiver {
        Some(r) if !receivers.contains(r) => {
            errors.push(format!("route {id}: receiver {r:?} is not configured"));
        }
        None => {
            errors.push(format!("route {id}: no receiver configured or inherited"));
        }
        _ => {}
    }

    let children: Vec<Route> = spec
        .children
        .iter()
        .filter_map(|child| {
            resolve_node(
                child,
                &group_by,
                group_wait,
                group_interval,
                repeat_interval,
                receiver.as_deref(),
                receivers,
                next_id,
                errors,
            )
        })
        .collect();

    Some(Route {
        id,
        matchers: spec.matchers.clone(),
        continue_: spec.continue_,
        group_by,
        group_wait,
        group_interval,
        repeat_interval,
        receiver: receiver.unwrap_or_default(),
        children,
    })
}

fn resolve_group_by(inherited: &GroupBy, own: &GroupBySpec) -> Result<GroupBy, CoreError> {
    match own {
        GroupBySpec::Inherit => Ok(inherited.clone()),
        GroupBySpec::Wildcard => Ok(GroupBy::Wildcard),
        GroupBySpec::Explicit(labels) => {
            if labels.is_empty() {
                // Explicit `[]` overrides to "collapse all", even under a
                // non-wildcard ancestor.
                return Ok(GroupBy::Labels(vec![]));
            }
            match inherited {
                GroupBy::Wildcard => {
                    Err(CoreError::config_invalid("cannot mix wildcard groupBy with concrete label names"))
                }
                GroupBy::Labels(inherited_labels) => {
                    let mut set: BTreeSet<String> = inherited_labels.iter().cloned().collect();
                    set.extend(labels.iter().cloned());
                    Ok(GroupBy::Labels(set.into_iter().collect()))
                }
            }
        }
    }
}

/// Returns whether `node`'s subtree produced any destination.
fn match_node(node: &Route, labels: &LabelSet, out: &mut Vec<MatchedRoute>) -> bool {
    if !node.matchers.matches(labels) {
        return false;
    }
    let mut any_child_matched = false;
    for child in &node.children {
        if match_node(child, labels, out) {
            any_child_matched = true;
            if !child.continue_ {
                break;
            }
        }
    }
    if !any_child_matched {
        out.push(MatchedRoute {
            route_id: node.id,
            receiver: node.receiver.clone(),
            group_by: node.group_by.clone(),
            group_wait: node.group_wait,
            group_interval: node.group_interval,
            repeat_interval: node.repeat_interval,
        });
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;

    fn defaults() -> RouteDefaults {
        RouteDefaults {
            group_wait: Duration::seconds(0),
            group_interval: Duration::seconds(1),
            repeat_interval: Duration::hours(1),
        }
    }

    fn receivers(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn root_must_not_declare_matchers_or_continue() {
        let spec = RouteSpec {
            matchers: MatcherSet::new(vec![Matcher::equal("a", "b")]),
            receiver: Some("X".into()),
            ..Default::default()
        };
        assert!(RouteTree::build(spec, &receivers(&["X"]), defaults()).is_err());
    }

    #[test]
    fn basic_dispatch_groups_by_alertname() {
        let spec = RouteSpec {
            receiver: Some("X".into()),
            group_by: GroupBySpec::Explicit(vec!["alertname".into()]),
            ..Default::default()
        };
        let tree = RouteTree::build(spec, &receivers(&["X"]), defaults()).unwrap();
        let matched = tree.match_labels(&LabelSet::from_pairs([("alertname", "Down"), ("host", "h1")]));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].receiver, "X");
        assert_eq!(matched[0].group_by, GroupBy::Labels(vec!["alertname".into()]));
    }

    #[test]
    fn continue_produces_two_notifications() {
        let spec = RouteSpec {
            receiver: Some("root".into()),
            children: vec![
                RouteSpec {
                    matchers: MatcherSet::new(vec![Matcher::equal("team", "X")]),
                    continue_: true,
                    receiver: Some("A".into()),
                    ..Default::default()
                },
                RouteSpec {
                    matchers: MatcherSet::new(vec![Matcher::equal("team", "X")]),
                    receiver: Some("B".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let tree = RouteTree::build(spec, &receivers(&["root", "A", "B"]), defaults()).unwrap();
        let matched = tree.match_labels(&LabelSet::from_pairs([("team", "X")]));
        assert_eq!(matched.iter().map(|m| m.receiver.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn without_continue_only_first_child_matches() {
        let spec = RouteSpec {
            receiver: Some("root".into()),
            children: vec![
                RouteSpec {
                    matchers: MatcherSet::new(vec![Matcher::equal("team", "X")]),
                    receiver: Some("A".into()),
                    ..Default::default()
                },
                RouteSpec {
                    matchers: MatcherSet::new(vec![Matcher::equal("team", "X")]),
                    receiver: Some("B".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let tree = RouteTree::build(spec, &receivers(&["root", "A", "B"]), defaults()).unwrap();
        let matched = tree.match_labels(&LabelSet::from_pairs([("team", "X")]));
        assert_eq!(matched.iter().map(|m| m.receiver.as_str()).collect::<Vec<_>>(), vec!["A"]);
    }

    #[test]
    fn unmatched_child_falls_back_to_parent_as_destination() {
        let spec = RouteSpec {
            receiver: Some("root".into()),
            children: vec![RouteSpec {
                matchers: MatcherSet::new(vec![Matcher::equal("team", "X")]),
                receiver: Some("A".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let tree = RouteTree::build(spec, &receivers(&["root", "A"]), defaults()).unwrap();
        let matched = tree.match_labels(&LabelSet::from_pairs([("team", "Y")]));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].receiver, "root");
    }

    #[test]
    fn undefined_receiver_is_rejected() {
        let spec = RouteSpec { receiver: Some("missing".into()), ..Default::default() };
        assert!(RouteTree::build(spec, &receivers(&["X"]), defaults()).is_err());
    }

    #[test]
    fn wildcard_mixed_with_concrete_names_is_rejected() {
        let spec = RouteSpec {
            receiver: Some("X".into()),
            group_by: GroupBySpec::Wildcard,
            children: vec![RouteSpec {
                matchers: MatcherSet::new(vec![Matcher::equal("a", "b")]),
                group_by: GroupBySpec::Explicit(vec!["host".into()]),
                receiver: Some("X".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(RouteTree::build(spec, &receivers(&["X"]), defaults()).is_err());
    }

    #[test]
    fn duplicate_group_by_labels_rejected() {
        let spec = RouteSpec {
            receiver: Some("X".into()),
            group_by: GroupBySpec::Explicit(vec!["host".into(), "host".into()]),
            ..Default::default()
        };
        assert!(RouteTree::build(spec, &receivers(&["X"]), defaults()).is_err());
    }

    #[test]
    fn non_positive_intervals_rejected() {
        let spec = RouteSpec {
            receiver: Some("X".into()),
            group_interval: Some(Duration::zero()),
            ..Default::default()
        };
        assert!(RouteTree::build(spec, &receivers(&["X"]), defaults()).is_err());
    }

    #[test]
    fn matching_is_deterministic() {
        let spec = RouteSpec {
            receiver: Some("root".into()),
            children: vec![
                RouteSpec {
                    matchers: MatcherSet::new(vec![Matcher::equal("team", "X")]),
                    continue_: true,
                    receiver: Some("A".into()),
                    ..Default::default()
                },
                RouteSpec {
                    matchers: MatcherSet::new(vec![Matcher::equal("team", "X")]),
                    receiver: Some("B".into()),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let tree = RouteTree::build(spec, &receivers(&["root", "A", "B"]), defaults()).unwrap();
        let labels = LabelSet::from_pairs([("team", "X")]);
        let first = tree.match_labels(&labels);
        let second = tree.match_labels(&labels);
        assert_eq!(first, second);
    }
}
