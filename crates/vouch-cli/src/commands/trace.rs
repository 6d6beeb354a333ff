//! `vouch trace` - forensic timeline of one task.
//!
//! The tree is rebuilt from `parent_id` links at read time; nothing is
//! cached. Roots are events with an empty `parent_id`, children are indexed
//! by parent.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Result};
use vouch_core::event::{event_type, Event};
use vouch_core::repo::EventRepository;

use super::{open_repo, short};

pub fn run(db: &Path, task_id: &str) -> Result<()> {
    let repo = open_repo(db)?;

    let events = repo.events_by_task(task_id)?;
    if events.is_empty() {
        bail!("no events found for task {task_id}");
    }

    println!("Forensic timeline: {task_id}");
    println!("Run:   {}", short(&events[0].run_id));
    println!("Start: {}", events[0].timestamp_rfc3339());
    println!("{}", "=".repeat(60));

    let (roots, children) = build_tree(&events);
    for (i, root) in roots.iter().enumerate() {
        print_node(root, &children, "", i == roots.len() - 1);
    }
    Ok(())
}

/// Splits events into roots and a parent → children index. Events arrive
/// ordered by `seq_index`, so sibling order is chronological.
fn build_tree<'a>(events: &'a [Event]) -> (Vec<&'a Event>, HashMap<&'a str, Vec<&'a Event>>) {
    let mut roots = Vec::new();
    let mut children: HashMap<&str, Vec<&Event>> = HashMap::new();

    for event in events {
        if event.parent_id.is_empty() {
            roots.push(event);
        } else {
            children.entry(event.parent_id.as_str()).or_default().push(event);
        }
    }
    (roots, children)
}

fn print_node(
    event: &Event,
    children: &HashMap<&str, Vec<&Event>>,
    prefix: &str,
    is_last: bool,
) {
    let marker = if is_last { "└── " } else { "├── " };

    let symbol = if event.was_blocked {
        "×"
    } else if event.risk_level == "critical" {
        "‼"
    } else if event.event_type == event_type::TOOL_RESPONSE {
        "●"
    } else {
        "○"
    };

    let label = if event.method.is_empty() {
        event.event_type.as_str()
    } else {
        event.method.as_str()
    };
    println!("{prefix}{marker}{symbol} {label} [{}]", short(&event.id));

    let child_prefix = if is_last {
        format!("{prefix}    ")
    } else {
        format!("{prefix}│   ")
    };
    if let Some(kids) = children.get(event.id.as_str()) {
        for (i, kid) in kids.iter().enumerate() {
            print_node(kid, children, &child_prefix, i == kids.len() - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, parent: &str, kind: &str) -> Event {
        Event {
            id: id.to_string(),
            parent_id: parent.to_string(),
            event_type: kind.to_string(),
            ..Event::default()
        }
    }

    #[test]
    fn tree_has_one_root_and_chained_descendants() {
        // call -> response -> follow-up call, as one task records them.
        let events = vec![
            event("a", "", event_type::TOOL_CALL),
            event("b", "a", event_type::TOOL_RESPONSE),
            event("c", "b", event_type::TOOL_CALL),
        ];

        let (roots, children) = build_tree(&events);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, "a");
        assert_eq!(children.get("a").unwrap()[0].id, "b");
        assert_eq!(children.get("b").unwrap()[0].id, "c");
        assert!(children.get("c").is_none());
    }

    #[test]
    fn siblings_stay_in_arrival_order() {
        let events = vec![
            event("root", "", event_type::TOOL_CALL),
            event("x", "root", event_type::TOOL_RESPONSE),
            event("y", "root", event_type::TOOL_RESPONSE),
        ];

        let (roots, children) = build_tree(&events);
        assert_eq!(roots.len(), 1);
        let kids: Vec<&str> = children.get("root").unwrap().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(kids, vec!["x", "y"]);
    }
}
