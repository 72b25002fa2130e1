//! Grid placement from level assignments.
//!
//! Each level is a row. Within a row elements keep their input order and are
//! spaced evenly, and every row is centered against the widest row.

use std::collections::{BTreeMap, HashMap};

use crate::levels::{assign_levels_with, LevelStrategy};
use crate::normalize::ExtractedIbd;
use crate::{Diagram, Position};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    /// Horizontal distance between neighbours in a row
    pub x_spacing: f64,
    /// Vertical distance between rows
    pub y_spacing: f64,
    /// Y coordinate of level 0
    pub base_y: f64,
    pub strategy: LevelStrategy,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            x_spacing: 300.0,
            y_spacing: 200.0,
            base_y: 0.0,
            strategy: LevelStrategy::default(),
        }
    }
}

/// Position every element using the default configuration.
pub fn layout(diagram: Diagram) -> Diagram {
    layout_with(&LayoutConfig::default(), diagram)
}

/// Overwrite each element's position. Nothing else is touched, so running
/// this twice gives the same result.
pub fn layout_with(config: &LayoutConfig, mut diagram: Diagram) -> Diagram {
    let positions = {
        let ids: Vec<&str> = diagram.elements.iter().map(|e| e.id.as_str()).collect();
        let edges: Vec<(&str, &str)> = diagram
            .relationships
            .iter()
            .map(|r| (r.source_id.as_str(), r.target_id.as_str()))
            .collect();
        place(config, &ids, &edges)
    };
    for (element, position) in diagram.elements.iter_mut().zip(positions) {
        element.position = Some(position);
    }
    diagram
}

/// Position the nodes of an internal block diagram from its own edges.
pub fn layout_ibd(config: &LayoutConfig, ibd: &mut ExtractedIbd) {
    let positions = {
        let ids: Vec<&str> = ibd.nodes.iter().map(|n| n.id.as_str()).collect();
        let edges: Vec<(&str, &str)> = ibd
            .edges
            .iter()
            .map(|e| (e.source.as_str(), e.target.as_str()))
            .collect();
        place(config, &ids, &edges)
    };
    for (node, position) in ibd.nodes.iter_mut().zip(positions) {
        node.position = Some(position);
    }
}

fn place(config: &LayoutConfig, ids: &[&str], edges: &[(&str, &str)]) -> Vec<Position> {
    let levels = assign_levels_with(config.strategy, ids, edges);
    let level_of = |id: &str| levels.get(id).copied().unwrap_or(0);

    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for id in ids {
        *counts.entry(level_of(id)).or_default() += 1;
    }
    let widest = counts.values().copied().max().unwrap_or(0);

    let mut next_slot: HashMap<usize, usize> = HashMap::new();
    ids.iter()
        .map(|id| {
            let level = level_of(id);
            let count = counts.get(&level).copied().unwrap_or(0);
            let slot = next_slot.entry(level).or_default();
            let offset = (widest - count) as f64 / 2.0 * config.x_spacing;
            let x = *slot as f64 * config.x_spacing + offset;
            *slot += 1;
            Position {
                x,
                y: config.base_y + level as f64 * config.y_spacing,
            }
        })
        .collect()
}
