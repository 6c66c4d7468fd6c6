//! Placement of new nodes on the canvas
//!
//! Positions are in canvas coordinates. The viewport's `x`/`y` are a pan
//! offset in screen pixels, so the visible canvas rectangle is
//! `(-x / zoom, -y / zoom)` to `((-x + width) / zoom, (-y + height) / zoom)`.

use crate::types::{Dimensions, FlowNode, NodeKind, Position, Viewport};

/// Axis-aligned rectangle in canvas coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(position: Position, dims: Dimensions) -> Self {
        Self {
            x: position.x,
            y: position.y,
            width: dims.width,
            height: dims.height,
        }
    }

    /// Whether the rectangles come closer than `gap` to each other
    pub fn overlaps(&self, other: &Rect, gap: f64) -> bool {
        !(self.x + self.width + gap <= other.x
            || other.x + other.width + gap <= self.x
            || self.y + self.height + gap <= other.y
            || other.y + other.height + gap <= self.y)
    }
}

/// Estimated footprint of a node already on the canvas
pub fn footprint(node: &FlowNode) -> Rect {
    let dims = NodeKind::parse(&node.node_type)
        .unwrap_or(NodeKind::Default)
        .estimated_dimensions();
    Rect::new(node.position, dims)
}

/// Keep a node of size `dims` inside the visible viewport
///
/// Leaves `margin` screen pixels between the node and every viewport edge.
/// When the viewport is too small for that, the top/left bound wins.
pub fn clamp_to_viewport(pos: Position, dims: Dimensions, vp: &Viewport, margin: f64) -> Position {
    let z = if vp.zoom > 0.0 { vp.zoom } else { 1.0 };
    let view_left = -vp.x / z;
    let view_top = -vp.y / z;
    let view_right = (-vp.x + vp.width) / z;
    let view_bottom = (-vp.y + vp.height) / z;

    let min_x = view_left + margin / z;
    let max_x = view_right - (dims.width + margin / z);
    let min_y = view_top + margin / z;
    let max_y = view_bottom - (dims.height + margin / z);

    Position {
        x: min_x.max(pos.x.min(max_x)),
        y: min_y.max(pos.y.min(max_y)),
    }
}

/// Candidate position centred on a point the user targeted
pub fn centered_on(target: Position, dims: Dimensions) -> Position {
    Position {
        x: target.x - dims.width / 2.0,
        y: target.y - dims.height / 2.0,
    }
}

/// Fallback position near the top-left of the visible canvas
pub fn default_position(vp: &Viewport, dims: Dimensions) -> Position {
    let z = if vp.zoom > 0.0 { vp.zoom } else { 1.0 };
    Position {
        x: (100.0 - vp.x) / z - dims.width / 2.0,
        y: (100.0 - vp.y) / z - dims.height / 2.0,
    }
}

/// Position for a new child below `parent`
///
/// All children share one row `gap_y` below the parent. The first child is
/// centred under the parent; later ones alternate right and left of the
/// existing row so earlier children never move.
pub fn child_position(
    parent: Rect,
    existing_children: &[Rect],
    dims: Dimensions,
    gap_x: f64,
    gap_y: f64,
) -> Position {
    let y = parent.y + parent.height + gap_y;
    let index = existing_children.len();

    if index == 0 {
        let parent_center = parent.x + parent.width / 2.0;
        return Position {
            x: parent_center - dims.width / 2.0,
            y,
        };
    }

    if index % 2 == 1 {
        let rightmost = existing_children
            .iter()
            .copied()
            .fold(existing_children[0], |max, r| if r.x > max.x { r } else { max });
        let width = rightmost.width.max(dims.width);
        Position {
            x: rightmost.x + width + gap_x,
            y,
        }
    } else {
        let leftmost = existing_children
            .iter()
            .copied()
            .fold(existing_children[0], |min, r| if r.x < min.x { r } else { min });
        Position {
            x: leftmost.x - gap_x - dims.width,
            y,
        }
    }
}

/// Search settings for [`find_free_position`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FreeSpaceSearch {
    /// Distance between probed candidates
    pub grid_step: f64,
    /// How far from the start to search
    pub radius: f64,
    /// Minimum clearance to existing nodes
    pub clearance: f64,
}

impl Default for FreeSpaceSearch {
    fn default() -> Self {
        Self {
            grid_step: 30.0,
            radius: 600.0,
            clearance: 40.0,
        }
    }
}

/// Nearest grid position to `start` that keeps clear of `occupied`
///
/// Probes rings of growing size around `start`. Falls back to `start` when
/// nothing within the radius is free.
pub fn find_free_position(
    occupied: &[Rect],
    dims: Dimensions,
    start: Position,
    search: FreeSpaceSearch,
) -> Position {
    let is_free = |pos: Position| {
        let candidate = Rect::new(pos, dims);
        !occupied.iter().any(|r| candidate.overlaps(r, search.clearance))
    };

    if is_free(start) {
        return start;
    }
    if search.grid_step <= 0.0 {
        return start;
    }

    let rings = (search.radius / search.grid_step).ceil() as i64;
    for ring in 1..=rings {
        for dy in -ring..=ring {
            for dx in -ring..=ring {
                if dx.abs() != ring && dy.abs() != ring {
                    continue;
                }
                let pos = Position {
                    x: start.x + dx as f64 * search.grid_step,
                    y: start.y + dy as f64 * search.grid_step,
                };
                if is_free(pos) {
                    return pos;
                }
            }
        }
    }
    log::debug!("No free position within {} of {:?}", search.radius, start);
    start
}
