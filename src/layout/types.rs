use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub from: Point,
    pub to: Point,
}

/// Axis-aligned node rectangle; `x`/`y` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x, self.y),
            Point::new(self.right(), self.y),
            Point::new(self.right(), self.bottom()),
            Point::new(self.x, self.bottom()),
        ]
    }

    pub fn sides(&self) -> [Segment; 4] {
        let [a, b, c, d] = self.corners();
        [
            Segment { from: a, to: b },
            Segment { from: b, to: c },
            Segment { from: c, to: d },
            Segment { from: d, to: a },
        ]
    }

    pub fn inflate(&self, pad: f64) -> Rect {
        Rect {
            x: self.x - pad,
            y: self.y - pad,
            width: self.width + 2.0 * pad,
            height: self.height + 2.0 * pad,
        }
    }
}

/// Edge after virtual-node expansion. `origin` indexes the non-loop edge it was cut from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedEdge {
    pub from: String,
    pub to: String,
    pub origin: usize,
}

/// Placement known after ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub rank: usize,
    pub order: usize,
    pub width: f64,
    pub height: f64,
}

/// Final placement; `x`/`y` is the top-left corner of the node box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub rank: usize,
    pub order: usize,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnNode {
    pub rank: usize,
    pub order: usize,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawnEdge {
    pub from: String,
    pub to: String,
    pub points: Vec<Point>,
}

/// Complete drawing of a graph: real nodes only, one polyline per input edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub nodes: BTreeMap<String, DrawnNode>,
    pub edges: Vec<DrawnEdge>,
    /// Input edge indices that fell back to a direct segment.
    pub unrouted: Vec<usize>,
    pub crossings: usize,
}

impl Drawing {
    pub fn width(&self) -> f64 {
        self.nodes
            .values()
            .map(|node| node.x + node.width)
            .fold(0.0, f64::max)
    }

    pub fn height(&self) -> f64 {
        self.nodes
            .values()
            .map(|node| node.y + node.height)
            .fold(0.0, f64::max)
    }
}
