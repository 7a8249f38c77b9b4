use std::collections::HashSet;

use crate::grid::Grid;
use crate::types::{CellView, Coord, PlayerColor};

/// Every coordinate `color` may observe: cells it owns plus cells within
/// Manhattan distance `range` of an owned cell.
pub fn visible_set(grid: &Grid, color: PlayerColor, range: i32) -> HashSet<Coord> {
    let mut visible = HashSet::new();
    for at in grid.coords() {
        let cell = grid.get(at).expect("coord comes from the grid");
        if cell.owner != Some(color) {
            continue;
        }
        for dy in -range..=range {
            let span = range - dy.abs();
            for dx in -span..=span {
                let seen = Coord::new(at.x + dx, at.y + dy);
                if grid.in_bounds(seen) {
                    visible.insert(seen);
                }
            }
        }
    }
    visible
}

/// The fog-filtered board sent to one recipient. This is the only shape the
/// grid ever leaves the server in; cells outside the visible set carry an
/// opaque fog marker and nothing else.
pub fn filtered_view(grid: &Grid, color: PlayerColor, range: i32) -> Vec<Vec<CellView>> {
    let visible = visible_set(grid, color, range);
    (0..grid.size())
        .map(|y| {
            (0..grid.size())
                .map(|x| {
                    let at = Coord::new(x, y);
                    if visible.contains(&at) {
                        CellView::seen(grid.get(at).expect("coord is in bounds"))
                    } else {
                        CellView::fog()
                    }
                })
                .collect()
        })
        .collect()
}
