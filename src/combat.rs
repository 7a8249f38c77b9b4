use crate::grid::Grid;
use crate::types::{Coord, PlayerColor, RoomError, Terrain, Unit};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveKind {
    /// Destination was already owned by the mover; troops merged.
    FriendlyMerge,
    /// Attacker took the cell. Carries the previous owner's color when the
    /// cell held their General (an elimination event for the caller).
    Captured { general_of: Option<PlayerColor> },
    /// Defender held; attacker force was fully spent.
    Repelled,
    /// Mutual annihilation; the cell went neutral.
    Neutralized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub moved: u32,
    pub kind: MoveKind,
}

pub fn validate_move(
    grid: &Grid,
    mover: PlayerColor,
    from: Coord,
    to: Coord,
) -> Result<(), RoomError> {
    let Some(source) = grid.get(from) else {
        return Err(RoomError::InvalidMove);
    };
    let Some(target) = grid.get(to) else {
        return Err(RoomError::InvalidMove);
    };
    if source.owner != Some(mover)
        || source.troops <= 1
        || from.manhattan(to) != 1
        || target.terrain == Terrain::Mountain
    {
        return Err(RoomError::InvalidMove);
    }
    Ok(())
}

/// Resolves one troop movement. Split moves send `floor(troops / 2)`; full
/// moves leave a garrison of 1. The mover's General marker travels with a
/// full move when the destination ends up owned by the mover.
pub fn apply_move(
    grid: &mut Grid,
    mover: PlayerColor,
    from: Coord,
    to: Coord,
    split: bool,
) -> Result<MoveOutcome, RoomError> {
    validate_move(grid, mover, from, to)?;

    let source = *grid.get(from).expect("validated source");
    let target = *grid.get(to).expect("validated target");

    let moved = if split {
        source.troops / 2
    } else {
        source.troops - 1
    };
    if moved < 1 {
        return Err(RoomError::InvalidMove);
    }

    let relocating_general = !split && source.unit == Unit::General;

    let kind = if target.owner == Some(mover) {
        let cell = grid.get_mut(to).expect("validated target");
        cell.troops += moved;
        if relocating_general {
            cell.unit = Unit::General;
        }
        MoveKind::FriendlyMerge
    } else if moved > target.troops {
        let general_of = (target.unit == Unit::General)
            .then_some(target.owner)
            .flatten();
        let cell = grid.get_mut(to).expect("validated target");
        cell.owner = Some(mover);
        cell.troops = moved - target.troops;
        if !matches!(cell.terrain, Terrain::Outpost | Terrain::Artillery) {
            cell.terrain = Terrain::Empty;
        }
        cell.unit = if relocating_general {
            Unit::General
        } else {
            Unit::None
        };
        MoveKind::Captured { general_of }
    } else if moved < target.troops {
        let cell = grid.get_mut(to).expect("validated target");
        cell.troops = target.troops - moved;
        MoveKind::Repelled
    } else {
        // Equal forces annihilate. A General's cell is the one exception: it
        // stays owned at zero troops so a live player's command cell is never
        // orphaned.
        let cell = grid.get_mut(to).expect("validated target");
        cell.troops = 0;
        if cell.unit != Unit::General {
            cell.owner = None;
        }
        MoveKind::Neutralized
    };

    let source_cell = grid.get_mut(from).expect("validated source");
    source_cell.troops -= moved;
    if relocating_general && !matches!(kind, MoveKind::Repelled | MoveKind::Neutralized) {
        source_cell.unit = Unit::None;
    }

    Ok(MoveOutcome { moved, kind })
}
