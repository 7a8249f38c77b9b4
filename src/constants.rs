use crate::types::{ClassSpec, PlayerClass, PlayerColor};

pub const GRID_SIZE: i32 = 20;
pub const MOUNTAIN_DENSITY: f64 = 0.15;
pub const OUTPOST_COUNT: usize = 8;
pub const ARTILLERY_COUNT: usize = 4;

pub const GENERAL_START_TROOPS: u32 = 10;
pub const OUTPOST_NEUTRAL_GARRISON: (u32, u32) = (10, 20);
pub const ARTILLERY_NEUTRAL_GARRISON: (u32, u32) = (15, 25);

pub const PRODUCTION_TICK_MS: u64 = 1_000;
pub const ARTILLERY_TICK_MS: u64 = 2_000;
pub const FAST_OUTPOST_TICK_MS: u64 = 500;

pub const OUTPOST_BONUS: u32 = 1;
pub const ARTILLERY_DAMAGE: u32 = 2;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS: usize = PALETTE.len();

pub const DEFAULT_GRACE_PERIOD_MS: u64 = 60_000;

pub const ROOM_CODE_LEN: usize = 4;
pub const ROOM_CODE_ALPHABET: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

// Assignment order doubles as the deterministic tie-break order for
// simultaneous eliminations.
pub const PALETTE: [PlayerColor; 8] = [
    PlayerColor::Red,
    PlayerColor::Blue,
    PlayerColor::Green,
    PlayerColor::Yellow,
    PlayerColor::Purple,
    PlayerColor::Orange,
    PlayerColor::Teal,
    PlayerColor::Pink,
];

pub fn class_spec(class: PlayerClass) -> ClassSpec {
    match class {
        PlayerClass::Tank => ClassSpec {
            production_rate: 2,
            starting_bonus: 0,
            vision_range: 1,
            fast_outposts: false,
        },
        PlayerClass::Rusher => ClassSpec {
            production_rate: 1,
            starting_bonus: 20,
            vision_range: 1,
            fast_outposts: true,
        },
        PlayerClass::Scout => ClassSpec {
            production_rate: 1,
            starting_bonus: 0,
            vision_range: 2,
            fast_outposts: false,
        },
    }
}
