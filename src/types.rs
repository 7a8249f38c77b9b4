use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terrain {
    Empty,
    Mountain,
    Outpost,
    Artillery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    None,
    General,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Orange,
    Teal,
    Pink,
}

impl PlayerColor {
    pub fn palette_index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Purple => "purple",
            Self::Orange => "orange",
            Self::Teal => "teal",
            Self::Pink => "pink",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerClass {
    Tank,
    Rusher,
    Scout,
}

impl PlayerClass {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tank" => Some(Self::Tank),
            "rusher" => Some(Self::Rusher),
            "scout" => Some(Self::Scout),
            _ => None,
        }
    }

    // Unknown class strings fall back to rusher, matching the default the
    // web client sends.
    pub fn parse_or_default(value: &str) -> Self {
        Self::parse(value).unwrap_or(Self::Rusher)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ClassSpec {
    pub production_rate: u32,
    pub starting_bonus: u32,
    pub vision_range: i32,
    pub fast_outposts: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: Coord) -> i32 {
        (self.x - other.x).abs() + (self.y - other.y).abs()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub terrain: Terrain,
    pub owner: Option<PlayerColor>,
    pub troops: u32,
    pub unit: Unit,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            terrain: Terrain::Empty,
            owner: None,
            troops: 0,
            unit: Unit::None,
        }
    }
}

/// Per-recipient view of one cell. Fogged cells carry no terrain, owner or
/// troop information whatsoever.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CellView {
    Fog { fog: bool },
    Seen {
        terrain: Terrain,
        owner: Option<PlayerColor>,
        troops: u32,
        unit: Unit,
    },
}

impl CellView {
    pub fn fog() -> Self {
        Self::Fog { fog: true }
    }

    pub fn seen(cell: &Cell) -> Self {
        Self::Seen {
            terrain: cell.terrain,
            owner: cell.owner,
            troops: cell.troops,
            unit: cell.unit,
        }
    }

    pub fn is_fog(&self) -> bool {
        matches!(self, Self::Fog { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EliminationReason {
    Captured,
    Disconnect,
    Artillery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOverReason {
    LastManStanding,
    Draw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Winner {
    Color(PlayerColor),
    Draw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomError {
    RoomNotFound,
    RoomFull,
    AlreadyInRoom,
    MatchInProgress,
    NotHost,
    InsufficientPlayers,
    InvalidMove,
    AlreadyEliminated,
}

impl RoomError {
    pub fn message(self) -> &'static str {
        match self {
            Self::RoomNotFound => "no room with that code",
            Self::RoomFull => "room is full",
            Self::AlreadyInRoom => "already in a room",
            Self::MatchInProgress => "match already in progress",
            Self::NotHost => "only the host can do that",
            Self::InsufficientPlayers => "not enough players to start",
            Self::InvalidMove => "invalid move",
            Self::AlreadyEliminated => "player is eliminated",
        }
    }
}

impl std::fmt::Display for RoomError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for RoomError {}

/// Broadcast events produced by room mutations. Serialized directly as
/// outbound frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomEvent {
    GameStart {
        players: usize,
    },
    PlayerEliminated {
        color: PlayerColor,
        by: Option<PlayerColor>,
        reason: EliminationReason,
    },
    PlayerDisconnecting {
        color: PlayerColor,
        #[serde(rename = "graceSecs")]
        grace_secs: u64,
    },
    PlayerReconnected {
        color: PlayerColor,
    },
    ArtilleryFire {
        from: Coord,
        to: Coord,
        damage: u32,
        owner: Option<PlayerColor>,
        target: Option<PlayerColor>,
    },
    GameOver {
        winner: Option<PlayerColor>,
        draw: bool,
        reason: GameOverReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        wins: Option<u64>,
    },
}

/// Targeted notice for the eliminated participant themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EliminationNotice {
    pub color: PlayerColor,
    pub rank: usize,
    pub by: Option<PlayerColor>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RosterEntry {
    pub color: PlayerColor,
    pub name: String,
    pub host: bool,
    pub connected: bool,
    pub eliminated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fog_cell_serializes_without_grid_data() {
        let payload = serde_json::to_value(CellView::fog()).expect("serialize fog");
        assert_eq!(payload, serde_json::json!({ "fog": true }));
    }

    #[test]
    fn seen_cell_serializes_full_contents() {
        let cell = Cell {
            terrain: Terrain::Outpost,
            owner: Some(PlayerColor::Blue),
            troops: 7,
            unit: Unit::None,
        };
        let payload = serde_json::to_value(CellView::seen(&cell)).expect("serialize cell");
        assert_eq!(
            payload,
            serde_json::json!({
                "terrain": "outpost",
                "owner": "blue",
                "troops": 7,
                "unit": "none",
            })
        );
    }

    #[test]
    fn class_parse_falls_back_to_rusher() {
        assert_eq!(PlayerClass::parse_or_default("tank"), PlayerClass::Tank);
        assert_eq!(PlayerClass::parse_or_default("warlock"), PlayerClass::Rusher);
    }

    #[test]
    fn room_event_uses_type_tag() {
        let event = RoomEvent::PlayerDisconnecting {
            color: PlayerColor::Red,
            grace_secs: 60,
        };
        let payload = serde_json::to_value(&event).expect("serialize event");
        assert_eq!(payload["type"], "player_disconnecting");
        assert_eq!(payload["graceSecs"], 60);
    }
}
