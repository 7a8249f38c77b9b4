use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::combat::{self, MoveKind};
use crate::constants::{
    class_spec, ARTILLERY_DAMAGE, MIN_PLAYERS, OUTPOST_BONUS, PALETTE,
};
use crate::grid::Grid;
use crate::types::{
    CellView, Coord, EliminationNotice, EliminationReason, GameOverReason, PlayerClass,
    PlayerColor, RoomError, RoomEvent, RosterEntry, Terrain, Unit, Winner,
};
use crate::visibility;

/// Bijective connection-id <-> color binding. Reconnection is a single
/// `rebind`; no other map surgery exists.
#[derive(Clone, Debug, Default)]
pub struct IdentityTable {
    by_conn: HashMap<String, PlayerColor>,
    by_color: HashMap<PlayerColor, String>,
}

impl IdentityTable {
    pub fn bind(&mut self, conn_id: &str, color: PlayerColor) {
        self.by_conn.insert(conn_id.to_string(), color);
        self.by_color.insert(color, conn_id.to_string());
    }

    pub fn rebind(&mut self, old_conn: &str, new_conn: &str) -> Option<PlayerColor> {
        let color = self.by_conn.remove(old_conn)?;
        self.by_conn.insert(new_conn.to_string(), color);
        self.by_color.insert(color, new_conn.to_string());
        Some(color)
    }

    pub fn unbind_color(&mut self, color: PlayerColor) -> Option<String> {
        let conn = self.by_color.remove(&color)?;
        self.by_conn.remove(&conn);
        Some(conn)
    }

    pub fn color_of(&self, conn_id: &str) -> Option<PlayerColor> {
        self.by_conn.get(conn_id).copied()
    }

    pub fn conn_of(&self, color: PlayerColor) -> Option<&str> {
        self.by_color.get(&color).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_conn.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_conn.len()
    }
}

/// Everything a room mutation produced: broadcast events, targeted
/// elimination notices, and whether this mutation ended the match.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoomUpdate {
    pub changed: bool,
    pub events: Vec<RoomEvent>,
    pub notices: Vec<EliminationNotice>,
    pub game_over: bool,
}

#[derive(Clone, Debug)]
pub struct LeaveReport {
    pub color: PlayerColor,
    pub new_host: Option<PlayerColor>,
    pub empty: bool,
    pub update: RoomUpdate,
}

/// One match instance. All mutations are synchronous; the caller serializes
/// access (one mutex per room).
#[derive(Debug)]
pub struct Room {
    code: String,
    pub grid: Grid,
    rng: StdRng,
    identity: IdentityTable,
    classes: HashMap<PlayerColor, PlayerClass>,
    names: HashMap<PlayerColor, String>,
    tokens: HashMap<PlayerColor, String>,
    join_order: Vec<PlayerColor>,
    eliminated: HashSet<PlayerColor>,
    disconnected: HashSet<PlayerColor>,
    alive_players: usize,
    host: Option<PlayerColor>,
    started: bool,
    winner: Option<Winner>,
}

impl Room {
    pub fn new(code: &str, seed: u64) -> Self {
        Self {
            code: code.to_string(),
            grid: Grid::generate(seed),
            rng: StdRng::seed_from_u64(seed ^ 0x9e37_79b9_7f4a_7c15),
            identity: IdentityTable::default(),
            classes: HashMap::new(),
            names: HashMap::new(),
            tokens: HashMap::new(),
            join_order: Vec::new(),
            eliminated: HashSet::new(),
            disconnected: HashSet::new(),
            alive_players: 0,
            host: None,
            started: false,
            winner: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn winner(&self) -> Option<Winner> {
        self.winner
    }

    pub fn host(&self) -> Option<PlayerColor> {
        self.host
    }

    pub fn alive_players(&self) -> usize {
        self.alive_players
    }

    pub fn player_count(&self) -> usize {
        self.join_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identity.is_empty()
    }

    pub fn color_of(&self, conn_id: &str) -> Option<PlayerColor> {
        self.identity.color_of(conn_id)
    }

    pub fn conn_of(&self, color: PlayerColor) -> Option<&str> {
        self.identity.conn_of(color)
    }

    pub fn class_of(&self, color: PlayerColor) -> PlayerClass {
        self.classes
            .get(&color)
            .copied()
            .unwrap_or(PlayerClass::Rusher)
    }

    pub fn name_of(&self, color: PlayerColor) -> Option<&str> {
        self.names.get(&color).map(String::as_str)
    }

    pub fn is_eliminated(&self, color: PlayerColor) -> bool {
        self.eliminated.contains(&color)
    }

    pub fn winner_name(&self) -> Option<&str> {
        match self.winner? {
            Winner::Color(color) => self.name_of(color),
            Winner::Draw => None,
        }
    }

    /// Connection ids of every participant with a live transport, paired
    /// with their color. The fan-out surface for broadcasts.
    pub fn connected_participants(&self) -> Vec<(String, PlayerColor)> {
        self.join_order
            .iter()
            .filter(|color| !self.disconnected.contains(color))
            .filter_map(|color| {
                self.identity
                    .conn_of(*color)
                    .map(|conn| (conn.to_string(), *color))
            })
            .collect()
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.join_order
            .iter()
            .map(|color| RosterEntry {
                color: *color,
                name: self
                    .names
                    .get(color)
                    .cloned()
                    .unwrap_or_else(|| "Player".to_string()),
                host: self.host == Some(*color),
                connected: self.identity.conn_of(*color).is_some()
                    && !self.disconnected.contains(color),
                eliminated: self.eliminated.contains(color),
            })
            .collect()
    }

    pub fn vision_range(&self, color: PlayerColor) -> i32 {
        class_spec(self.class_of(color)).vision_range
    }

    pub fn filtered_state(&self, color: PlayerColor) -> Vec<Vec<CellView>> {
        visibility::filtered_view(&self.grid, color, self.vision_range(color))
    }

    pub fn join(
        &mut self,
        conn_id: &str,
        name: &str,
        class: PlayerClass,
        session_token: &str,
    ) -> Result<PlayerColor, RoomError> {
        if self.identity.color_of(conn_id).is_some() {
            return Err(RoomError::AlreadyInRoom);
        }
        if self.started {
            return Err(RoomError::MatchInProgress);
        }
        let Some(color) = PALETTE
            .iter()
            .copied()
            .find(|candidate| !self.join_order.contains(candidate))
        else {
            return Err(RoomError::RoomFull);
        };

        let spec = class_spec(class);
        self.grid
            .place_general(color, spec.starting_bonus, &mut self.rng);

        self.identity.bind(conn_id, color);
        self.classes.insert(color, class);
        self.names.insert(color, sanitize_name(name));
        self.tokens.insert(color, session_token.to_string());
        self.join_order.push(color);
        if self.host.is_none() {
            self.host = Some(color);
        }
        Ok(color)
    }

    pub fn start(&mut self, conn_id: &str) -> Result<RoomUpdate, RoomError> {
        let color = self.identity.color_of(conn_id).ok_or(RoomError::RoomNotFound)?;
        if self.host != Some(color) {
            return Err(RoomError::NotHost);
        }
        if self.started {
            return Err(RoomError::MatchInProgress);
        }
        if self.join_order.len() < MIN_PLAYERS {
            return Err(RoomError::InsufficientPlayers);
        }

        self.started = true;
        self.alive_players = self.join_order.len();
        Ok(RoomUpdate {
            changed: true,
            events: vec![RoomEvent::GameStart {
                players: self.alive_players,
            }],
            notices: Vec::new(),
            game_over: false,
        })
    }

    pub fn apply_move(
        &mut self,
        conn_id: &str,
        from: Coord,
        to: Coord,
        split: bool,
    ) -> Result<RoomUpdate, RoomError> {
        let color = self
            .identity
            .color_of(conn_id)
            .ok_or(RoomError::InvalidMove)?;
        if !self.started || self.winner.is_some() {
            return Err(RoomError::InvalidMove);
        }
        if self.eliminated.contains(&color) {
            return Err(RoomError::AlreadyEliminated);
        }

        let outcome = combat::apply_move(&mut self.grid, color, from, to, split)?;

        let mut update = RoomUpdate {
            changed: true,
            ..RoomUpdate::default()
        };
        if let MoveKind::Captured {
            general_of: Some(loser),
        } = outcome.kind
        {
            self.eliminate(loser, Some(color), EliminationReason::Captured, &mut update);
            self.check_winner(&mut update);
        }
        Ok(update)
    }

    /// Reinforcement production. Generals produce at their owner's class
    /// rate; outposts add their flat bonus here unless the owner's class
    /// earns it on the fast cadence instead.
    pub fn production_tick(&mut self) -> RoomUpdate {
        self.outpost_aware_production(false)
    }

    /// The faster outpost-only cadence for classes flagged `fast_outposts`.
    pub fn fast_outpost_tick(&mut self) -> RoomUpdate {
        self.outpost_aware_production(true)
    }

    fn outpost_aware_production(&mut self, fast_pass: bool) -> RoomUpdate {
        let mut update = RoomUpdate::default();
        if !self.started || self.winner.is_some() {
            return update;
        }

        for at in self.grid.coords().collect::<Vec<_>>() {
            let Some(owner) = self.grid.get(at).and_then(|cell| cell.owner) else {
                continue;
            };
            let spec = class_spec(self.class_of(owner));
            let cell = self.grid.get_mut(at).expect("coord is in bounds");
            if fast_pass {
                if cell.terrain == Terrain::Outpost && spec.fast_outposts {
                    cell.troops += OUTPOST_BONUS;
                    update.changed = true;
                }
                continue;
            }
            if cell.unit == Unit::General {
                cell.troops += spec.production_rate;
                update.changed = true;
            }
            if cell.terrain == Terrain::Outpost && !spec.fast_outposts {
                cell.troops += OUTPOST_BONUS;
                update.changed = true;
            }
        }
        update
    }

    /// Area damage from every artillery structure to the four orthogonal
    /// neighbors it does not own. Generals reduced to zero are eliminated in
    /// palette order with no attacker credit.
    pub fn artillery_tick(&mut self) -> RoomUpdate {
        let mut update = RoomUpdate::default();
        if !self.started || self.winner.is_some() {
            return update;
        }

        let mut doomed: Vec<PlayerColor> = Vec::new();
        let batteries: Vec<Coord> = self
            .grid
            .coords()
            .filter(|at| {
                self.grid
                    .get(*at)
                    .map(|cell| cell.terrain == Terrain::Artillery)
                    .unwrap_or(false)
            })
            .collect();

        for battery in batteries {
            let gunner = self.grid.get(battery).and_then(|cell| cell.owner);
            for at in self.grid.neighbors(battery).collect::<Vec<_>>() {
                let cell = self.grid.get_mut(at).expect("neighbor is in bounds");
                if cell.terrain == Terrain::Mountain {
                    continue;
                }
                if cell.owner == gunner {
                    continue;
                }
                if cell.owner.is_none() && cell.troops == 0 {
                    continue;
                }

                cell.troops = cell.troops.saturating_sub(ARTILLERY_DAMAGE);
                update.changed = true;
                let target_owner = cell.owner;
                if cell.troops == 0 {
                    if cell.unit == Unit::General {
                        if let Some(owner) = cell.owner {
                            doomed.push(owner);
                        }
                    } else {
                        cell.owner = None;
                    }
                }
                update.events.push(RoomEvent::ArtilleryFire {
                    from: battery,
                    to: at,
                    damage: ARTILLERY_DAMAGE,
                    owner: gunner,
                    target: target_owner,
                });
            }
        }

        doomed.sort_by_key(|color| color.palette_index());
        doomed.dedup();
        for color in doomed {
            if !self.eliminated.contains(&color) {
                self.eliminate(color, None, EliminationReason::Artillery, &mut update);
            }
        }
        self.check_winner(&mut update);
        update
    }

    /// Permanent departure: an explicit leave, or a pre-start disconnect.
    pub fn leave(&mut self, conn_id: &str) -> Option<LeaveReport> {
        let color = self.identity.color_of(conn_id)?;
        Some(self.depart(color))
    }

    /// Grace-period expiry for a disconnected participant.
    pub fn finalize_departure(&mut self, color: PlayerColor) -> Option<LeaveReport> {
        self.identity.conn_of(color)?;
        Some(self.depart(color))
    }

    fn depart(&mut self, color: PlayerColor) -> LeaveReport {
        let mut update = RoomUpdate {
            changed: true,
            ..RoomUpdate::default()
        };

        self.identity.unbind_color(color);
        self.disconnected.remove(&color);

        if self.started {
            if !self.eliminated.contains(&color) && self.winner.is_none() {
                self.eliminate(color, None, EliminationReason::Disconnect, &mut update);
                self.check_winner(&mut update);
            }
            // Color stays reserved until the room empties out.
        } else {
            self.grid.release_territory(color);
            self.join_order.retain(|candidate| *candidate != color);
            self.classes.remove(&color);
            self.names.remove(&color);
            self.tokens.remove(&color);
        }

        let new_host = if self.host == Some(color) {
            // Earliest-assigned remaining color with a live binding.
            self.host = self
                .join_order
                .iter()
                .copied()
                .find(|candidate| self.identity.conn_of(*candidate).is_some());
            self.host
        } else {
            None
        };

        LeaveReport {
            color,
            new_host,
            empty: self.identity.is_empty(),
            update,
        }
    }

    /// Transport loss for a participant of a started match. The binding is
    /// kept so a later `rebind_connection` can transfer it wholesale.
    pub fn mark_disconnected(&mut self, conn_id: &str) -> Option<(PlayerColor, Option<String>)> {
        let color = self.identity.color_of(conn_id)?;
        self.disconnected.insert(color);
        Some((color, self.tokens.get(&color).cloned()))
    }

    /// Reattaches a returning session to its color, class, name, host flag
    /// and alive/dead status - all of which live keyed by color and are
    /// untouched by the swap.
    pub fn rebind_connection(&mut self, old_conn: &str, new_conn: &str) -> Option<PlayerColor> {
        let color = self.identity.rebind(old_conn, new_conn)?;
        self.disconnected.remove(&color);
        Some(color)
    }

    pub fn reset(&mut self, conn_id: &str) -> Result<RoomUpdate, RoomError> {
        let color = self.identity.color_of(conn_id).ok_or(RoomError::RoomNotFound)?;
        // Anyone may reset a finished match; only the host may reshuffle the
        // lobby, and never while a match is live.
        if self.winner.is_none() {
            if self.host != Some(color) {
                return Err(RoomError::NotHost);
            }
            if self.started {
                return Err(RoomError::MatchInProgress);
            }
        }

        // Participants who departed mid-match lose their reserved colors now.
        let departed: Vec<PlayerColor> = self
            .join_order
            .iter()
            .copied()
            .filter(|candidate| self.identity.conn_of(*candidate).is_none())
            .collect();
        for gone in departed {
            self.join_order.retain(|candidate| *candidate != gone);
            self.classes.remove(&gone);
            self.names.remove(&gone);
            self.tokens.remove(&gone);
        }

        self.grid = Grid::generate(self.rng.random());
        for color in self.join_order.clone() {
            let spec = class_spec(self.class_of(color));
            self.grid
                .place_general(color, spec.starting_bonus, &mut self.rng);
        }

        self.eliminated.clear();
        self.alive_players = 0;
        self.started = false;
        self.winner = None;
        if self
            .host
            .map(|host| self.identity.conn_of(host).is_none())
            .unwrap_or(true)
        {
            self.host = self
                .join_order
                .iter()
                .copied()
                .find(|candidate| self.identity.conn_of(*candidate).is_some());
        }

        Ok(RoomUpdate {
            changed: true,
            ..RoomUpdate::default()
        })
    }

    fn eliminate(
        &mut self,
        loser: PlayerColor,
        attacker: Option<PlayerColor>,
        reason: EliminationReason,
        update: &mut RoomUpdate,
    ) {
        let rank = self.alive_players;
        self.eliminated.insert(loser);
        self.alive_players = self.alive_players.saturating_sub(1);

        match (reason, attacker) {
            (EliminationReason::Captured, Some(winner)) => {
                self.grid.transfer_territory(loser, winner);
            }
            _ => {
                self.grid.release_territory(loser);
            }
        }

        update.events.push(RoomEvent::PlayerEliminated {
            color: loser,
            by: attacker,
            reason,
        });
        update.notices.push(EliminationNotice {
            color: loser,
            rank,
            by: attacker,
        });
    }

    fn check_winner(&mut self, update: &mut RoomUpdate) {
        if !self.started || self.winner.is_some() {
            return;
        }
        match self.alive_players {
            0 => {
                self.winner = Some(Winner::Draw);
                update.events.push(RoomEvent::GameOver {
                    winner: None,
                    draw: true,
                    reason: GameOverReason::Draw,
                    wins: None,
                });
                update.game_over = true;
            }
            1 => {
                let survivor = self
                    .join_order
                    .iter()
                    .copied()
                    .find(|color| !self.eliminated.contains(color));
                if let Some(color) = survivor {
                    self.winner = Some(Winner::Color(color));
                    update.events.push(RoomEvent::GameOver {
                        winner: Some(color),
                        draw: false,
                        reason: GameOverReason::LastManStanding,
                        wins: None,
                    });
                    update.game_over = true;
                }
            }
            _ => {}
        }
    }

    /// Room-level sanity check: every alive participant of a started match
    /// has exactly one General cell. A violation is a resolver bug and is
    /// fatal to this room only.
    pub fn check_invariants(&self) -> Result<(), String> {
        if !self.started || self.winner.is_some() {
            return Ok(());
        }
        for color in &self.join_order {
            if self.eliminated.contains(color) {
                continue;
            }
            let generals = self
                .grid
                .coords()
                .filter(|at| {
                    self.grid
                        .get(*at)
                        .map(|cell| cell.unit == Unit::General && cell.owner == Some(*color))
                        .unwrap_or(false)
                })
                .count();
            if generals != 1 {
                return Err(format!(
                    "{} holds {} general cells",
                    color.as_str(),
                    generals
                ));
            }
        }
        Ok(())
    }
}

fn sanitize_name(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "Player".to_string();
    }
    trimmed.chars().take(16).collect()
}
