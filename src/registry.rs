use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::Mutex;

use crate::constants::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN};
use crate::room::Room;
use crate::scheduler::RoomScheduler;

/// A room plus the interval tasks that drive it. Locked as a unit so a tick
/// can never race a reset against the same room.
pub struct RoomHandle {
    pub room: Room,
    pub timers: RoomScheduler,
}

pub type SharedRoom = Arc<Mutex<RoomHandle>>;

/// Code -> room map. Each room carries its own lock, so mutations in
/// different rooms never contend here beyond the lookup.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, SharedRoom>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, seed: u64) -> (String, SharedRoom) {
        let code = self.unique_code();
        let handle = Arc::new(Mutex::new(RoomHandle {
            room: Room::new(&code, seed),
            timers: RoomScheduler::new(),
        }));
        self.rooms.insert(code.clone(), handle.clone());
        (code, handle)
    }

    pub fn get(&self, code: &str) -> Option<SharedRoom> {
        self.rooms.get(code).cloned()
    }

    pub fn remove(&mut self, code: &str) -> Option<SharedRoom> {
        self.rooms.remove(code)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn unique_code(&self) -> String {
        loop {
            let code = make_room_code();
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }
}

// The alphabet omits 0/O/1/I so codes survive being read aloud.
fn make_room_code() -> String {
    let alphabet = ROOM_CODE_ALPHABET.as_bytes();
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_use_only_the_unambiguous_alphabet() {
        for _ in 0..64 {
            let code = make_room_code();
            assert_eq!(code.len(), ROOM_CODE_LEN);
            assert!(code.chars().all(|c| ROOM_CODE_ALPHABET.contains(c)));
        }
    }

    #[test]
    fn create_allocates_distinct_codes() {
        let mut registry = RoomRegistry::new();
        let mut seen = std::collections::HashSet::new();
        for seed in 0..32 {
            let (code, _) = registry.create(seed);
            assert!(seen.insert(code));
        }
        assert_eq!(registry.room_count(), 32);
    }

    #[test]
    fn get_and_remove_round_trip() {
        let mut registry = RoomRegistry::new();
        let (code, handle) = registry.create(1);
        assert!(registry.get(&code).is_some());
        assert!(Arc::ptr_eq(&registry.get(&code).unwrap(), &handle));

        registry.remove(&code);
        assert!(registry.get(&code).is_none());
        assert_eq!(registry.room_count(), 0);
    }
}
