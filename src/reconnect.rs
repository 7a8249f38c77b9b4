use std::collections::HashMap;

use tokio::task::JoinHandle;

use crate::constants::DEFAULT_GRACE_PERIOD_MS;
use crate::types::PlayerColor;

#[derive(Clone, Copy, Debug)]
pub struct ReconnectOptions {
    pub grace_period_ms: u64,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
        }
    }
}

/// What a returning session needs to be stitched back into its room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisconnectedRecord {
    pub room_code: String,
    pub conn_id: String,
    pub color: PlayerColor,
    pub deadline_ms: u64,
}

/// Session token -> pending-departure record. Guarded by its own lock and
/// never touched while a room lock is held.
pub struct ReconnectTable {
    options: ReconnectOptions,
    records: HashMap<String, (DisconnectedRecord, JoinHandle<()>)>,
}

impl ReconnectTable {
    pub fn new(options: ReconnectOptions) -> Self {
        Self {
            options,
            records: HashMap::new(),
        }
    }

    pub fn grace_period_ms(&self) -> u64 {
        self.options.grace_period_ms
    }

    /// Registers a pending departure. A second disconnect for the same token
    /// supersedes the first and cancels its timer.
    pub fn register(&mut self, token: &str, record: DisconnectedRecord, timer: JoinHandle<()>) {
        if let Some((_, stale_timer)) = self.records.insert(token.to_string(), (record, timer)) {
            stale_timer.abort();
        }
    }

    /// A returning session claims its record before the grace timer fires.
    /// The timer is cancelled so the departure never finalizes.
    pub fn consume(&mut self, token: &str) -> Option<DisconnectedRecord> {
        let (record, timer) = self.records.remove(token)?;
        timer.abort();
        Some(record)
    }

    /// The grace timer fired; the record is handed to the caller for
    /// finalization. The timer handle is already finished and just dropped.
    pub fn expire(&mut self, token: &str) -> Option<DisconnectedRecord> {
        let (record, _) = self.records.remove(token)?;
        Some(record)
    }

    pub fn contains(&self, token: &str) -> bool {
        self.records.contains_key(token)
    }

    pub fn pending_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record(room_code: &str, conn_id: &str, color: PlayerColor) -> DisconnectedRecord {
        DisconnectedRecord {
            room_code: room_code.to_string(),
            conn_id: conn_id.to_string(),
            color,
            deadline_ms: 0,
        }
    }

    #[tokio::test]
    async fn consume_returns_the_record_and_cancels_the_timer() {
        let mut table = ReconnectTable::new(ReconnectOptions::default());
        let timer = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        table.register("tok_1", record("AB2C", "conn_1", PlayerColor::Red), timer);
        assert!(table.contains("tok_1"));

        let claimed = table.consume("tok_1").expect("record exists");
        assert_eq!(claimed, record("AB2C", "conn_1", PlayerColor::Red));
        assert!(!table.contains("tok_1"));
        assert!(table.consume("tok_1").is_none());
    }

    #[tokio::test]
    async fn second_register_supersedes_the_first() {
        let mut table = ReconnectTable::new(ReconnectOptions::default());
        table.register(
            "tok_1",
            record("AB2C", "conn_1", PlayerColor::Red),
            tokio::spawn(async {}),
        );
        table.register(
            "tok_1",
            record("AB2C", "conn_2", PlayerColor::Red),
            tokio::spawn(async {}),
        );
        assert_eq!(table.pending_count(), 1);
        let claimed = table.consume("tok_1").expect("record exists");
        assert_eq!(claimed.conn_id, "conn_2");
    }

    #[tokio::test]
    async fn expire_removes_without_touching_other_tokens() {
        let mut table = ReconnectTable::new(ReconnectOptions {
            grace_period_ms: 1_000,
        });
        table.register(
            "tok_1",
            record("AB2C", "conn_1", PlayerColor::Red),
            tokio::spawn(async {}),
        );
        table.register(
            "tok_2",
            record("AB2C", "conn_2", PlayerColor::Blue),
            tokio::spawn(async {}),
        );

        let expired = table.expire("tok_1").expect("record exists");
        assert_eq!(expired.color, PlayerColor::Red);
        assert!(table.contains("tok_2"));
        assert!(table.expire("tok_1").is_none());
    }
}
