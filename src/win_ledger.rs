use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredWinEntry {
    name: String,
    wins: u64,
    #[serde(rename = "updatedAt", alias = "updated_at")]
    updated_at_iso: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WinLedgerFile {
    version: u8,
    players: HashMap<String, StoredWinEntry>,
}

#[derive(Clone, Debug, Deserialize)]
struct WinLedgerFileRaw {
    version: u8,
    players: HashMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct WinLedgerEntry {
    pub name: String,
    pub wins: u64,
    #[serde(rename = "updatedAt")]
    pub updated_at_iso: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LedgerResponse {
    #[serde(rename = "generatedAt")]
    pub generated_at_iso: String,
    pub entries: Vec<WinLedgerEntry>,
}

/// Persistent win counts keyed by lowercased player name. Writes are
/// best-effort; a failed save is logged and the in-memory state stays
/// authoritative for the process lifetime.
pub struct WinLedger {
    file_path: PathBuf,
    players: HashMap<String, StoredWinEntry>,
}

impl WinLedger {
    pub fn new(file_path: PathBuf) -> Self {
        let players = load_players(&file_path);
        Self { file_path, players }
    }

    /// Increments the winner's tally and returns their new total.
    pub fn record_win(&mut self, name: &str) -> u64 {
        let key = ledger_key(name);
        if key.is_empty() {
            return 0;
        }
        let now_iso = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let entry = self.players.entry(key).or_insert_with(|| StoredWinEntry {
            name: name.trim().to_string(),
            wins: 0,
            updated_at_iso: now_iso.clone(),
        });
        entry.name = name.trim().to_string();
        entry.wins += 1;
        entry.updated_at_iso = now_iso;
        let total = entry.wins;

        self.save();
        total
    }

    pub fn build_response(&self, requested_limit: Option<usize>) -> LedgerResponse {
        LedgerResponse {
            generated_at_iso: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            entries: self.top_n(requested_limit),
        }
    }

    pub fn top_n(&self, requested_limit: Option<usize>) -> Vec<WinLedgerEntry> {
        let normalized_limit = requested_limit.unwrap_or(10).clamp(1, 100);
        let mut entries: Vec<WinLedgerEntry> = self
            .players
            .values()
            .map(|entry| WinLedgerEntry {
                name: entry.name.clone(),
                wins: entry.wins,
                updated_at_iso: entry.updated_at_iso.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.wins
                .cmp(&a.wins)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        entries.truncate(normalized_limit);
        entries
    }

    fn save(&self) {
        if let Some(parent) = self.file_path.parent() {
            if let Err(error) = fs::create_dir_all(parent) {
                eprintln!(
                    "[win-ledger] failed to create parent dir {}: {error}",
                    parent.display()
                );
                return;
            }
        }

        let payload = WinLedgerFile {
            version: 1,
            players: self.players.clone(),
        };
        match serde_json::to_string_pretty(&payload) {
            Ok(text) => {
                if let Err(error) = fs::write(&self.file_path, text) {
                    eprintln!(
                        "[win-ledger] failed to write {}: {error}",
                        self.file_path.display()
                    );
                }
            }
            Err(error) => {
                eprintln!(
                    "[win-ledger] failed to serialize payload for {}: {error}",
                    self.file_path.display()
                );
            }
        }
    }
}

fn load_players(path: &Path) -> HashMap<String, StoredWinEntry> {
    let text = match fs::read_to_string(path) {
        Ok(value) => value,
        Err(error) => {
            if error.kind() != std::io::ErrorKind::NotFound {
                eprintln!("[win-ledger] failed to read {}: {error}", path.display());
            }
            return HashMap::new();
        }
    };
    let parsed: WinLedgerFileRaw = match serde_json::from_str::<WinLedgerFileRaw>(&text) {
        Ok(value) if value.version == 1 => value,
        Ok(value) => {
            eprintln!(
                "[win-ledger] unsupported version {} at {}",
                value.version,
                path.display()
            );
            return HashMap::new();
        }
        Err(error) => {
            eprintln!("[win-ledger] failed to parse {}: {error}", path.display());
            return HashMap::new();
        }
    };

    let mut sanitized = HashMap::<String, StoredWinEntry>::new();
    for (player_key, raw_value) in parsed.players {
        let value: StoredWinEntry = match serde_json::from_value(raw_value) {
            Ok(entry) => entry,
            Err(error) => {
                eprintln!(
                    "[win-ledger] failed to parse player entry '{}' in {}: {error}",
                    player_key,
                    path.display()
                );
                continue;
            }
        };
        let normalized_name = value.name.trim().to_string();
        if normalized_name.is_empty() {
            continue;
        }
        let key = ledger_key(&normalized_name);

        match sanitized.get_mut(&key) {
            Some(current) => {
                current.name = normalized_name;
                current.wins += value.wins;
                if value.updated_at_iso > current.updated_at_iso {
                    current.updated_at_iso = value.updated_at_iso;
                }
            }
            None => {
                sanitized.insert(
                    key,
                    StoredWinEntry {
                        name: normalized_name,
                        wins: value.wins,
                        updated_at_iso: value.updated_at_iso,
                    },
                );
            }
        }
    }

    sanitized
}

fn ledger_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str) -> PathBuf {
        let unique = format!(
            "{}-{}-{}",
            name,
            std::process::id(),
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
                .saturating_add(rand::random::<u32>() as u128)
        );
        std::env::temp_dir().join(unique).join("wins.json")
    }

    #[test]
    fn record_win_returns_running_total() {
        let path = temp_file("win-ledger-record");
        let mut ledger = WinLedger::new(path.clone());
        assert_eq!(ledger.record_win("Alice"), 1);
        assert_eq!(ledger.record_win("Bob"), 1);
        assert_eq!(ledger.record_win(" alice "), 2);

        let entries = ledger.top_n(Some(10));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "alice");
        assert_eq!(entries[0].wins, 2);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn totals_round_trip_through_the_file() {
        let path = temp_file("win-ledger-roundtrip");
        {
            let mut ledger = WinLedger::new(path.clone());
            ledger.record_win("Alice");
            ledger.record_win("Alice");
            ledger.record_win("Bob");
        }

        let reloaded = WinLedger::new(path.clone());
        let entries = reloaded.top_n(Some(10));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Alice");
        assert_eq!(entries[0].wins, 2);
        assert_eq!(entries[1].name, "Bob");
        assert_eq!(entries[1].wins, 1);

        let parent = path.parent().map(Path::to_path_buf);
        let _ = fs::remove_file(&path);
        if let Some(parent) = parent {
            let _ = fs::remove_dir_all(parent);
        }
    }

    #[test]
    fn load_keeps_valid_entries_when_invalid_entries_exist() {
        let path = temp_file("win-ledger-partial");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        let raw = r#"{
  "version": 1,
  "players": {
    "valid": {
      "name": "Alice",
      "wins": 3,
      "updatedAt": "2026-01-01T00:00:00.000Z"
    },
    "invalid": {
      "name": "Broken"
    },
    "blank": {
      "name": "   ",
      "wins": 5,
      "updatedAt": "2026-01-01T00:00:00.000Z"
    }
  }
}"#;
        fs::write(&path, raw).expect("write file");

        let ledger = WinLedger::new(path.clone());
        let entries = ledger.top_n(Some(10));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Alice");
        assert_eq!(entries[0].wins, 3);

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn unsupported_version_starts_fresh() {
        let path = temp_file("win-ledger-version");
        let parent = path.parent().expect("parent exists").to_path_buf();
        fs::create_dir_all(&parent).expect("create dir");
        fs::write(&path, r#"{"version": 9, "players": {}}"#).expect("write file");

        let ledger = WinLedger::new(path.clone());
        assert!(ledger.top_n(Some(10)).is_empty());

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir_all(&parent);
    }

    #[test]
    fn top_n_orders_by_wins_then_name_and_clamps_limit() {
        let path = temp_file("win-ledger-order");
        let mut ledger = WinLedger::new(path.clone());
        ledger.record_win("Cleo");
        ledger.record_win("Alice");
        ledger.record_win("Bob");
        ledger.record_win("Bob");

        let entries = ledger.top_n(Some(10));
        assert_eq!(entries[0].name, "Bob");
        assert_eq!(entries[1].name, "Alice");
        assert_eq!(entries[2].name, "Cleo");

        assert_eq!(ledger.top_n(Some(1)).len(), 1);
        assert_eq!(ledger.top_n(Some(0)).len(), 1);
        assert_eq!(ledger.top_n(None).len(), 3);

        let _ = fs::remove_file(path);
    }
}
