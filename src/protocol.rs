use serde_json::Value;

use crate::types::{Coord, PlayerClass};

#[derive(Debug)]
pub enum ParsedClientMessage {
    CreateRoom {
        name: String,
        class: PlayerClass,
        session_token: Option<String>,
    },
    JoinRoom {
        room_code: String,
        name: String,
        class: PlayerClass,
        session_token: Option<String>,
    },
    StartGame,
    Move {
        from: Coord,
        to: Coord,
        split: bool,
    },
    LeaveRoom,
    RequestReset,
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "create_room" => {
            let name = object.get("name")?.as_str()?.to_string();
            let class = parse_class(object.get("class"))?;
            let session_token = parse_optional_string(object.get("sessionToken"))?;
            Some(ParsedClientMessage::CreateRoom {
                name,
                class,
                session_token,
            })
        }
        "join_room" => {
            let room_code = object.get("roomCode")?.as_str()?.trim().to_ascii_uppercase();
            if room_code.is_empty() {
                return None;
            }
            let name = object.get("name")?.as_str()?.to_string();
            let class = parse_class(object.get("class"))?;
            let session_token = parse_optional_string(object.get("sessionToken"))?;
            Some(ParsedClientMessage::JoinRoom {
                room_code,
                name,
                class,
                session_token,
            })
        }
        "start_game" => Some(ParsedClientMessage::StartGame),
        "move" => {
            let from = parse_coord(object.get("from")?)?;
            let to = parse_coord(object.get("to")?)?;
            let split = match object.get("split") {
                None => false,
                Some(value) => value.as_bool()?,
            };
            Some(ParsedClientMessage::Move { from, to, split })
        }
        "leave_room" => Some(ParsedClientMessage::LeaveRoom),
        "request_reset" => Some(ParsedClientMessage::RequestReset),
        _ => None,
    }
}

// A missing class falls back to the default; a present but non-string class
// is malformed and rejects the whole message.
fn parse_class(value: Option<&Value>) -> Option<PlayerClass> {
    match value {
        None => Some(PlayerClass::Rusher),
        Some(value) => Some(PlayerClass::parse_or_default(value.as_str()?)),
    }
}

fn parse_optional_string(value: Option<&Value>) -> Option<Option<String>> {
    match value {
        None => Some(None),
        Some(Value::Null) => Some(None),
        Some(value) => {
            let text = value.as_str()?.trim();
            if text.is_empty() {
                Some(None)
            } else {
                Some(Some(text.to_string()))
            }
        }
    }
}

fn parse_coord(value: &Value) -> Option<Coord> {
    let object = value.as_object()?;
    let x = parse_grid_axis(object.get("x")?)?;
    let y = parse_grid_axis(object.get("y")?)?;
    Some(Coord::new(x, y))
}

fn parse_grid_axis(value: &Value) -> Option<i32> {
    let number = value.as_i64()?;
    i32::try_from(number).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_create_room_message() {
        let parsed =
            parse_client_message(r#"{"type":"create_room","name":"Alice","class":"scout"}"#)
                .expect("create_room should parse");
        match parsed {
            ParsedClientMessage::CreateRoom {
                name,
                class,
                session_token,
            } => {
                assert_eq!(name, "Alice");
                assert_eq!(class, PlayerClass::Scout);
                assert_eq!(session_token, None);
            }
            _ => panic!("expected create_room message"),
        }
    }

    #[test]
    fn parse_join_room_normalizes_the_code() {
        let parsed = parse_client_message(
            r#"{"type":"join_room","roomCode":" ab2c ","name":"Bob","sessionToken":"tok_1"}"#,
        )
        .expect("join_room should parse");
        match parsed {
            ParsedClientMessage::JoinRoom {
                room_code,
                class,
                session_token,
                ..
            } => {
                assert_eq!(room_code, "AB2C");
                assert_eq!(class, PlayerClass::Rusher);
                assert_eq!(session_token.as_deref(), Some("tok_1"));
            }
            _ => panic!("expected join_room message"),
        }
    }

    #[test]
    fn parse_join_room_rejects_missing_code() {
        assert!(parse_client_message(r#"{"type":"join_room","name":"Bob"}"#).is_none());
        assert!(parse_client_message(r#"{"type":"join_room","roomCode":"  ","name":"Bob"}"#)
            .is_none());
    }

    #[test]
    fn unknown_class_falls_back_but_wrong_type_rejects() {
        let parsed =
            parse_client_message(r#"{"type":"create_room","name":"A","class":"warlock"}"#)
                .expect("unknown class string still parses");
        assert!(matches!(
            parsed,
            ParsedClientMessage::CreateRoom {
                class: PlayerClass::Rusher,
                ..
            }
        ));
        assert!(parse_client_message(r#"{"type":"create_room","name":"A","class":7}"#).is_none());
    }

    #[test]
    fn parse_move_message() {
        let parsed = parse_client_message(
            r#"{"type":"move","from":{"x":3,"y":4},"to":{"x":3,"y":5},"split":true}"#,
        )
        .expect("move should parse");
        match parsed {
            ParsedClientMessage::Move { from, to, split } => {
                assert_eq!(from, Coord::new(3, 4));
                assert_eq!(to, Coord::new(3, 5));
                assert!(split);
            }
            _ => panic!("expected move message"),
        }
    }

    #[test]
    fn parse_move_defaults_split_to_false() {
        let parsed =
            parse_client_message(r#"{"type":"move","from":{"x":0,"y":0},"to":{"x":1,"y":0}}"#)
                .expect("move should parse");
        assert!(matches!(
            parsed,
            ParsedClientMessage::Move { split: false, .. }
        ));
    }

    #[test]
    fn parse_move_rejects_non_integer_coordinates() {
        assert!(parse_client_message(
            r#"{"type":"move","from":{"x":1.5,"y":0},"to":{"x":2,"y":0}}"#
        )
        .is_none());
        assert!(
            parse_client_message(r#"{"type":"move","from":{"x":1},"to":{"x":2,"y":0}}"#).is_none()
        );
    }

    #[test]
    fn parse_bare_control_messages() {
        assert!(matches!(
            parse_client_message(r#"{"type":"start_game"}"#),
            Some(ParsedClientMessage::StartGame)
        ));
        assert!(matches!(
            parse_client_message(r#"{"type":"leave_room"}"#),
            Some(ParsedClientMessage::LeaveRoom)
        ));
        assert!(matches!(
            parse_client_message(r#"{"type":"request_reset"}"#),
            Some(ParsedClientMessage::RequestReset)
        ));
    }

    #[test]
    fn unknown_or_malformed_messages_are_rejected() {
        assert!(parse_client_message("not json").is_none());
        assert!(parse_client_message(r#"{"type":"teleport"}"#).is_none());
        assert!(parse_client_message(r#"{"no_type":true}"#).is_none());
    }
}
