use crate::model::peer::PeerId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// STUN/TURN server description advertised to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: None,
            credential: None,
        }
    }

    pub fn turn(urls: Vec<String>, username: String, credential: String) -> Self {
        Self {
            urls,
            username: Some(username),
            credential: Some(credential),
        }
    }
}

/// Transport policy hint forwarded to clients alongside the server list.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum IceMode {
    #[default]
    StunTurn,
    StunOnly,
    TurnOnly,
}

impl FromStr for IceMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "stun-turn" => Ok(Self::StunTurn),
            "stun-only" => Ok(Self::StunOnly),
            "turn-only" => Ok(Self::TurnOnly),
            _ => Err(()),
        }
    }
}

impl fmt::Display for IceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StunTurn => "stun-turn",
            Self::StunOnly => "stun-only",
            Self::TurnOnly => "turn-only",
        };
        write!(f, "{s}")
    }
}

/// Frames clients send to the signaling service.
///
/// `data` is never inspected beyond an emptiness check; SDP and ICE blobs
/// pass through verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    Signal {
        to: PeerId,
        #[serde(default)]
        data: Value,
    },
    Broadcast {
        enabled: bool,
    },
    SetUsername {
        #[serde(default)]
        username: String,
    },
}

/// Frames the signaling service sends to clients.
///
/// Presence-bearing frames carry a full snapshot; clients overwrite their
/// local view rather than patching it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerFrame {
    Welcome {
        id: PeerId,
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
        usernames: HashMap<PeerId, String>,
        #[serde(rename = "iceServers")]
        ice_servers: Vec<IceServer>,
        #[serde(rename = "iceMode")]
        ice_mode: IceMode,
    },
    PeerJoined {
        id: PeerId,
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
        usernames: HashMap<PeerId, String>,
    },
    PeerLeft {
        id: PeerId,
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
        usernames: HashMap<PeerId, String>,
    },
    BroadcastState {
        id: PeerId,
        enabled: bool,
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
        usernames: HashMap<PeerId, String>,
    },
    Usernames {
        id: PeerId,
        peers: Vec<PeerId>,
        broadcasting: Vec<PeerId>,
        usernames: HashMap<PeerId, String>,
    },
    Signal {
        from: PeerId,
        to: PeerId,
        data: Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inbound_signal_parses() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"signal","to":"abc","data":{"sdp":"v=0"}}"#).unwrap();
        match frame {
            ClientFrame::Signal { to, data } => {
                assert_eq!(to.as_str(), "abc");
                assert_eq!(data["sdp"], "v=0");
            }
            other => panic!("expected signal, got {other:?}"),
        }
    }

    #[test]
    fn inbound_broadcast_requires_enabled() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"broadcast"}"#).is_err());
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"broadcast","enabled":true}"#).unwrap();
        assert!(matches!(frame, ClientFrame::Broadcast { enabled: true }));
    }

    #[test]
    fn inbound_unknown_type_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn set_username_uses_kebab_tag() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"set-username","username":"ada"}"#).unwrap();
        assert!(matches!(frame, ClientFrame::SetUsername { username } if username == "ada"));
    }

    #[test]
    fn welcome_wire_shape() {
        let frame = ServerFrame::Welcome {
            id: "p1".into(),
            peers: vec!["p1".into()],
            broadcasting: vec![],
            usernames: HashMap::new(),
            ice_servers: vec![IceServer::stun(vec!["stun:stun.example.org".into()])],
            ice_mode: IceMode::StunTurn,
        };
        let value: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "welcome");
        assert_eq!(value["id"], "p1");
        assert_eq!(value["peers"], json!(["p1"]));
        assert_eq!(value["broadcasting"], json!([]));
        assert_eq!(value["usernames"], json!({}));
        assert_eq!(value["iceMode"], "stun-turn");
        assert_eq!(value["iceServers"][0]["urls"][0], "stun:stun.example.org");
        assert!(value["iceServers"][0].get("username").is_none());
    }

    #[test]
    fn signal_forward_keeps_payload_intact() {
        let frame = ServerFrame::Signal {
            from: "a".into(),
            to: "b".into(),
            data: json!({"type": "offer", "sdp": "v=0\r\n"}),
        };
        let text = serde_json::to_string(&frame).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "signal");
        assert_eq!(value["from"], "a");
        assert_eq!(value["data"]["sdp"], "v=0\r\n");
    }

    #[test]
    fn ice_mode_round_trip() {
        for (text, mode) in [
            ("stun-turn", IceMode::StunTurn),
            ("stun-only", IceMode::StunOnly),
            ("turn-only", IceMode::TurnOnly),
        ] {
            assert_eq!(text.parse::<IceMode>().unwrap(), mode);
            assert_eq!(mode.to_string(), text);
        }
        assert!("weird".parse::<IceMode>().is_err());
    }
}
