use std::cell::RefCell;
use std::rc::Rc;

use parlor_core::{PeerId, ServerFrame};
use serde_json::json;
use wasm_bindgen::JsValue;

use crate::engine::{js_payload, EngineService, ParlorEngine};
use crate::logger::Logger;

impl ParlorEngine {
    /// Dispatches a raw frame from the signaling socket.
    pub(crate) fn handle_frame(service: &Rc<RefCell<EngineService>>, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                Logger::warn(&format!("unparseable frame: {err}"));
                return;
            }
        };

        match frame {
            ServerFrame::Welcome {
                id,
                peers,
                broadcasting,
                usernames,
                ice_servers,
                ice_mode,
            } => {
                {
                    let mut state = service.borrow_mut();
                    state.peer_id = Some(id.to_string());
                    state.ice_servers = ice_servers;
                    state.ice_mode = ice_mode;
                    state.known_peers = ids(&peers);
                    // Identity just landed; politeness for any existing
                    // slots depends on it.
                    let self_id = id.to_string();
                    for (remote, slot) in state.peers.iter_mut() {
                        slot.negotiation.set_polite(&self_id, remote);
                    }
                }
                Logger::info(&format!("welcome as {id}"));
                Self::emit(
                    service,
                    "connected",
                    &js_payload(&json!({
                        "id": id,
                        "peers": peers,
                        "broadcasting": broadcasting,
                        "usernames": usernames,
                    })),
                );
            }

            ServerFrame::PeerJoined {
                id,
                peers,
                broadcasting,
                usernames,
            } => {
                service.borrow_mut().known_peers = ids(&peers);
                let should_offer = {
                    let state = service.borrow();
                    state.broadcasting && state.peer_id.as_deref() != Some(id.as_str())
                };
                let target = id.to_string();
                Self::emit(
                    service,
                    "peer-joined",
                    &js_payload(&json!({
                        "id": id,
                        "peers": peers,
                        "broadcasting": broadcasting,
                        "usernames": usernames,
                    })),
                );
                if should_offer {
                    Self::send_offer_to(service, target);
                }
            }

            ServerFrame::PeerLeft {
                id,
                peers,
                broadcasting,
                usernames,
            } => {
                service.borrow_mut().known_peers = ids(&peers);
                Self::teardown_peer(service, id.as_str());
                Self::emit(
                    service,
                    "peer-left",
                    &js_payload(&json!({
                        "id": id,
                        "peers": peers,
                        "broadcasting": broadcasting,
                        "usernames": usernames,
                    })),
                );
            }

            ServerFrame::BroadcastState {
                id,
                enabled,
                peers,
                broadcasting,
                usernames,
            } => {
                service.borrow_mut().known_peers = ids(&peers);
                if !enabled {
                    Self::release_stopped_broadcast(service, id.as_str());
                }
                Self::emit(
                    service,
                    "broadcast-state",
                    &js_payload(&json!({
                        "id": id,
                        "enabled": enabled,
                        "peers": peers,
                        "broadcasting": broadcasting,
                        "usernames": usernames,
                    })),
                );
            }

            ServerFrame::Usernames {
                id,
                peers,
                broadcasting,
                usernames,
            } => {
                service.borrow_mut().known_peers = ids(&peers);
                Self::emit(
                    service,
                    "usernames",
                    &js_payload(&json!({
                        "id": id,
                        "peers": peers,
                        "broadcasting": broadcasting,
                        "usernames": usernames,
                    })),
                );
            }

            ServerFrame::Signal { from, data, .. } => {
                Self::handle_signal(service, from.to_string(), data);
            }
        }
    }

    /// A peer (possibly us) stopped broadcasting: drop the media bound to
    /// it, but keep the connection.
    fn release_stopped_broadcast(service: &Rc<RefCell<EngineService>>, id: &str) {
        let is_self = service.borrow().peer_id.as_deref() == Some(id);
        if is_self {
            let stream = service.borrow().local_stream.clone();
            if let Some(stream) = stream {
                for track in stream.get_tracks().iter() {
                    let track: web_sys::MediaStreamTrack =
                        wasm_bindgen::JsCast::unchecked_into(track);
                    track.stop();
                }
            }
            return;
        }

        let released = {
            let mut state = service.borrow_mut();
            state
                .peers
                .get_mut(id)
                .and_then(|slot| slot.remote_stream.take())
                .is_some()
        };
        if released {
            Self::emit(service, "stream-removed", &JsValue::from_str(id));
        }
    }
}

fn ids(peers: &[PeerId]) -> Vec<String> {
    peers.iter().map(ToString::to_string).collect()
}
