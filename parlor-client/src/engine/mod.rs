use crate::events::EventBus;
use crate::logger::Logger;
use crate::negotiation::Negotiation;
use parlor_core::{ClientFrame, IceMode, IceServer};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

mod create_pc_impl;
mod handle_signal_impl;
mod handle_state_impl;
mod offer_impl;
mod ws_setup_impl;

/// Per-remote-peer connection state.
pub(crate) struct PeerSlot {
    pc: web_sys::RtcPeerConnection,
    negotiation: Negotiation,
    /// Handle of a scheduled deferred-offer timeout, if any.
    retry_handle: Option<i32>,
    tracks_attached: bool,
    remote_stream: Option<web_sys::MediaStream>,
}

pub(crate) struct EngineService {
    ws: Option<web_sys::WebSocket>,
    peer_id: Option<String>,
    /// Latest peer list snapshot from the server.
    known_peers: Vec<String>,
    peers: HashMap<String, PeerSlot>,
    ice_servers: Vec<IceServer>,
    ice_mode: IceMode,
    broadcasting: bool,
    local_stream: Option<web_sys::MediaStream>,
    events: EventBus<JsValue>,
}

/// Browser-side engine: owns the signaling socket and one peer connection
/// per remote, and drives renegotiation with the perfect-negotiation rules.
///
/// Observable events: `connected`, `disconnected`, `status`, `error`,
/// `peer-joined`, `peer-left`, `broadcast-state`, `usernames`,
/// `stream-added`, `stream-removed`.
#[wasm_bindgen]
pub struct ParlorEngine {
    service: Rc<RefCell<EngineService>>,
}

#[wasm_bindgen]
impl ParlorEngine {
    /// Connects to the signaling socket for `room`. `ws_url` comes from
    /// `/api/settings` (`wsURL`).
    #[wasm_bindgen(constructor)]
    pub fn new(ws_url: String, room: String) -> Result<ParlorEngine, JsValue> {
        let service = Rc::new(RefCell::new(EngineService {
            ws: None,
            peer_id: None,
            known_peers: Vec::new(),
            peers: HashMap::new(),
            ice_servers: Vec::new(),
            ice_mode: IceMode::default(),
            broadcasting: false,
            local_stream: None,
            events: EventBus::new(),
        }));

        let engine = ParlorEngine { service };
        engine.ws_setup(&ws_url, &room)?;
        Ok(engine)
    }

    /// Subscribes to an event; the returned token unsubscribes via `off`.
    pub fn on(&self, event: &str, callback: js_sys::Function) -> f64 {
        let token = self.service.borrow_mut().events.on(
            event,
            Rc::new(move |payload: &JsValue| {
                if let Err(err) = callback.call1(&JsValue::NULL, payload) {
                    Logger::error(&err);
                }
            }),
        );
        token as f64
    }

    pub fn off(&self, event: &str, token: f64) -> bool {
        self.service.borrow_mut().events.off(event, token as u64)
    }

    #[wasm_bindgen(getter, js_name = peerId)]
    pub fn peer_id(&self) -> Option<String> {
        self.service.borrow().peer_id.clone()
    }

    #[wasm_bindgen(js_name = setUsername)]
    pub fn set_username(&self, username: String) {
        Self::send_client_frame(&self.service, &ClientFrame::SetUsername { username });
    }

    /// Publishes the stream: flags us as broadcasting and offers to every
    /// peer already in the room.
    #[wasm_bindgen(js_name = startBroadcast)]
    pub fn start_broadcast(&self, stream: web_sys::MediaStream) {
        {
            let mut service = self.service.borrow_mut();
            service.broadcasting = true;
            service.local_stream = Some(stream);
        }
        Self::send_client_frame(&self.service, &ClientFrame::Broadcast { enabled: true });

        let targets: Vec<String> = {
            let service = self.service.borrow();
            service
                .known_peers
                .iter()
                .filter(|peer| Some(peer.as_str()) != service.peer_id.as_deref())
                .cloned()
                .collect()
        };
        for target in targets {
            Self::send_offer_to(&self.service, target);
        }
    }

    #[wasm_bindgen(js_name = stopBroadcast)]
    pub fn stop_broadcast(&self) {
        let stream = {
            let mut service = self.service.borrow_mut();
            service.broadcasting = false;
            for slot in service.peers.values_mut() {
                slot.tracks_attached = false;
            }
            service.local_stream.take()
        };
        if let Some(stream) = stream {
            stop_tracks(&stream);
        }
        Self::send_client_frame(&self.service, &ClientFrame::Broadcast { enabled: false });
    }

    /// Closes the socket and every peer connection.
    pub fn close(&self) {
        let (ws, slots) = {
            let mut service = self.service.borrow_mut();
            (service.ws.take(), std::mem::take(&mut service.peers))
        };
        if let Some(ws) = ws {
            let _ = ws.close();
        }
        for slot in slots.into_values() {
            clear_retry(&slot);
            slot.pc.close();
        }
    }
}

impl ParlorEngine {
    pub(crate) fn send_client_frame(service: &Rc<RefCell<EngineService>>, frame: &ClientFrame) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(_) => return,
        };
        if let Some(ws) = &service.borrow().ws {
            if let Err(err) = ws.send_with_str(&text) {
                Logger::error(&err);
            }
        }
    }

    pub(crate) fn send_signal(service: &Rc<RefCell<EngineService>>, to: &str, data: Value) {
        Self::send_client_frame(service, &ClientFrame::Signal { to: to.into(), data });
    }

    /// Emits with no service borrow held, so handlers may re-enter the
    /// engine.
    pub(crate) fn emit(service: &Rc<RefCell<EngineService>>, event: &str, payload: &JsValue) {
        let handlers = service.borrow().events.subscribers(event);
        for handler in handlers {
            handler(payload);
        }
    }

    pub(crate) fn ensure_peer(
        service: &Rc<RefCell<EngineService>>,
        remote_id: &str,
    ) -> Result<(), JsValue> {
        if service.borrow().peers.contains_key(remote_id) {
            return Ok(());
        }
        let self_id = service.borrow().peer_id.clone().unwrap_or_default();
        let pc = Self::create_pc(service, remote_id)?;
        service.borrow_mut().peers.insert(
            remote_id.to_string(),
            PeerSlot {
                pc,
                negotiation: Negotiation::new(&self_id, remote_id),
                retry_handle: None,
                tracks_attached: false,
                remote_stream: None,
            },
        );
        Ok(())
    }

    pub(crate) fn teardown_peer(service: &Rc<RefCell<EngineService>>, remote_id: &str) {
        let slot = service.borrow_mut().peers.remove(remote_id);
        let Some(slot) = slot else {
            return;
        };
        clear_retry(&slot);
        slot.pc.close();
        if slot.remote_stream.is_some() {
            Self::emit(service, "stream-removed", &JsValue::from_str(remote_id));
        }
    }

    /// Adds the local tracks to the peer connection once. No-op unless we
    /// are broadcasting.
    pub(crate) fn attach_local_tracks(service: &Rc<RefCell<EngineService>>, remote_id: &str) {
        let stream = {
            let service = service.borrow();
            if !service.broadcasting {
                return;
            }
            service.local_stream.clone()
        };
        let Some(stream) = stream else {
            return;
        };

        let pc = {
            let mut service = service.borrow_mut();
            let Some(slot) = service.peers.get_mut(remote_id) else {
                return;
            };
            if slot.tracks_attached {
                return;
            }
            slot.tracks_attached = true;
            slot.pc.clone()
        };

        for track in stream.get_tracks().iter() {
            let track: web_sys::MediaStreamTrack = track.unchecked_into();
            let _ = pc.add_track(&track, &stream, &js_sys::Array::new());
        }
    }
}

fn stop_tracks(stream: &web_sys::MediaStream) {
    for track in stream.get_tracks().iter() {
        let track: web_sys::MediaStreamTrack = track.unchecked_into();
        track.stop();
    }
}

fn clear_retry(slot: &PeerSlot) {
    if let Some(handle) = slot.retry_handle {
        if let Some(window) = web_sys::window() {
            window.clear_timeout_with_handle(handle);
        }
    }
}

/// Serializes a JSON payload for an event callback.
pub(crate) fn js_payload(value: &Value) -> JsValue {
    serde_wasm_bindgen::to_value(value).unwrap_or(JsValue::NULL)
}
