use std::cell::RefCell;
use std::rc::Rc;

use parlor_core::IceMode;
use serde_json::json;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::engine::{EngineService, ParlorEngine};
use crate::logger::Logger;

impl ParlorEngine {
    /// Builds the peer connection for one remote: ICE configuration from
    /// the welcome, candidate routing back through the hub, remote media
    /// capture and lifecycle-driven teardown.
    pub(super) fn create_pc(
        service: &Rc<RefCell<EngineService>>,
        remote_id: &str,
    ) -> Result<web_sys::RtcPeerConnection, JsValue> {
        let config = web_sys::RtcConfiguration::new();
        {
            let state = service.borrow();
            let servers = js_sys::Array::new();
            for server in &state.ice_servers {
                let ice = web_sys::RtcIceServer::new();
                let urls = js_sys::Array::new();
                for url in &server.urls {
                    urls.push(&JsValue::from_str(url));
                }
                ice.set_urls(&urls);
                if let Some(username) = &server.username {
                    ice.set_username(username);
                }
                if let Some(credential) = &server.credential {
                    ice.set_credential(credential);
                }
                servers.push(&ice);
            }
            config.set_ice_servers(&servers);

            // turn-only deployments force every candidate through the relay.
            if state.ice_mode == IceMode::TurnOnly {
                config.set_ice_transport_policy(web_sys::RtcIceTransportPolicy::Relay);
            }
        }

        let pc = web_sys::RtcPeerConnection::new_with_configuration(&config)?;

        let onicecandidate = {
            let service = service.clone();
            let remote = remote_id.to_string();
            Closure::<dyn FnMut(web_sys::RtcPeerConnectionIceEvent)>::wrap(Box::new(
                move |event: web_sys::RtcPeerConnectionIceEvent| {
                    if let Some(candidate) = event.candidate() {
                        let data = json!({
                            "candidate": candidate.candidate(),
                            "sdpMid": candidate.sdp_mid(),
                            "sdpMLineIndex": candidate.sdp_m_line_index(),
                        });
                        Self::send_signal(&service, &remote, data);
                    }
                },
            ))
        };
        pc.set_onicecandidate(Some(onicecandidate.as_ref().unchecked_ref()));
        onicecandidate.forget();

        let ontrack = {
            let service = service.clone();
            let remote = remote_id.to_string();
            Closure::<dyn FnMut(web_sys::RtcTrackEvent)>::wrap(Box::new(
                move |event: web_sys::RtcTrackEvent| {
                    let streams = event.streams();
                    if streams.length() == 0 {
                        return;
                    }
                    let stream: web_sys::MediaStream = streams.get(0).unchecked_into();
                    {
                        let mut state = service.borrow_mut();
                        if let Some(slot) = state.peers.get_mut(&remote) {
                            slot.remote_stream = Some(stream.clone());
                        }
                    }
                    let payload = js_sys::Object::new();
                    let _ = js_sys::Reflect::set(
                        &payload,
                        &"peer".into(),
                        &JsValue::from_str(&remote),
                    );
                    let _ = js_sys::Reflect::set(&payload, &"stream".into(), stream.as_ref());
                    Self::emit(&service, "stream-added", &payload.into());
                },
            ))
        };
        pc.set_ontrack(Some(ontrack.as_ref().unchecked_ref()));
        ontrack.forget();

        let onstatechange = {
            let service = service.clone();
            let remote = remote_id.to_string();
            let pc = pc.clone();
            Closure::<dyn FnMut(JsValue)>::wrap(Box::new(move |_| {
                match pc.connection_state() {
                    web_sys::RtcPeerConnectionState::Failed
                    | web_sys::RtcPeerConnectionState::Closed => {
                        Logger::info(&format!("connection to {remote} ended"));
                        Self::teardown_peer(&service, &remote);
                    }
                    // Disconnected is recoverable by ICE; do not tear down.
                    web_sys::RtcPeerConnectionState::Disconnected => {
                        Self::emit(
                            &service,
                            "status",
                            &JsValue::from_str(&format!("{remote} temporarily disconnected")),
                        );
                    }
                    _ => {}
                }
            }))
        };
        pc.set_onconnectionstatechange(Some(onstatechange.as_ref().unchecked_ref()));
        onstatechange.forget();

        Ok(pc)
    }
}
