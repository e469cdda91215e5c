use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::engine::{EngineService, ParlorEngine};
use crate::logger::Logger;
use crate::negotiation::OFFER_RETRY_DELAY_MS;

impl ParlorEngine {
    /// Offer path for one remote peer. Skips when we are not broadcasting,
    /// defers (bounded) when signaling is not stable, and refuses to stack
    /// a second offer on an in-flight one.
    pub(crate) fn send_offer_to(service: &Rc<RefCell<EngineService>>, remote_id: String) {
        if !service.borrow().broadcasting {
            return;
        }
        if let Err(err) = Self::ensure_peer(service, &remote_id) {
            Logger::error(&err);
            return;
        }

        let pc = {
            let state = service.borrow();
            match state.peers.get(&remote_id) {
                Some(slot) => slot.pc.clone(),
                None => return,
            }
        };

        if pc.signaling_state() != web_sys::RtcSignalingState::Stable {
            Self::schedule_offer_retry(service, remote_id);
            return;
        }

        {
            let mut state = service.borrow_mut();
            let Some(slot) = state.peers.get_mut(&remote_id) else {
                return;
            };
            if let Some(handle) = slot.retry_handle.take() {
                if let Some(window) = web_sys::window() {
                    window.clear_timeout_with_handle(handle);
                }
            }
            if !slot.negotiation.begin_offer() {
                return;
            }
            slot.negotiation.reset_retries();
        }

        let service = service.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let outcome = Self::make_offer(&service, &remote_id, pc).await;
            {
                let mut state = service.borrow_mut();
                if let Some(slot) = state.peers.get_mut(&remote_id) {
                    slot.negotiation.finish_offer();
                }
            }
            if let Err(err) = outcome {
                Logger::error(&err);
                Self::emit(&service, "error", &err);
            }
        });
    }

    async fn make_offer(
        service: &Rc<RefCell<EngineService>>,
        remote_id: &str,
        pc: web_sys::RtcPeerConnection,
    ) -> Result<(), JsValue> {
        Self::attach_local_tracks(service, remote_id);

        let offer = JsFuture::from(pc.create_offer()).await?;
        let sdp = js_sys::Reflect::get(&offer, &"sdp".into())?
            .as_string()
            .unwrap_or_default();
        let init = web_sys::RtcSessionDescriptionInit::new(web_sys::RtcSdpType::Offer);
        init.set_sdp(&sdp);
        JsFuture::from(pc.set_local_description(&init)).await?;

        Logger::info(&format!("offering to {remote_id}"));
        Self::send_signal(service, remote_id, json!({"type": "offer", "sdp": sdp}));
        Ok(())
    }

    /// One-shot deferred offer. A newer schedule or an entered offer path
    /// cancels the previous timer; the budget caps how long we chase a
    /// connection that never stabilizes.
    fn schedule_offer_retry(service: &Rc<RefCell<EngineService>>, remote_id: String) {
        let attempt = {
            let mut state = service.borrow_mut();
            let Some(slot) = state.peers.get_mut(&remote_id) else {
                return;
            };
            if let Some(handle) = slot.retry_handle.take() {
                if let Some(window) = web_sys::window() {
                    window.clear_timeout_with_handle(handle);
                }
            }
            slot.negotiation.next_retry()
        };

        let Some(attempt) = attempt else {
            Logger::warn(&format!("offer retries exhausted for {remote_id}"));
            Self::emit(
                service,
                "status",
                &JsValue::from_str(&format!("gave up offering to {remote_id}")),
            );
            return;
        };

        Logger::info(&format!(
            "signaling not stable, retrying offer to {remote_id} (attempt {attempt})"
        ));
        let Some(window) = web_sys::window() else {
            return;
        };

        let callback = {
            let service = service.clone();
            let remote_id = remote_id.clone();
            Closure::once(move || {
                Self::send_offer_to(&service, remote_id);
            })
        };
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(
            callback.as_ref().unchecked_ref(),
            OFFER_RETRY_DELAY_MS,
        ) {
            Ok(handle) => {
                callback.forget();
                let mut state = service.borrow_mut();
                if let Some(slot) = state.peers.get_mut(&remote_id) {
                    slot.retry_handle = Some(handle);
                }
            }
            Err(err) => Logger::error(&err),
        }
    }
}
