use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{json, Value};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

use crate::engine::{EngineService, ParlorEngine};
use crate::logger::Logger;
use crate::negotiation::OfferDecision;

impl ParlorEngine {
    /// Routes a forwarded signal payload from peer `from`. The payload is
    /// whatever the remote engine sent: a session description or an ICE
    /// candidate.
    pub(crate) fn handle_signal(service: &Rc<RefCell<EngineService>>, from: String, data: Value) {
        if service.borrow().peer_id.is_none() {
            Logger::warn("signal before welcome, dropping");
            return;
        }

        if data.get("sdp").is_some() {
            let service = service.clone();
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(err) = Self::apply_description(&service, &from, data).await {
                    Logger::error(&err);
                    Self::emit(&service, "error", &err);
                }
            });
        } else if data.get("candidate").is_some() {
            let service = service.clone();
            wasm_bindgen_futures::spawn_local(async move {
                if let Err(err) = Self::apply_candidate(&service, &from, data).await {
                    Logger::error(&err);
                }
            });
        } else {
            Logger::warn("signal payload is neither sdp nor candidate");
        }
    }

    /// Perfect negotiation: decide Apply/Rollback/Ignore, apply the remote
    /// description, flush queued candidates, and answer if it was an offer.
    async fn apply_description(
        service: &Rc<RefCell<EngineService>>,
        from: &str,
        data: Value,
    ) -> Result<(), JsValue> {
        let sdp_type = data["type"].as_str().unwrap_or_default().to_string();
        let is_offer = sdp_type == "offer";
        if !is_offer && sdp_type != "answer" {
            return Err(JsValue::from_str(&format!("unknown sdp type: {sdp_type}")));
        }
        let is_answer = !is_offer;
        let sdp = data["sdp"].as_str().unwrap_or_default().to_string();

        Self::ensure_peer(service, from)?;
        let pc = peer_pc(service, from)?;
        let stable = pc.signaling_state() == web_sys::RtcSignalingState::Stable;

        let decision = {
            let mut state = service.borrow_mut();
            let slot = state
                .peers
                .get_mut(from)
                .ok_or_else(|| JsValue::from_str("peer slot vanished"))?;
            let decision = slot.negotiation.decide_offer(is_offer, stable);
            if decision != OfferDecision::Ignore && is_answer {
                slot.negotiation.begin_remote_answer();
            }
            decision
        };

        match decision {
            OfferDecision::Ignore => {
                Logger::info(&format!("ignoring colliding offer from {from}"));
                return Ok(());
            }
            OfferDecision::Rollback => {
                Logger::info(&format!("glare with {from}, rolling back local offer"));
                let rollback =
                    web_sys::RtcSessionDescriptionInit::new(web_sys::RtcSdpType::Rollback);
                JsFuture::from(pc.set_local_description(&rollback)).await?;
                let mut state = service.borrow_mut();
                if let Some(slot) = state.peers.get_mut(from) {
                    slot.negotiation.finish_offer();
                }
            }
            OfferDecision::Apply => {}
        }

        let init = web_sys::RtcSessionDescriptionInit::new(if is_offer {
            web_sys::RtcSdpType::Offer
        } else {
            web_sys::RtcSdpType::Answer
        });
        init.set_sdp(&sdp);
        let applied = JsFuture::from(pc.set_remote_description(&init)).await;
        {
            let mut state = service.borrow_mut();
            if let Some(slot) = state.peers.get_mut(from) {
                match &applied {
                    Ok(_) => slot.negotiation.remote_description_applied(is_answer),
                    Err(_) if is_answer => slot.negotiation.abort_remote_answer(),
                    Err(_) => {}
                }
            }
        }
        applied?;

        // Candidates that raced ahead of the description go in now, in
        // arrival order.
        let queued = {
            let mut state = service.borrow_mut();
            state
                .peers
                .get_mut(from)
                .map(|slot| slot.negotiation.drain_candidates())
                .unwrap_or_default()
        };
        for candidate in queued {
            if let Err(err) = add_candidate(&pc, &candidate).await {
                Logger::error(&err);
            }
        }

        if is_offer {
            Self::attach_local_tracks(service, from);
            let answer = JsFuture::from(pc.create_answer()).await?;
            let answer_sdp = js_sys::Reflect::get(&answer, &"sdp".into())?
                .as_string()
                .unwrap_or_default();
            let local = web_sys::RtcSessionDescriptionInit::new(web_sys::RtcSdpType::Answer);
            local.set_sdp(&answer_sdp);
            JsFuture::from(pc.set_local_description(&local)).await?;
            Self::send_signal(service, from, json!({"type": "answer", "sdp": answer_sdp}));
        }
        Ok(())
    }

    async fn apply_candidate(
        service: &Rc<RefCell<EngineService>>,
        from: &str,
        data: Value,
    ) -> Result<(), JsValue> {
        Self::ensure_peer(service, from)?;
        let pc = peer_pc(service, from)?;

        let (drop_it, queue_it) = {
            let state = service.borrow();
            let slot = state
                .peers
                .get(from)
                .ok_or_else(|| JsValue::from_str("peer slot vanished"))?;
            (
                slot.negotiation.should_drop_candidate(),
                pc.remote_description().is_none(),
            )
        };

        if drop_it {
            return Ok(());
        }
        if queue_it {
            let mut state = service.borrow_mut();
            if let Some(slot) = state.peers.get_mut(from) {
                slot.negotiation.queue_candidate(data);
            }
            return Ok(());
        }
        add_candidate(&pc, &data).await
    }
}

fn peer_pc(
    service: &Rc<RefCell<EngineService>>,
    remote_id: &str,
) -> Result<web_sys::RtcPeerConnection, JsValue> {
    service
        .borrow()
        .peers
        .get(remote_id)
        .map(|slot| slot.pc.clone())
        .ok_or_else(|| JsValue::from_str("peer slot vanished"))
}

async fn add_candidate(
    pc: &web_sys::RtcPeerConnection,
    data: &Value,
) -> Result<(), JsValue> {
    let candidate = data["candidate"].as_str().unwrap_or_default();
    let init = web_sys::RtcIceCandidateInit::new(candidate);
    if let Some(mid) = data["sdpMid"].as_str() {
        init.set_sdp_mid(Some(mid));
    }
    if let Some(index) = data["sdpMLineIndex"].as_u64() {
        init.set_sdp_m_line_index(Some(index as u16));
    }
    JsFuture::from(pc.add_ice_candidate_with_opt_rtc_ice_candidate_init(Some(&init)))
        .await
        .map(|_| ())
}
