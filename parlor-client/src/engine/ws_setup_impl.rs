use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use crate::engine::ParlorEngine;
use crate::logger::Logger;

impl ParlorEngine {
    pub(crate) fn ws_setup(&self, ws_url: &str, room: &str) -> Result<(), JsValue> {
        let sep = if ws_url.contains('?') { '&' } else { '?' };
        let url = format!("{ws_url}{sep}room={room}");
        let ws = web_sys::WebSocket::new(&url)?;

        let onopen = {
            let service = self.service.clone();
            Closure::<dyn FnMut(JsValue)>::wrap(Box::new(move |_| {
                Logger::info("socket open, waiting for welcome");
                Self::emit(&service, "status", &JsValue::from_str("socket-open"));
            }))
        };
        ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
        onopen.forget();

        let onmessage = {
            let service = self.service.clone();
            Closure::<dyn FnMut(web_sys::MessageEvent)>::wrap(Box::new(
                move |event: web_sys::MessageEvent| {
                    if let Ok(text) = event.data().dyn_into::<js_sys::JsString>() {
                        let text: String = text.into();
                        Self::handle_frame(&service, &text);
                    }
                },
            ))
        };
        ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
        onmessage.forget();

        let onclose = {
            let service = self.service.clone();
            Closure::<dyn FnMut(web_sys::CloseEvent)>::wrap(Box::new(
                move |event: web_sys::CloseEvent| {
                    Logger::info(&format!("socket closed (code {})", event.code()));
                    Self::emit(&service, "disconnected", &JsValue::from_f64(event.code().into()));
                },
            ))
        };
        ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
        onclose.forget();

        let onerror = {
            let service = self.service.clone();
            Closure::<dyn FnMut(web_sys::Event)>::wrap(Box::new(move |event: web_sys::Event| {
                Self::emit(&service, "error", event.as_ref());
            }))
        };
        ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onerror.forget();

        self.service.borrow_mut().ws = Some(ws);
        Ok(())
    }
}
