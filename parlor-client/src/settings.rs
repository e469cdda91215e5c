//! One-shot bootstrap of `/api/settings`.
//!
//! The fetch runs at most once per loader; concurrent callers share the
//! in-flight promise instead of racing their own requests.

use std::cell::RefCell;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};

#[wasm_bindgen]
pub struct SettingsLoader {
    url: String,
    inflight: RefCell<Option<js_sys::Promise>>,
}

#[wasm_bindgen]
impl SettingsLoader {
    #[wasm_bindgen(constructor)]
    pub fn new(base_url: String) -> SettingsLoader {
        let base = base_url.trim_end_matches('/');
        SettingsLoader {
            url: format!("{base}/api/settings"),
            inflight: RefCell::new(None),
        }
    }

    /// Resolves to `{wsURL, iceMode, iceServers}`.
    pub fn load(&self) -> js_sys::Promise {
        if let Some(promise) = self.inflight.borrow().as_ref() {
            return promise.clone();
        }
        let promise = future_to_promise(fetch_settings(self.url.clone()));
        *self.inflight.borrow_mut() = Some(promise.clone());
        promise
    }
}

async fn fetch_settings(url: String) -> Result<JsValue, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;
    let response: web_sys::Response = JsFuture::from(window.fetch_with_str(&url))
        .await?
        .dyn_into()?;
    if !response.ok() {
        return Err(JsValue::from_str(&format!(
            "settings fetch failed: {}",
            response.status()
        )));
    }
    JsFuture::from(response.json()?).await
}
