//! Thought-signature bookkeeping.
//!
//! Gemini returns an opaque signature alongside reasoning output; it must be
//! replayed verbatim on the next turn and is only valid for the model family
//! that produced it. Two layers: tool-use id -> signature (so replayed
//! `tool_use` blocks can recover a signature the client dropped), and
//! signature -> model family (for the compatibility check).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SIGNATURE_TTL: Duration = Duration::from_secs(2 * 60 * 60);
const MIN_SIGNATURE_LENGTH: usize = 50;
const TOOL_LAYER_CAP: usize = 500;
const FAMILY_LAYER_CAP: usize = 200;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    stored_at: Instant,
}

impl Entry {
    fn fresh(value: String) -> Self {
        Self {
            value,
            stored_at: Instant::now(),
        }
    }

    fn expired(&self) -> bool {
        self.stored_at.elapsed() > SIGNATURE_TTL
    }
}

#[derive(Debug, Default)]
pub struct SignatureCache {
    tool: Mutex<HashMap<String, Entry>>,
    family: Mutex<HashMap<String, Entry>>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember_tool_signature(&self, tool_use_id: &str, signature: &str) {
        if signature.len() < MIN_SIGNATURE_LENGTH {
            return;
        }
        let mut layer = self.tool.lock().expect("signature cache poisoned");
        layer.insert(tool_use_id.to_string(), Entry::fresh(signature.to_string()));
        if layer.len() > TOOL_LAYER_CAP {
            layer.retain(|_, entry| !entry.expired());
        }
    }

    pub fn tool_signature(&self, tool_use_id: &str) -> Option<String> {
        let layer = self.tool.lock().expect("signature cache poisoned");
        layer
            .get(tool_use_id)
            .filter(|entry| !entry.expired())
            .map(|entry| entry.value.clone())
    }

    pub fn remember_family(&self, signature: &str, model: &str) {
        if signature.len() < MIN_SIGNATURE_LENGTH {
            return;
        }
        let mut layer = self.family.lock().expect("signature cache poisoned");
        layer.insert(signature.to_string(), Entry::fresh(model_family(model)));
        if layer.len() > FAMILY_LAYER_CAP {
            layer.retain(|_, entry| !entry.expired());
        }
    }

    pub fn family_of(&self, signature: &str) -> Option<String> {
        let layer = self.family.lock().expect("signature cache poisoned");
        layer
            .get(signature)
            .filter(|entry| !entry.expired())
            .map(|entry| entry.value.clone())
    }

    /// True when the signature may be emitted for `model`: either its origin
    /// family is unknown, or it matches the model's family.
    pub fn compatible_with(&self, signature: &str, model: &str) -> bool {
        match self.family_of(signature) {
            Some(family) => family == model_family(model),
            None => true,
        }
    }
}

/// Family = the model id truncated after its generation segment:
/// `gemini-3-pro-preview` -> `gemini-3`. A bare name is its own family.
pub fn model_family(model: &str) -> String {
    let model = model.strip_prefix("models/").unwrap_or(model);
    let mut segments = model.splitn(3, '-');
    match (segments.next(), segments.next()) {
        (Some(name), Some(generation)) => format!("{name}-{generation}"),
        _ => model.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG: &str = "0123456789012345678901234567890123456789012345678901234567890123";

    #[test]
    fn families_truncate_after_generation() {
        assert_eq!(model_family("gemini-3-pro-preview"), "gemini-3");
        assert_eq!(model_family("models/gemini-2.5-flash"), "gemini-2.5");
        assert_eq!(model_family("singleword"), "singleword");
    }

    #[test]
    fn short_signatures_are_never_cached() {
        let cache = SignatureCache::new();
        cache.remember_tool_signature("toolu_1", "short");
        assert_eq!(cache.tool_signature("toolu_1"), None);
    }

    #[test]
    fn compatibility_follows_recorded_family() {
        let cache = SignatureCache::new();
        cache.remember_family(SIG, "gemini-3-pro-preview");
        assert!(cache.compatible_with(SIG, "gemini-3-flash-preview"));
        assert!(!cache.compatible_with(SIG, "gemini-2.5-pro"));
        // Unknown signatures are given the benefit of the doubt.
        assert!(cache.compatible_with("unseen", "gemini-2.5-pro"));
    }

    #[test]
    fn tool_layer_round_trips() {
        let cache = SignatureCache::new();
        cache.remember_tool_signature("toolu_9", SIG);
        assert_eq!(cache.tool_signature("toolu_9").as_deref(), Some(SIG));
    }
}
