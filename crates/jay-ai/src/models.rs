//! Known models that speak the Llama 3 chat template.

use std::collections::HashMap;

use crate::{Model, Provider};

struct ModelEntry {
    id: &'static str,
    name: &'static str,
    provider: Provider,
    context_window: u32,
    max_tokens: u32,
}

const MODEL_ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        id: "meta-llama/Llama-3-70b-chat-hf",
        name: "Llama 3 70B Chat",
        provider: Provider::Together,
        context_window: 8192,
        max_tokens: 4096,
    },
    ModelEntry {
        id: "meta-llama/Llama-3-8b-chat-hf",
        name: "Llama 3 8B Chat",
        provider: Provider::Together,
        context_window: 8192,
        max_tokens: 4096,
    },
    ModelEntry {
        id: "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
        name: "Llama 3.1 70B Instruct Turbo",
        provider: Provider::Together,
        context_window: 131072,
        max_tokens: 4096,
    },
    ModelEntry {
        id: "llama3:8b-instruct-q8_0",
        name: "Llama 3 8B Instruct (Ollama)",
        provider: Provider::Ollama,
        context_window: 8192,
        max_tokens: 2048,
    },
    ModelEntry {
        id: "llama-3-8b-instruct",
        name: "Llama 3 8B Instruct (llama.cpp)",
        provider: Provider::LlamaCpp,
        context_window: 8192,
        max_tokens: 2048,
    },
];

impl ModelEntry {
    fn to_model(&self) -> Model {
        Model {
            id: self.id.to_string(),
            name: self.name.to_string(),
            provider: self.provider,
            base_url: self.provider.default_base_url().to_string(),
            context_window: self.context_window,
            max_tokens: self.max_tokens,
            headers: HashMap::new(),
        }
    }
}

/// Look up a model by ID (first match across all providers).
pub fn get_model_by_id(id: &str) -> Option<Model> {
    MODEL_ENTRIES
        .iter()
        .find(|e| e.id == id)
        .map(|e| e.to_model())
}

/// Get all models for a specific provider.
pub fn get_models(provider: Provider) -> Vec<Model> {
    MODEL_ENTRIES
        .iter()
        .filter(|e| e.provider == provider)
        .map(|e| e.to_model())
        .collect()
}

/// Resolve a model id, falling back to a custom model at `base_url`.
pub fn resolve_model(id: &str, base_url: Option<&str>) -> Model {
    let mut model = get_model_by_id(id).unwrap_or_else(|| {
        Model::custom(
            id,
            base_url.unwrap_or(Provider::Custom.default_base_url()),
        )
    });
    if let Some(url) = base_url {
        model.base_url = url.to_string();
    }
    model
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_model_lookup() {
        let model = get_model_by_id("meta-llama/Llama-3-70b-chat-hf").unwrap();
        assert_eq!(model.provider, Provider::Together);
        assert_eq!(model.base_url, "https://api.together.xyz/v1");
    }

    #[test]
    fn test_models_by_provider() {
        assert_eq!(get_models(Provider::Together).len(), 3);
        assert!(get_models(Provider::OpenAI).is_empty());
    }

    #[test]
    fn test_resolve_unknown_model_is_custom() {
        let model = resolve_model("my-finetune", Some("http://gpu-box:8000/v1"));
        assert_eq!(model.provider, Provider::Custom);
        assert_eq!(model.base_url, "http://gpu-box:8000/v1");
    }

    #[test]
    fn test_resolve_known_model_with_override() {
        let model = resolve_model("llama-3-8b-instruct", Some("http://10.0.0.2:8080/v1"));
        assert_eq!(model.provider, Provider::LlamaCpp);
        assert_eq!(model.base_url, "http://10.0.0.2:8080/v1");
    }
}
