use crate::error::{Result, TutorError};
use crate::llm::{GeminiClient, OpenAIClient};
use crate::persistence::{load_json, save_json, KeyValueStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Wire protocol family spoken by a vendor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    OpenAiCompatible,
    Gemini,
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolKind::OpenAiCompatible => write!(f, "openai-compatible"),
            ProtocolKind::Gemini => write!(f, "gemini"),
        }
    }
}

/// Static description of one supported vendor
#[derive(Debug, Clone)]
pub struct VendorSpec {
    pub id: &'static str,
    pub display_name: &'static str,
    pub protocol: ProtocolKind,
    pub default_base_url: fn() -> String,
    /// Appended to the base URL. May contain `{model}`.
    pub endpoint_path: &'static str,
    pub default_model: &'static str,
    pub env_key: &'static str,
}

fn groq_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

const BUILTIN_VENDORS: &[VendorSpec] = &[
    VendorSpec {
        id: "openai",
        display_name: "OpenAI",
        protocol: ProtocolKind::OpenAiCompatible,
        default_base_url: OpenAIClient::default_base_url,
        endpoint_path: "/chat/completions",
        default_model: "gpt-4o-mini",
        env_key: "OPENAI_API_KEY",
    },
    VendorSpec {
        id: "groq",
        display_name: "Groq",
        protocol: ProtocolKind::OpenAiCompatible,
        default_base_url: groq_base_url,
        endpoint_path: "/chat/completions",
        default_model: "llama-3.3-70b-versatile",
        env_key: "GROQ_API_KEY",
    },
    VendorSpec {
        id: "gemini",
        display_name: "Google Gemini",
        protocol: ProtocolKind::Gemini,
        default_base_url: GeminiClient::default_base_url,
        endpoint_path: "/models/{model}:streamGenerateContent",
        default_model: "gemini-2.0-flash",
        env_key: "GEMINI_API_KEY",
    },
];

/// Dispatch table from vendor id to its description
#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    vendors: &'static [VendorSpec],
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProviderCatalog {
    pub fn builtin() -> Self {
        Self {
            vendors: BUILTIN_VENDORS,
        }
    }

    pub fn get(&self, id: &str) -> Option<&'static VendorSpec> {
        let vendors: &'static [VendorSpec] = self.vendors;
        vendors.iter().find(|vendor| vendor.id == id)
    }

    pub fn vendors(&self) -> &'static [VendorSpec] {
        self.vendors
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.vendors.iter().map(|vendor| vendor.id).collect()
    }
}

/// Everything needed to talk to one vendor for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub id: String,
    pub endpoint_template: String,
    pub api_key: String,
    pub model: String,
    pub protocol: ProtocolKind,
}

impl ProviderConfig {
    /// Endpoint URL with `{model}` filled in
    pub fn endpoint(&self) -> String {
        self.endpoint_template.replace("{model}", &self.model)
    }
}

/// Settings document stored under [`Settings::STORE_KEY`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_keys: HashMap<String, String>,
    pub selected_provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    pub tutor_mode: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub base_urls: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_keys: HashMap::new(),
            selected_provider: "openai".to_string(),
            selected_model: None,
            tutor_mode: "standard".to_string(),
            base_urls: HashMap::new(),
        }
    }
}

impl Settings {
    pub const STORE_KEY: &'static str = "settings";

    /// Load the stored settings, or defaults if nothing was saved yet.
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        Ok(load_json(store, Self::STORE_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<()> {
        save_json(store, Self::STORE_KEY, self)
    }

    /// Fill keys missing from the document with the vendors' environment
    /// variables. Stored keys win.
    pub fn with_env_keys(self) -> Self {
        self.with_env_keys_from(|name| std::env::var(name).ok())
    }

    pub fn with_env_keys_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        for vendor in ProviderCatalog::builtin().vendors() {
            if self.api_key(vendor.id).is_some() {
                continue;
            }
            if let Some(key) = lookup(vendor.env_key).filter(|key| !key.trim().is_empty()) {
                self.api_keys.insert(vendor.id.to_string(), key);
            }
        }
        self
    }

    /// Non-blank credential for `vendor`
    pub fn api_key(&self, vendor: &str) -> Option<&str> {
        self.api_keys
            .get(vendor)
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
    }

    /// Resolve the selected vendor into a concrete provider configuration.
    /// Fails without touching the network when the vendor is unknown or has
    /// no credential.
    pub fn resolve_provider(&self, catalog: &ProviderCatalog) -> Result<ProviderConfig> {
        let vendor = catalog.get(&self.selected_provider).ok_or_else(|| {
            TutorError::Configuration(format!(
                "Unknown provider '{}'. Available providers: {}",
                self.selected_provider,
                catalog.ids().join(", ")
            ))
        })?;

        let api_key = self.api_key(vendor.id).ok_or_else(|| {
            TutorError::Configuration(format!(
                "No API key configured for {}. Add one in settings or set {}.",
                vendor.display_name, vendor.env_key
            ))
        })?;

        let base_url = self
            .base_urls
            .get(vendor.id)
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(vendor.default_base_url);

        let model = self
            .selected_model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(vendor.default_model)
            .to_string();

        Ok(ProviderConfig {
            id: vendor.id.to_string(),
            endpoint_template: format!("{}{}", base_url, vendor.endpoint_path),
            api_key: api_key.to_string(),
            model,
            protocol: vendor.protocol,
        })
    }
}
