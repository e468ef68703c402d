use std::fmt;

use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Image,
    Edit,
    Analysis,
    Video,
    VideoExtend,
    GatewayImage,
    GatewayChat,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Edit => "edit",
            Self::Analysis => "analysis",
            Self::Video => "video",
            Self::VideoExtend => "video_extend",
            Self::GatewayImage => "gateway_image",
            Self::GatewayChat => "gateway_chat",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<Capability>,
}

impl ModelSpec {
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Ordered model catalog; the first model per capability is its default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: Capability) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: Capability) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[Capability]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities.to_vec(),
            },
        );
    };

    insert("imagen-4.0-generate-001", "gemini", &[Capability::Image]);
    insert("imagen-4.0-ultra-generate-001", "gemini", &[Capability::Image]);
    insert("gemini-2.5-flash-image", "gemini", &[Capability::Edit]);
    insert("gemini-2.5-flash", "gemini", &[Capability::Analysis]);
    insert(
        "veo-3.1-fast-generate-preview",
        "gemini",
        &[Capability::Video],
    );
    insert(
        "veo-3.1-generate-preview",
        "gemini",
        &[Capability::VideoExtend, Capability::Video],
    );
    insert("openai/dall-e-3", "openrouter", &[Capability::GatewayImage]);
    insert(
        "anthropic/claude-3.5-sonnet",
        "openrouter",
        &[Capability::GatewayChat],
    );

    map
}
