use super::registry::{Capability, ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    /// Resolves the model for `capability`.
    ///
    /// A catalog model with the wrong capability falls back to the default.
    /// Names the catalog does not know are passed through unchanged so newer
    /// provider models stay usable.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let note = match requested {
            Some(name) => {
                if let Some(model) = self.registry.ensure(name, capability) {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(name.to_string()),
                        note: None,
                    });
                }
                if self.registry.get(name).is_none() {
                    let provider = self
                        .registry
                        .by_capability(capability)
                        .first()
                        .map(|model| model.provider.clone())
                        .unwrap_or_default();
                    return Ok(ModelSelection {
                        model: ModelSpec {
                            name: name.to_string(),
                            provider,
                            capabilities: vec![capability],
                        },
                        requested: Some(name.to_string()),
                        note: Some(format!(
                            "Model '{name}' is not in the catalog; passing it through."
                        )),
                    });
                }
                format!("Model '{name}' does not support '{capability}'; using default.")
            }
            None => "No model specified; using default.".to_string(),
        };

        let Some(model) = self.registry.by_capability(capability).first().cloned() else {
            return Err(format!("No models available for capability '{capability}'."));
        };
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            note: Some(note),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;

    #[test]
    fn wrong_capability_falls_back_to_default() {
        let selection = ModelSelector::default()
            .select(Some("gemini-2.5-flash"), Capability::Video)
            .unwrap();
        assert_eq!(selection.model.name, "veo-3.1-fast-generate-preview");
        assert_eq!(selection.requested.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(
            selection.note.as_deref(),
            Some("Model 'gemini-2.5-flash' does not support 'video'; using default.")
        );
    }

    #[test]
    fn unknown_model_is_passed_through() {
        let selection = ModelSelector::default()
            .select(Some("veo-4.0-preview"), Capability::Video)
            .unwrap();
        assert_eq!(selection.model.name, "veo-4.0-preview");
        assert_eq!(selection.model.provider, "gemini");
        assert!(selection.note.is_some());
    }

    #[test]
    fn no_request_uses_default_with_explanation() {
        let selection = ModelSelector::default()
            .select(None, Capability::Edit)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash-image");
        assert_eq!(
            selection.note.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn empty_registry_reports_missing_capability() {
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(IndexMap::new()))))
            .select(None, Capability::Image)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'image'.");
    }
}
