//! Widget model type registry.
//!
//! Widget state names its own type: `_model_module`, `_model_name` and a
//! `_model_module_version` that reads as a semver range ("2.0.0" means
//! `^2.0.0`). Module providers register the models they export under a
//! concrete module version; lookups pick the highest registered version the
//! requested range accepts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use semver::{Version, VersionReq};
use widget_wire::{StateValue, WidgetState};

use crate::model::{ModelError, ModelSpec, WidgetModel};
use crate::WidgetId;

/// Builds a model of one registered type.
pub type ModelConstructor =
    Arc<dyn Fn(WidgetId, ModelSpec, WidgetState) -> Result<WidgetModel, ModelError> + Send + Sync>;

/// One widget module and the models it exports.
pub struct ModuleProvider {
    name: String,
    version: Version,
    models: Vec<(String, ModelConstructor)>,
}

impl ModuleProvider {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            models: Vec::new(),
        }
    }

    /// Export `model_name`, built by `constructor`.
    pub fn model(mut self, model_name: impl Into<String>, constructor: ModelConstructor) -> Self {
        self.models.push((model_name.into(), constructor));
        self
    }

    /// Export every name in `model_names` with the same constructor.
    pub fn models(mut self, model_names: &[&str], constructor: ModelConstructor) -> Self {
        for name in model_names {
            self.models.push((name.to_string(), constructor.clone()));
        }
        self
    }
}

struct Registration {
    version: Version,
    constructor: ModelConstructor,
}

/// Maps `(module, model name, version)` to a constructor.
#[derive(Default)]
pub struct ModelRegistry {
    entries: HashMap<(String, String), Vec<Registration>>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.entries.keys().collect();
        keys.sort();
        f.debug_struct("ModelRegistry").field("models", &keys).finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every model `provider` exports.
    pub fn register_module(&mut self, provider: ModuleProvider) {
        let ModuleProvider {
            name,
            version,
            models,
        } = provider;
        for (model_name, constructor) in models {
            self.register(&name, version.clone(), &model_name, constructor);
        }
    }

    /// Register a single model type. A later registration of the same
    /// module version replaces the earlier one.
    pub fn register(
        &mut self,
        module: &str,
        version: Version,
        model_name: &str,
        constructor: ModelConstructor,
    ) {
        let versions = self
            .entries
            .entry((module.to_string(), model_name.to_string()))
            .or_default();
        versions.retain(|r| r.version != version);
        versions.push(Registration {
            version,
            constructor,
        });
        // Highest version first so lookups take the first match
        versions.sort_by(|a, b| b.version.cmp(&a.version));
    }

    /// Number of registered `(module, model)` pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the constructor for `model_name` in `module` matching `requested`.
    pub fn lookup(
        &self,
        module: &str,
        model_name: &str,
        requested: &str,
    ) -> Result<&ModelConstructor, ModelError> {
        self.entries
            .get(&(module.to_string(), model_name.to_string()))
            .and_then(|versions| {
                versions
                    .iter()
                    .find(|r| version_matches(requested, &r.version))
            })
            .map(|r| &r.constructor)
            .ok_or_else(|| ModelError::UnknownType {
                module: module.to_string(),
                name: model_name.to_string(),
                version: requested.to_string(),
            })
    }

    /// Build the model for widget `model_id` from its full `state`.
    pub fn construct(
        &self,
        model_id: WidgetId,
        state: WidgetState,
    ) -> Result<WidgetModel, ModelError> {
        let spec = ModelSpec::from_state(&state)?;
        let constructor = self.lookup(
            &spec.model_module,
            &spec.model_name,
            &spec.model_module_version,
        )?;
        constructor(model_id, spec, state)
    }
}

fn version_matches(requested: &str, provided: &Version) -> bool {
    match VersionReq::parse(requested.trim()) {
        Ok(req) => req.matches(provided),
        Err(_) => requested.trim() == provided.to_string(),
    }
}

/// Prefix of serialized references to other widget models.
pub const MODEL_REFERENCE_PREFIX: &str = "IPY_MODEL_";

/// Attributes that, when set, must reference another model.
const REFERENCE_ATTRIBUTES: &[&str] = &["layout", "style"];

/// Constructor shared by the built-in modules: checks that model references
/// are well formed and keeps the state as-is.
pub fn standard_constructor() -> ModelConstructor {
    Arc::new(|model_id: WidgetId, spec: ModelSpec, state: WidgetState| {
        for attribute in REFERENCE_ATTRIBUTES {
            match state.get(*attribute) {
                None | Some(StateValue::Null) => {}
                Some(StateValue::String(r)) if r.starts_with(MODEL_REFERENCE_PREFIX) => {}
                Some(_) => {
                    return Err(ModelError::InvalidState {
                        model_name: spec.model_name.clone(),
                        reason: format!("{} is not a model reference", attribute),
                    })
                }
            }
        }
        Ok(WidgetModel::new(model_id, spec, state))
    })
}

pub const BASE_MODULE: &str = "@jupyter-widgets/base";
pub const CONTROLS_MODULE: &str = "@jupyter-widgets/controls";
pub const OUTPUT_MODULE: &str = "@jupyter-widgets/output";

const BASE_MODELS: &[&str] = &["WidgetModel", "DOMWidgetModel", "LayoutModel", "StyleModel"];

const CONTROLS_MODELS: &[&str] = &[
    "AccordionModel",
    "AudioModel",
    "BoundedFloatTextModel",
    "BoundedIntTextModel",
    "BoxModel",
    "ButtonModel",
    "ButtonStyleModel",
    "CheckboxModel",
    "CheckboxStyleModel",
    "ColorPickerModel",
    "ComboboxModel",
    "DatePickerModel",
    "DescriptionStyleModel",
    "DirectionalLinkModel",
    "DropdownModel",
    "FloatLogSliderModel",
    "FloatProgressModel",
    "FloatRangeSliderModel",
    "FloatSliderModel",
    "FloatTextModel",
    "GridBoxModel",
    "HBoxModel",
    "HTMLMathModel",
    "HTMLModel",
    "HTMLStyleModel",
    "ImageModel",
    "IntProgressModel",
    "IntRangeSliderModel",
    "IntSliderModel",
    "IntTextModel",
    "LabelModel",
    "LabelStyleModel",
    "LinkModel",
    "PasswordModel",
    "PlayModel",
    "ProgressStyleModel",
    "RadioButtonsModel",
    "SelectModel",
    "SelectMultipleModel",
    "SelectionRangeSliderModel",
    "SelectionSliderModel",
    "SliderStyleModel",
    "StackModel",
    "TabModel",
    "TextModel",
    "TextStyleModel",
    "TextareaModel",
    "ToggleButtonModel",
    "ToggleButtonStyleModel",
    "ToggleButtonsModel",
    "ToggleButtonsStyleModel",
    "VBoxModel",
    "ValidModel",
    "VideoModel",
];

/// Registry with the base, controls and output widget modules.
pub fn default_registry() -> ModelRegistry {
    let constructor = standard_constructor();
    let mut registry = ModelRegistry::new();
    registry.register_module(
        ModuleProvider::new(BASE_MODULE, Version::new(2, 0, 0))
            .models(BASE_MODELS, constructor.clone()),
    );
    registry.register_module(
        ModuleProvider::new(CONTROLS_MODULE, Version::new(2, 0, 0))
            .models(CONTROLS_MODELS, constructor.clone()),
    );
    registry.register_module(
        ModuleProvider::new(OUTPUT_MODULE, Version::new(1, 0, 0)).model("OutputModel", constructor),
    );
    registry
}
