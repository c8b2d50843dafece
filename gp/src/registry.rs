use crate::errors::{GpError, Result};
use crate::gpr::Gpr;
use crate::mean::{MeanModel, MeanParams};
use crate::model::{LocalModel, ModelData};
use crate::parameters::GprParams;
use linfa::ParamGuard;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Kind of local model, resolved through a [`ModelRegistry`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ModelKind {
    /// Exact gaussian process regression ([`Gpr`])
    Gpr,
    /// Constant mean model ([`MeanModel`])
    Mean,
    /// Model registered by the user under a name
    Custom(String),
}

impl From<ModelKind> for String {
    fn from(kind: ModelKind) -> String {
        kind.to_string()
    }
}

impl From<String> for ModelKind {
    fn from(s: String) -> ModelKind {
        match s.as_str() {
            "Gpr" | "GPR" => ModelKind::Gpr,
            "Mean" => ModelKind::Mean,
            _ => ModelKind::Custom(s),
        }
    }
}

impl From<&str> for ModelKind {
    fn from(s: &str) -> ModelKind {
        ModelKind::from(s.to_string())
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelKind::Gpr => write!(f, "Gpr"),
            ModelKind::Mean => write!(f, "Mean"),
            ModelKind::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Builds a model on the local window of an expert location
pub type ModelBuilder = Arc<dyn Fn(&ModelData) -> Result<Box<dyn LocalModel>> + Send + Sync>;

/// Validates json init parameters and returns the corresponding builder
pub type ModelFactory = Arc<dyn Fn(&serde_json::Value) -> Result<ModelBuilder> + Send + Sync>;

/// Deserialize init parameters, `null` giving the defaults
pub fn parse_init_params<P: DeserializeOwned + Default>(init: &serde_json::Value) -> Result<P> {
    if init.is_null() {
        return Ok(P::default());
    }
    serde_json::from_value(init.clone())
        .map_err(|e| GpError::InvalidValueError(format!("bad init params {init}: {e}")))
}

fn gpr_factory(init: &serde_json::Value) -> Result<ModelBuilder> {
    let params = parse_init_params::<GprParams>(init)?.check()?;
    Ok(Arc::new(move |data: &ModelData| {
        Ok(Box::new(Gpr::new(data, &params)?) as Box<dyn LocalModel>)
    }))
}

fn mean_factory(init: &serde_json::Value) -> Result<ModelBuilder> {
    let params = parse_init_params::<MeanParams>(init)?.check()?;
    Ok(Arc::new(move |data: &ModelData| {
        Ok(Box::new(MeanModel::new(data, &params)?) as Box<dyn LocalModel>)
    }))
}

/// Mapping from model kind to model factory.
///
/// The default registry knows [`ModelKind::Gpr`] and [`ModelKind::Mean`].
#[derive(Clone)]
pub struct ModelRegistry {
    factories: BTreeMap<ModelKind, ModelFactory>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        let mut registry = ModelRegistry {
            factories: BTreeMap::new(),
        };
        registry.register(ModelKind::Gpr, Arc::new(gpr_factory));
        registry.register(ModelKind::Mean, Arc::new(mean_factory));
        registry
    }
}

impl ModelRegistry {
    /// Register (or replace) the factory of a model kind
    pub fn register(&mut self, kind: ModelKind, factory: ModelFactory) -> &mut Self {
        self.factories.insert(kind, factory);
        self
    }

    /// Whether the kind is registered
    pub fn contains(&self, kind: &ModelKind) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kinds
    pub fn kinds(&self) -> Vec<ModelKind> {
        self.factories.keys().cloned().collect()
    }

    /// Validate init parameters of a model kind and return its builder
    pub fn resolve(&self, kind: &ModelKind, init_params: &serde_json::Value) -> Result<ModelBuilder> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| GpError::UnknownModel(kind.to_string()))?;
        factory(init_params)
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
