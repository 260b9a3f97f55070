// ============================================================
// Layer 5 — Layer Registry
// ============================================================
// Maps canonical lowercase layer names ("convolution",
// "lstm", ...) to a descriptor of how that layer is built and
// serialised.
//
// The process-wide registry is created once on first use and
// is read-only afterwards. Tests and tools that want a
// restricted vocabulary build their own with
// LayerRegistry::new() + register().
//
// Registration order never affects resolution: lookup is by
// exact name only.

use std::{collections::HashMap, sync::OnceLock};

use crate::ml::error::{ModelError, ModelResult};

// ─── LayerKind ────────────────────────────────────────────────────────────────
/// Every layer type the serializer knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerKind {
    Relu,
    Tanh,
    Swish,
    Serial,
    Reverse,
    Convolution,
    Lstm,
    LinearCrfEncoder,
    Sha,
    Mha,
    ShaBlock,
    FeedForward,
    Boom,
    LayerScale,
    Permute,
}

impl LayerKind {
    pub const ALL: [LayerKind; 15] = [
        LayerKind::Relu,
        LayerKind::Tanh,
        LayerKind::Swish,
        LayerKind::Serial,
        LayerKind::Reverse,
        LayerKind::Convolution,
        LayerKind::Lstm,
        LayerKind::LinearCrfEncoder,
        LayerKind::Sha,
        LayerKind::Mha,
        LayerKind::ShaBlock,
        LayerKind::FeedForward,
        LayerKind::Boom,
        LayerKind::LayerScale,
        LayerKind::Permute,
    ];

    /// The canonical document name.
    pub fn name(self) -> &'static str {
        match self {
            LayerKind::Relu             => "relu",
            LayerKind::Tanh             => "tanh",
            LayerKind::Swish            => "swish",
            LayerKind::Serial           => "serial",
            LayerKind::Reverse          => "reverse",
            LayerKind::Convolution      => "convolution",
            LayerKind::Lstm             => "lstm",
            LayerKind::LinearCrfEncoder => "linearcrfencoder",
            LayerKind::Sha              => "sha",
            LayerKind::Mha              => "mha",
            LayerKind::ShaBlock         => "shablock",
            LayerKind::FeedForward      => "feedforward",
            LayerKind::Boom             => "boom",
            LayerKind::LayerScale       => "layerscale",
            LayerKind::Permute          => "permute",
        }
    }

    /// How the `sublayers` field is shaped for this kind.
    pub fn arity(self) -> Arity {
        match self {
            LayerKind::Serial  => Arity::Sequence,
            LayerKind::Reverse => Arity::SequenceOrSingle,
            _                  => Arity::Leaf,
        }
    }

    /// Whether the layer owns learnable parameters.
    pub fn is_parametric(self) -> bool {
        matches!(
            self,
            LayerKind::Convolution
                | LayerKind::Lstm
                | LayerKind::LinearCrfEncoder
                | LayerKind::Sha
                | LayerKind::Mha
                | LayerKind::ShaBlock
                | LayerKind::FeedForward
                | LayerKind::Boom
                | LayerKind::LayerScale
        )
    }
}

/// Shape of a layer's children in the model document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// No `sublayers` key
    Leaf,
    /// `sublayers` is a list, in forward order
    Sequence,
    /// `sublayers` is a list or one nested document
    SequenceOrSingle,
}

/// Everything the serializer needs to know about one layer type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerDescriptor {
    pub name:  &'static str,
    pub kind:  LayerKind,
    pub arity: Arity,
}

impl From<LayerKind> for LayerDescriptor {
    fn from(kind: LayerKind) -> Self {
        Self { name: kind.name(), kind, arity: kind.arity() }
    }
}

// ─── LayerRegistry ────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Default)]
pub struct LayerRegistry {
    layers: HashMap<String, LayerDescriptor>,
}

static GLOBAL: OnceLock<LayerRegistry> = OnceLock::new();

impl LayerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in layer kind.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for kind in LayerKind::ALL {
            registry.register(kind);
        }
        registry
    }

    /// The shared built-in registry, initialised on first use.
    pub fn global() -> &'static LayerRegistry {
        GLOBAL.get_or_init(|| {
            let registry = Self::builtin();
            tracing::debug!("Layer registry initialised with {} types", registry.layers.len());
            registry
        })
    }

    /// Add `kind` under its lowercase name and hand it back.
    pub fn register(&mut self, kind: LayerKind) -> LayerKind {
        let descriptor = LayerDescriptor::from(kind);
        self.layers.insert(descriptor.name.to_lowercase(), descriptor);
        kind
    }

    pub fn get(&self, name: &str) -> Option<&LayerDescriptor> {
        self.layers.get(name)
    }

    /// Look up `name`, reporting `path` in the document if it is unknown.
    pub fn resolve(&self, name: &str, path: &str) -> ModelResult<&LayerDescriptor> {
        self.get(name).ok_or_else(|| ModelError::UnknownLayerType {
            name: name.to_string(),
            path: path.to_string(),
        })
    }
}
