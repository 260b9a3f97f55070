// ============================================================
// Layer 5 — Model Serializer
// ============================================================
// Converts a Layer tree to and from a model document:
//
//   {
//     "type": "serial",
//     "sublayers": [
//       { "type": "convolution", "insize": 1, "size": 4,
//         "winlen": 5, "stride": 1, "padding": 2,
//         "bias": true, "activation": "swish",
//         "params": { "W": [[[...]]], "b": [...] } },
//       { "type": "permute", "dims": [2, 0, 1] },
//       { "type": "reverse", "sublayers": { "type": "lstm", ... } },
//       ...
//     ]
//   }
//
// Building a node is a tagged-variant dispatch: resolve the
// type through the registry, build the children first, decode
// the remaining keys into that layer's typed config (unknown
// keys are ignored), then load `params` if present.
//
// Round trip law: from_document(to_document(n)) reproduces
// the same document, and with weights the same forward output
// bit for bit.

use burn::prelude::*;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::ml::{
    error::{ConstructionFailure, ModelError, ModelResult},
    layers::{
        activation::{Relu, Swish, Tanh},
        attention::{FeedForwardConfig, LayerScaleConfig, MhaConfig, ShaBlockConfig, ShaConfig},
        convolution::ConvolutionConfig,
        crf_encoder::LinearCrfEncoderConfig,
        lstm::LstmConfig,
        permute::PermuteConfig,
        Layer, Leaf, Node,
    },
    params::{ParamSet, ParamTensor},
    registry::{Arity, LayerKind, LayerRegistry},
};

const TYPE: &str = "type";
const SUBLAYERS: &str = "sublayers";
const PARAMS: &str = "params";

// ─── Layer → Document ─────────────────────────────────────────────────────────

/// Serialise a layer tree, optionally with its parameters.
pub fn to_document<B: Backend>(layer: &Layer<B>, include_weights: bool) -> ModelResult<Value> {
    node_document(layer.leaves(), layer.tree(), include_weights)
}

fn node_document<B: Backend>(leaves: &[Leaf<B>], node: &Node, include_weights: bool) -> ModelResult<Value> {
    let (kind, sublayers) = match node {
        Node::Leaf(i) => return leaf_document(&leaves[*i], include_weights),
        Node::Serial(children) => {
            (LayerKind::Serial, sublayer_list(leaves, children, include_weights)?)
        }
        Node::Reverse { children, single } => {
            let sublayers = match children.as_slice() {
                [only] if *single => node_document(leaves, only, include_weights)?,
                children => sublayer_list(leaves, children, include_weights)?,
            };
            (LayerKind::Reverse, sublayers)
        }
    };
    let mut doc = Map::new();
    doc.insert(TYPE.into(), Value::from(kind.name()));
    doc.insert(SUBLAYERS.into(), sublayers);
    Ok(Value::Object(doc))
}

fn sublayer_list<B: Backend>(leaves: &[Leaf<B>], nodes: &[Node], include_weights: bool) -> ModelResult<Value> {
    nodes
        .iter()
        .map(|node| node_document(leaves, node, include_weights))
        .collect::<ModelResult<Vec<_>>>()
        .map(Value::Array)
}

fn leaf_document<B: Backend>(leaf: &Leaf<B>, include_weights: bool) -> ModelResult<Value> {
    let mut doc = Map::new();
    doc.insert(TYPE.into(), Value::from(leaf.kind().name()));
    if let Some(fields) = leaf_config(leaf)? {
        doc.extend(fields);
    }
    if include_weights && leaf.kind().is_parametric() {
        let params: Map<String, Value> = leaf
            .export_params()?
            .iter()
            .map(|(name, tensor)| (name.to_string(), tensor.to_json()))
            .collect();
        doc.insert(PARAMS.into(), Value::Object(params));
    }
    Ok(Value::Object(doc))
}

/// A parameterless layer document from a typed config.
pub fn layer_spec<T: Serialize>(kind: LayerKind, config: &T) -> Value {
    let mut doc = Map::new();
    doc.insert(TYPE.into(), Value::from(kind.name()));
    if let Value::Object(fields) = serde_json::json!(config) {
        doc.extend(fields);
    }
    Value::Object(doc)
}

fn fields_of<T: Serialize>(config: &T) -> ModelResult<Option<Map<String, Value>>> {
    match serde_json::to_value(config) {
        Ok(Value::Object(map)) => Ok(Some(map)),
        Ok(other) => Err(ModelError::Config(format!("expected a map, got {other}"))),
        Err(e) => Err(ModelError::Config(e.to_string())),
    }
}

/// Structural fields of a leaf, in constructor order.
fn leaf_config<B: Backend>(leaf: &Leaf<B>) -> ModelResult<Option<Map<String, Value>>> {
    match leaf {
        Leaf::Convolution(l)      => fields_of(&l.config()),
        Leaf::Lstm(l)             => fields_of(&l.config()),
        Leaf::LinearCrfEncoder(l) => fields_of(&l.config()),
        Leaf::Sha(l)              => fields_of(&l.config()),
        Leaf::Mha(l)              => fields_of(&l.config()),
        Leaf::ShaBlock(l)         => fields_of(&l.config()),
        Leaf::FeedForward(l)      => fields_of(&l.config()),
        Leaf::Boom(l)             => fields_of(&l.config()),
        Leaf::LayerScale(l)       => fields_of(&l.config()),
        Leaf::Permute(l)          => fields_of(&l.config()),
        Leaf::Relu(_) | Leaf::Tanh(_) | Leaf::Swish(_) => Ok(None),
    }
}

// ─── Document → Layer ─────────────────────────────────────────────────────────

/// Build a layer tree from a document, resolving types in `registry`.
pub fn from_document<B: Backend>(
    doc:      &Value,
    registry: &LayerRegistry,
    device:   &B::Device,
) -> ModelResult<Layer<B>> {
    build(doc, registry, device, "/")
}

enum Children<B: Backend> {
    Leaf,
    List(Vec<Layer<B>>),
    Single(Layer<B>),
}

fn child_path(path: &str, suffix: &str) -> String {
    if path == "/" {
        format!("/{suffix}")
    } else {
        format!("{path}/{suffix}")
    }
}

fn malformed(path: &str, reason: impl Into<String>) -> ModelError {
    ModelError::MalformedDocument { path: path.to_string(), reason: reason.into() }
}

fn build<B: Backend>(
    doc:      &Value,
    registry: &LayerRegistry,
    device:   &B::Device,
    path:     &str,
) -> ModelResult<Layer<B>> {
    let map = doc
        .as_object()
        .ok_or_else(|| malformed(path, "layer document must be a map"))?;

    let type_name = match map.get(TYPE) {
        Some(Value::String(name)) => name.as_str(),
        Some(_) => return Err(malformed(path, "'type' must be a string")),
        None => return Err(malformed(path, "missing 'type'")),
    };
    let descriptor = registry.resolve(type_name, path)?;

    // ── Children first ───────────────────────────────────────────────────────
    let sublayers_path = child_path(path, SUBLAYERS);
    let build_list = |items: &Vec<Value>| -> ModelResult<Vec<Layer<B>>> {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| build(item, registry, device, &format!("{sublayers_path}/{i}")))
            .collect()
    };
    let children = match (descriptor.arity, map.get(SUBLAYERS)) {
        (Arity::Leaf, None) => Children::Leaf,
        (Arity::Leaf, Some(_)) => {
            return Err(malformed(path, format!("'{type_name}' takes no sublayers")))
        }
        (Arity::Sequence, Some(Value::Array(items)))
        | (Arity::SequenceOrSingle, Some(Value::Array(items))) => Children::List(build_list(items)?),
        (Arity::SequenceOrSingle, Some(single @ Value::Object(_))) => {
            Children::Single(build(single, registry, device, &sublayers_path)?)
        }
        (Arity::Sequence, _) => {
            return Err(malformed(path, "'sublayers' must be a list"))
        }
        (Arity::SequenceOrSingle, _) => {
            return Err(malformed(path, "'sublayers' must be a list or a layer document"))
        }
    };

    // ── Construct ────────────────────────────────────────────────────────────
    let args: Map<String, Value> = map
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), TYPE | SUBLAYERS | PARAMS))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let layer = construct(descriptor.kind, Value::Object(args), children, device)?;

    // ── Parameters ───────────────────────────────────────────────────────────
    match map.get(PARAMS) {
        None => Ok(layer),
        Some(_) if descriptor.arity != Arity::Leaf => {
            Err(malformed(path, "'params' is only allowed on leaf layers"))
        }
        Some(value) => load_params(layer, value, device, &child_path(path, PARAMS)),
    }
}

fn construct<B: Backend>(
    kind:     LayerKind,
    args:     Value,
    children: Children<B>,
    device:   &B::Device,
) -> ModelResult<Layer<B>> {
    let fail = |args: &Value, source: ConstructionFailure| ModelError::LayerConstruction {
        layer_type: kind.name().to_string(),
        args: args.clone(),
        source,
    };
    fn decode<T: DeserializeOwned>(args: &Value) -> Result<T, ConstructionFailure> {
        Ok(serde_json::from_value(args.clone())?)
    }

    let leaf = |built: Result<Leaf<B>, ConstructionFailure>| built.map(Layer::leaf);
    let built: Result<Layer<B>, ConstructionFailure> = match (kind, children) {
        (LayerKind::Relu, _)  => Ok(Layer::leaf(Leaf::Relu(Relu))),
        (LayerKind::Tanh, _)  => Ok(Layer::leaf(Leaf::Tanh(Tanh))),
        (LayerKind::Swish, _) => Ok(Layer::leaf(Leaf::Swish(Swish))),

        (LayerKind::Serial, Children::List(layers))   => Ok(Layer::serial(layers)),
        (LayerKind::Reverse, Children::List(layers))  => Ok(Layer::reverse(layers)),
        (LayerKind::Reverse, Children::Single(layer)) => Ok(Layer::reverse_single(layer)),
        (LayerKind::Serial | LayerKind::Reverse, _) => {
            Err(ConstructionFailure::Invalid("missing 'sublayers'".into()))
        }

        (LayerKind::Convolution, _) => leaf(decode::<ConvolutionConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::Convolution)),
        (LayerKind::Lstm, _) => leaf(decode::<LstmConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::Lstm)),
        (LayerKind::LinearCrfEncoder, _) => leaf(decode::<LinearCrfEncoderConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::LinearCrfEncoder)),
        (LayerKind::Sha, _) => leaf(decode::<ShaConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::Sha)),
        (LayerKind::Mha, _) => leaf(decode::<MhaConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::Mha)),
        (LayerKind::ShaBlock, _) => leaf(decode::<ShaBlockConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::ShaBlock)),
        (LayerKind::FeedForward, _) => leaf(decode::<FeedForwardConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::FeedForward)),
        (LayerKind::Boom, _) => leaf(decode::<FeedForwardConfig>(&args)
            .and_then(|c| c.init_boom(device))
            .map(Leaf::Boom)),
        (LayerKind::LayerScale, _) => leaf(decode::<LayerScaleConfig>(&args)
            .and_then(|c| c.init(device))
            .map(Leaf::LayerScale)),
        (LayerKind::Permute, _) => leaf(decode::<PermuteConfig>(&args)
            .and_then(|c| c.init())
            .map(Leaf::Permute)),
    };
    built.map_err(|source| fail(&args, source))
}

/// Check `value` against the freshly built layer's own parameter
/// names and shapes, then load it.
fn load_params<B: Backend>(
    layer:  Layer<B>,
    value:  &Value,
    device: &B::Device,
    path:   &str,
) -> ModelResult<Layer<B>> {
    let given = value
        .as_object()
        .ok_or_else(|| malformed(path, "'params' must be a map"))?;
    let expected = layer.export_params()?;

    let mut params = ParamSet::new();
    for (name, template) in expected.iter() {
        let raw = given
            .get(name)
            .ok_or_else(|| malformed(path, format!("missing parameter '{name}'")))?;
        let tensor = ParamTensor::from_json(raw)
            .map_err(|e| malformed(&child_path(path, name), e.to_string()))?;
        if tensor.shape != template.shape {
            return Err(malformed(
                &child_path(path, name),
                format!("expected shape {:?}, got {:?}", template.shape, tensor.shape),
            ));
        }
        params.insert(name, tensor);
    }
    if let Some(extra) = given.keys().find(|k| expected.get(k).is_none()) {
        return Err(malformed(path, format!("unexpected parameter '{extra}'")));
    }

    layer.import_params(&params, device)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::layers::activation::ActivationKind;
    use burn::{backend::NdArray, tensor::Distribution};
    use serde_json::json;

    type TestBackend = NdArray;

    fn device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn registry() -> &'static LayerRegistry {
        LayerRegistry::global()
    }

    fn output(layer: &Layer<TestBackend>, x: Tensor<TestBackend, 3>) -> Vec<f32> {
        layer.forward(x).into_data().to_vec().unwrap()
    }

    /// Serialise with weights, rebuild, and require identical
    /// documents and bit-identical outputs.
    fn assert_round_trip(layer: Layer<TestBackend>, input_shape: [usize; 3]) {
        let device = device();
        let x = Tensor::<TestBackend, 3>::random(input_shape, Distribution::Default, &device);

        let doc = to_document(&layer, true).unwrap();
        let restored: Layer<TestBackend> = from_document(&doc, registry(), &device).unwrap();

        assert_eq!(restored.kind(), layer.kind());
        assert_eq!(to_document(&restored, true).unwrap(), doc);
        assert_eq!(output(&layer, x.clone()), output(&restored, x));
    }

    #[test]
    fn test_round_trip_convolution() {
        let conv = ConvolutionConfig::new(3, 5, 4)
            .with_stride(2)
            .with_padding(1)
            .with_activation(Some(ActivationKind::Swish))
            .init::<TestBackend>(&device())
            .unwrap();
        assert_round_trip(Layer::leaf(Leaf::Convolution(conv)), [2, 3, 12]);
    }

    #[test]
    fn test_round_trip_lstm() {
        let lstm = LstmConfig::new(6, 3).with_reverse(true).init::<TestBackend>(&device()).unwrap();
        assert_round_trip(Layer::leaf(Leaf::Lstm(lstm)), [5, 2, 3]);
    }

    #[test]
    fn test_round_trip_crf_encoder() {
        let enc = LinearCrfEncoderConfig::new(8, 4, 2)
            .with_scale(Some(5.0))
            .with_activation(Some(ActivationKind::Tanh))
            .with_blank_score(Some(2.0))
            .init::<TestBackend>(&device())
            .unwrap();
        assert_round_trip(Layer::leaf(Leaf::LinearCrfEncoder(enc)), [4, 2, 8]);
    }

    #[test]
    fn test_round_trip_attention_family() {
        let device = device();
        let single: ShaBlockConfig = serde_json::from_value(json!({"dim": 8})).unwrap();
        let mut multi = single.clone();
        multi.num_attn_heads = 2;
        multi.boom = true;

        assert_round_trip(Layer::leaf(Leaf::ShaBlock(single.init(&device).unwrap())), [4, 2, 8]);
        assert_round_trip(Layer::leaf(Leaf::ShaBlock(multi.init(&device).unwrap())), [4, 2, 8]);
        assert_round_trip(Layer::leaf(Leaf::FeedForward(FeedForwardConfig::new(8).init(&device).unwrap())), [3, 2, 8]);
        assert_round_trip(Layer::leaf(Leaf::Boom(FeedForwardConfig::new(8).init_boom(&device).unwrap())), [3, 2, 8]);
        assert_round_trip(Layer::leaf(Leaf::LayerScale(LayerScaleConfig::new(8).init(&device).unwrap())), [3, 2, 8]);
    }

    #[test]
    fn test_round_trip_standalone_attention() {
        let device = device();
        let mut mha = MhaConfig::new(8).with_heads(2);
        mha.dim_head = 4;

        assert_round_trip(Layer::leaf(Leaf::Sha(ShaConfig::new(8).init(&device).unwrap())), [4, 2, 8]);
        assert_round_trip(Layer::leaf(Leaf::Mha(mha.init(&device).unwrap())), [4, 2, 8]);

        let nested = Layer::serial(vec![
            Layer::reverse_single(Layer::leaf(Leaf::Sha(ShaConfig::new(8).init(&device).unwrap()))),
            Layer::leaf(Leaf::Swish(Swish)),
        ]);
        assert_round_trip(nested, [3, 2, 8]);
    }

    #[test]
    fn test_standalone_attention_documents() {
        let doc = json!({"type": "serial", "sublayers": [
            {"type": "sha", "dim": 8},
            {"type": "mha", "dim": 8, "heads": 2}
        ]});
        let layer: Layer<TestBackend> = from_document(&doc, registry(), &device()).unwrap();
        let out = to_document(&layer, false).unwrap();
        assert_eq!(out["sublayers"][0], json!({"type": "sha", "dim": 8, "dropout": 0.0}));
        assert_eq!(
            out["sublayers"][1],
            json!({"type": "mha", "dim": 8, "heads": 2, "dim_head": 64, "dropout": 0.0})
        );

        let params = layer.export_params().unwrap();
        assert_eq!(params.get("0.to_q.W").unwrap().shape, vec![8, 8]);
        assert_eq!(params.get("1.to_kv.W").unwrap().shape, vec![128, 8]);
    }

    #[test]
    fn test_round_trip_without_weights_preserves_structure() {
        let doc = json!({
            "type": "serial",
            "sublayers": [
                {"type": "convolution", "insize": 1, "size": 4, "winlen": 5, "stride": 1,
                 "padding": 2, "bias": true, "activation": "swish"},
                {"type": "permute", "dims": [2, 0, 1]},
                {"type": "reverse", "sublayers": {"type": "lstm", "size": 8, "insize": 4,
                                                  "bias": true, "reverse": false}},
                {"type": "reverse", "sublayers": [{"type": "tanh"}, {"type": "relu"}]},
                {"type": "linearcrfencoder", "insize": 8, "n_base": 4, "state_len": 1,
                 "bias": true, "scale": 5.0, "activation": "tanh", "blank_score": null}
            ]
        });
        let layer: Layer<TestBackend> = from_document(&doc, registry(), &device()).unwrap();
        assert_eq!(to_document(&layer, false).unwrap(), doc);
    }

    #[test]
    fn test_defaults_and_unknown_keys() {
        let doc = json!({"type": "convolution", "insize": 1, "size": 2, "winlen": 3, "colour": "red"});
        let layer: Layer<TestBackend> = from_document(&doc, registry(), &device()).unwrap();
        let out = to_document(&layer, false).unwrap();
        assert_eq!(out["stride"], json!(1));
        assert_eq!(out["bias"], json!(true));
        assert_eq!(out["activation"], Value::Null);
        assert!(out.get("colour").is_none());
    }

    #[test]
    fn test_unknown_type_reports_path() {
        let doc = json!({"type": "serial", "sublayers": [{"type": "relu"}, {"type": "gru", "size": 3}]});
        match from_document::<TestBackend>(&doc, registry(), &device()) {
            Err(ModelError::UnknownLayerType { name, path }) => {
                assert_eq!(name, "gru");
                assert_eq!(path, "/sublayers/1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_partial_registry() {
        let mut custom = LayerRegistry::new();
        custom.register(LayerKind::Serial);
        custom.register(LayerKind::Tanh);
        let ok = json!({"type": "serial", "sublayers": [{"type": "tanh"}]});
        assert!(from_document::<TestBackend>(&ok, &custom, &device()).is_ok());
        let bad = json!({"type": "serial", "sublayers": [{"type": "relu"}]});
        assert!(matches!(
            from_document::<TestBackend>(&bad, &custom, &device()),
            Err(ModelError::UnknownLayerType { .. })
        ));
    }

    #[test]
    fn test_malformed_documents() {
        let cases = [
            json!([1, 2, 3]),
            json!({"insize": 3}),
            json!({"type": 7}),
            json!({"type": "serial", "sublayers": {"type": "relu"}}),
            json!({"type": "serial"}),
            json!({"type": "relu", "sublayers": []}),
        ];
        for doc in cases {
            assert!(
                matches!(
                    from_document::<TestBackend>(&doc, registry(), &device()),
                    Err(ModelError::MalformedDocument { .. })
                ),
                "{doc} should be malformed"
            );
        }
    }

    #[test]
    fn test_construction_failure_carries_args() {
        let doc = json!({"type": "lstm", "size": "big", "insize": 4});
        match from_document::<TestBackend>(&doc, registry(), &device()) {
            Err(ModelError::LayerConstruction { layer_type, args, source }) => {
                assert_eq!(layer_type, "lstm");
                assert_eq!(args, json!({"size": "big", "insize": 4}));
                assert!(matches!(source, ConstructionFailure::Arguments(_)));
            }
            other => panic!("unexpected {other:?}"),
        }

        let doc = json!({"type": "permute", "dims": [0, 0, 1]});
        assert!(matches!(
            from_document::<TestBackend>(&doc, registry(), &device()),
            Err(ModelError::LayerConstruction { source: ConstructionFailure::Invalid(_), .. })
        ));
    }

    #[test]
    fn test_param_shape_mismatch() {
        let device = device();
        let conv = ConvolutionConfig::new(1, 2, 3).init::<TestBackend>(&device).unwrap();
        let mut doc = to_document(&Layer::leaf(Leaf::Convolution(conv)), true).unwrap();
        doc["params"]["b"] = json!([1.0, 2.0, 3.0]);
        assert!(matches!(
            from_document::<TestBackend>(&doc, registry(), &device),
            Err(ModelError::MalformedDocument { .. })
        ));
    }

    #[test]
    fn test_reversed_order_differs() {
        let device = device();
        let conv = |seed: f32| {
            let c = ConvolutionConfig::new(2, 2, 1).init::<TestBackend>(&device).unwrap();
            let mut p = c.export_params().unwrap();
            p.insert("W", ParamTensor::new(vec![2, 2, 1], vec![seed, 0.5, -1.0, 2.0]).unwrap());
            p.insert("b", ParamTensor::new(vec![2], vec![0.1, -0.2]).unwrap());
            Layer::leaf(Leaf::Convolution(c.import_params(&p, &device).unwrap()))
        };
        let forward  = Layer::serial(vec![conv(1.0), Layer::leaf(Leaf::Tanh(Tanh)), conv(3.0)]);
        let backward = Layer::serial(vec![conv(3.0), Layer::leaf(Leaf::Tanh(Tanh)), conv(1.0)]);

        let a = to_document(&forward, true).unwrap();
        let b = to_document(&backward, true).unwrap();
        assert_ne!(a, b);

        let x = Tensor::<TestBackend, 3>::from_floats([[[1.0, -2.0], [0.5, 3.0]]], &device);
        assert_ne!(output(&forward, x.clone()), output(&backward, x));
    }

    #[test]
    fn test_end_to_end_conv_tanh() {
        let device = device();
        let conv = ConvolutionConfig::new(1, 4, 3)
            .with_padding(1)
            .init::<TestBackend>(&device)
            .unwrap();
        let model = Layer::serial(vec![Layer::leaf(Leaf::Convolution(conv)), Layer::leaf(Leaf::Tanh(Tanh))]);

        let doc = serde_json::to_string(&to_document(&model, true).unwrap()).unwrap();
        let parsed: Value = serde_json::from_str(&doc).unwrap();
        let restored: Layer<TestBackend> = from_document(&parsed, registry(), &device).unwrap();

        let x = Tensor::<TestBackend, 3>::random([10, 1, 1], Distribution::Default, &device);
        let a = output(&model, x.clone());
        let b = output(&restored, x);
        assert_eq!(a.len(), 10 * 4);
        for (u, v) in a.iter().zip(&b) {
            assert!((u - v).abs() <= 1e-6);
        }
    }
}
