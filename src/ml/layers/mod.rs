// ============================================================
// Layer 5 — Layer Trees
// ============================================================
// A model is a tree of layers. The Burn modules live in a flat
// list of Leaf values; the nesting (Serial, Reverse) is a plain
// Node tree that indexes into that list. Keeping composites out
// of the module graph means the module types never refer to
// themselves, so records and autodiff conversion stay finite.
//
// Every Layer can:
//   - run forward on a rank 3 tensor
//   - report the LayerKind of its root
//   - export / import its parameters as a canonical ParamSet,
//     keyed by dotted paths ("2.iW", "0.1.W", ...)
//   - walk its Burn Params with a ParamVisitor
//
// Axis conventions differ per layer, exactly like the layers
// they model: Convolution expects [batch, C, time]; LSTM,
// CRF encoder and attention expect [time, batch, C]. A Permute
// leaf moves between the two.
//
// Reference: Burn Book §3 (Building Blocks)

pub mod activation;
pub mod attention;
pub mod composite;
pub mod convolution;
pub mod crf_encoder;
pub mod lstm;
pub mod permute;

use burn::{module::Ignored, nn::Linear, prelude::*};

use crate::ml::{
    error::ModelResult,
    params::{ParamSet, ParamTensor, ParamVisitor},
    registry::LayerKind,
};

pub use activation::{Relu, Swish, Tanh};
pub use attention::{Boom, FeedForward, LayerScale, Mha, Sha, ShaBlock};
pub use composite::Node;
pub use convolution::Convolution;
pub use crf_encoder::LinearCrfEncoder;
pub use lstm::Lstm;
pub use permute::Permute;

// ─── Leaf ─────────────────────────────────────────────────────────────────────
/// One concrete layer module.
#[derive(Module, Debug)]
pub enum Leaf<B: Backend> {
    Relu(Relu),
    Tanh(Tanh),
    Swish(Swish),
    Convolution(Convolution<B>),
    Lstm(Lstm<B>),
    LinearCrfEncoder(LinearCrfEncoder<B>),
    Sha(Sha<B>),
    Mha(Mha<B>),
    ShaBlock(ShaBlock<B>),
    FeedForward(FeedForward<B>),
    Boom(Boom<B>),
    LayerScale(LayerScale<B>),
    Permute(Permute),
}

impl<B: Backend> Leaf<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match self {
            Leaf::Relu(l)             => l.forward(x),
            Leaf::Tanh(l)             => l.forward(x),
            Leaf::Swish(l)            => l.forward(x),
            Leaf::Convolution(l)      => l.forward(x),
            Leaf::Lstm(l)             => l.forward(x),
            Leaf::LinearCrfEncoder(l) => l.forward(x),
            Leaf::Sha(l)              => l.forward(x),
            Leaf::Mha(l)              => l.forward(x),
            Leaf::ShaBlock(l)         => l.forward(x),
            Leaf::FeedForward(l)      => l.forward(x),
            Leaf::Boom(l)             => l.forward(x),
            Leaf::LayerScale(l)       => l.forward(x),
            Leaf::Permute(l)          => l.forward(x),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Leaf::Relu(_)             => LayerKind::Relu,
            Leaf::Tanh(_)             => LayerKind::Tanh,
            Leaf::Swish(_)            => LayerKind::Swish,
            Leaf::Convolution(_)      => LayerKind::Convolution,
            Leaf::Lstm(_)             => LayerKind::Lstm,
            Leaf::LinearCrfEncoder(_) => LayerKind::LinearCrfEncoder,
            Leaf::Sha(_)              => LayerKind::Sha,
            Leaf::Mha(_)              => LayerKind::Mha,
            Leaf::ShaBlock(_)         => LayerKind::ShaBlock,
            Leaf::FeedForward(_)      => LayerKind::FeedForward,
            Leaf::Boom(_)             => LayerKind::Boom,
            Leaf::LayerScale(_)       => LayerKind::LayerScale,
            Leaf::Permute(_)          => LayerKind::Permute,
        }
    }

    /// Channel count this leaf produces, when it sets one.
    /// Activations, permutes and residual blocks keep their
    /// input width and report None.
    pub fn output_width(&self) -> Option<usize> {
        match self {
            Leaf::Convolution(l)      => Some(l.config().size),
            Leaf::Lstm(l)             => Some(l.config().size),
            Leaf::LinearCrfEncoder(l) => {
                let cfg = l.config();
                Some(cfg.n_states() * (cfg.n_base + 1))
            }
            _ => None,
        }
    }

    pub fn export_params(&self) -> ModelResult<ParamSet> {
        match self {
            Leaf::Convolution(l)      => l.export_params(),
            Leaf::Lstm(l)             => l.export_params(),
            Leaf::LinearCrfEncoder(l) => l.export_params(),
            Leaf::Sha(l)              => l.export_params(),
            Leaf::Mha(l)              => l.export_params(),
            Leaf::ShaBlock(l)         => l.export_params(),
            Leaf::FeedForward(l)      => l.export_params(),
            Leaf::Boom(l)             => l.export_params(),
            Leaf::LayerScale(l)       => l.export_params(),
            Leaf::Relu(_) | Leaf::Tanh(_) | Leaf::Swish(_) | Leaf::Permute(_) => Ok(ParamSet::new()),
        }
    }

    /// Names and shapes are expected to match `export_params`.
    pub fn import_params(self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        Ok(match self {
            Leaf::Convolution(l)      => Leaf::Convolution(l.import_params(params, device)?),
            Leaf::Lstm(l)             => Leaf::Lstm(l.import_params(params, device)?),
            Leaf::LinearCrfEncoder(l) => Leaf::LinearCrfEncoder(l.import_params(params, device)?),
            Leaf::Sha(l)              => Leaf::Sha(l.import_params(params, device)?),
            Leaf::Mha(l)              => Leaf::Mha(l.import_params(params, device)?),
            Leaf::ShaBlock(l)         => Leaf::ShaBlock(l.import_params(params, device)?),
            Leaf::FeedForward(l)      => Leaf::FeedForward(l.import_params(params, device)?),
            Leaf::Boom(l)             => Leaf::Boom(l.import_params(params, device)?),
            Leaf::LayerScale(l)       => Leaf::LayerScale(l.import_params(params, device)?),
            other                     => other,
        })
    }

    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        match self {
            Leaf::Convolution(l)      => l.visit_params(visitor),
            Leaf::Lstm(l)             => l.visit_params(visitor),
            Leaf::LinearCrfEncoder(l) => l.visit_params(visitor),
            Leaf::Sha(l)              => l.visit_params(visitor),
            Leaf::Mha(l)              => l.visit_params(visitor),
            Leaf::ShaBlock(l)         => l.visit_params(visitor),
            Leaf::FeedForward(l)      => l.visit_params(visitor),
            Leaf::Boom(l)             => l.visit_params(visitor),
            Leaf::LayerScale(l)       => l.visit_params(visitor),
            Leaf::Relu(_) | Leaf::Tanh(_) | Leaf::Swish(_) | Leaf::Permute(_) => {}
        }
    }
}

// ─── Layer ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Layer<B: Backend> {
    /// Forward (depth-first) order
    leaves: Vec<Leaf<B>>,
    tree:   Ignored<Node>,
}

impl<B: Backend> Layer<B> {
    pub fn leaf(leaf: Leaf<B>) -> Self {
        Self { leaves: vec![leaf], tree: Ignored(Node::Leaf(0)) }
    }

    pub fn serial(layers: Vec<Layer<B>>) -> Self {
        let (leaves, children) = Self::concat(layers);
        Self { leaves, tree: Ignored(Node::Serial(children)) }
    }

    /// Reverse declared with a list of children.
    pub fn reverse(layers: Vec<Layer<B>>) -> Self {
        let (leaves, children) = Self::concat(layers);
        Self { leaves, tree: Ignored(Node::Reverse { children, single: false }) }
    }

    /// Reverse declared with one nested child.
    pub fn reverse_single(layer: Layer<B>) -> Self {
        let Layer { leaves, tree } = layer;
        Self { leaves, tree: Ignored(Node::Reverse { children: vec![tree.0], single: true }) }
    }

    fn concat(layers: Vec<Layer<B>>) -> (Vec<Leaf<B>>, Vec<Node>) {
        let mut leaves   = Vec::new();
        let mut children = Vec::with_capacity(layers.len());
        for layer in layers {
            children.push(layer.tree.0.shifted(leaves.len()));
            leaves.extend(layer.leaves);
        }
        (leaves, children)
    }

    pub fn tree(&self) -> &Node {
        &self.tree.0
    }

    pub fn leaves(&self) -> &[Leaf<B>] {
        &self.leaves
    }

    pub fn kind(&self) -> LayerKind {
        match &self.tree.0 {
            Node::Leaf(i)         => self.leaves[*i].kind(),
            Node::Serial(_)       => LayerKind::Serial,
            Node::Reverse { .. }  => LayerKind::Reverse,
        }
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        self.run(&self.tree.0, x)
    }

    fn run(&self, node: &Node, x: Tensor<B, 3>) -> Tensor<B, 3> {
        match node {
            Node::Leaf(i) => self.leaves[*i].forward(x),
            Node::Serial(children) => children.iter().fold(x, |x, child| self.run(child, x)),
            Node::Reverse { children, .. } => children
                .iter()
                .fold(x.flip([0]), |x, child| self.run(child, x))
                .flip([0]),
        }
    }

    /// Channel count of the encoder output: the last leaf that
    /// sets one, since Reverse reorders time but not layers.
    pub fn output_width(&self) -> Option<usize> {
        self.leaves.iter().rev().find_map(Leaf::output_width)
    }

    /// The last CRF projection in forward order.
    pub fn crf_encoder(&self) -> Option<&LinearCrfEncoder<B>> {
        self.leaves.iter().rev().find_map(|leaf| match leaf {
            Leaf::LinearCrfEncoder(l) => Some(l),
            _ => None,
        })
    }

    /// Every parameter in the tree, canonical layout, keyed by
    /// dotted path. Children are keyed by their position.
    pub fn export_params(&self) -> ModelResult<ParamSet> {
        let scopes = self.tree.0.leaf_scopes(self.leaves.len());
        let mut params = ParamSet::new();
        for (leaf, scope) in self.leaves.iter().zip(&scopes) {
            params.extend_scoped(scope, leaf.export_params()?);
        }
        Ok(params)
    }

    /// Replace the tree's parameters. Names and shapes are
    /// expected to match `export_params` of this layer.
    pub fn import_params(self, params: &ParamSet, device: &B::Device) -> ModelResult<Self> {
        let scopes = self.tree.0.leaf_scopes(self.leaves.len());
        let parts  = params.partition(&scopes);
        let leaves = self
            .leaves
            .into_iter()
            .zip(&parts)
            .map(|(leaf, part)| leaf.import_params(part, device))
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Self { leaves, tree: self.tree })
    }

    /// Visit every learnable Param in export order.
    pub fn visit_params<V: ParamVisitor<B>>(&self, visitor: &mut V) {
        for leaf in &self.leaves {
            leaf.visit_params(visitor);
        }
    }
}

// ─── Linear helpers ───────────────────────────────────────────────────────────
// burn's Linear stores its weight as [in, out]; documents use [out, in].

pub(crate) fn export_linear<B: Backend>(linear: &Linear<B>) -> ModelResult<ParamSet> {
    let mut params = ParamSet::new();
    params.insert("W", ParamTensor::from_param(&linear.weight)?.transpose()?);
    params.insert(
        "b",
        match &linear.bias {
            Some(b) => ParamTensor::from_param(b)?,
            None    => ParamTensor::empty(),
        },
    );
    Ok(params)
}

pub(crate) fn import_linear<B: Backend>(
    mut linear: Linear<B>,
    params:     &ParamSet,
    device:     &B::Device,
) -> ModelResult<Linear<B>> {
    linear.weight = params.require("W")?.transpose()?.to_param(device)?;
    if linear.bias.is_some() {
        linear.bias = Some(params.require("b")?.to_param(device)?);
    }
    Ok(linear)
}

pub(crate) fn visit_linear<B: Backend, V: ParamVisitor<B>>(linear: &Linear<B>, visitor: &mut V) {
    visitor.visit(&linear.weight);
    if let Some(b) = &linear.bias {
        visitor.visit(b);
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::layers::{convolution::ConvolutionConfig, lstm::LstmConfig};
    use burn::{
        backend::{Autodiff, NdArray},
        module::AutodiffModule,
        tensor::Distribution,
    };

    type TestBackend = NdArray;

    fn nested<B: Backend>(device: &B::Device) -> Layer<B> {
        let conv = ConvolutionConfig::new(1, 4, 3).with_padding(1).init(device).unwrap();
        let lstm = LstmConfig::new(4, 4).init(device).unwrap();
        Layer::serial(vec![
            Layer::leaf(Leaf::Convolution(conv)),
            Layer::leaf(Leaf::Permute(permute::PermuteConfig::new([2, 0, 1]).init().unwrap())),
            Layer::reverse_single(Layer::serial(vec![
                Layer::leaf(Leaf::Lstm(lstm)),
                Layer::leaf(Leaf::Tanh(Tanh)),
            ])),
        ])
    }

    #[test]
    fn test_nested_paths_and_kinds() {
        let device = Default::default();
        let layer = nested::<TestBackend>(&device);
        assert_eq!(layer.kind(), LayerKind::Serial);
        assert_eq!(layer.leaves().len(), 4);
        assert_eq!(layer.output_width(), Some(4));

        let names: Vec<String> = layer.export_params().unwrap().names().map(String::from).collect();
        assert_eq!(names, vec!["0.W", "0.b", "2.0.iW", "2.0.sW", "2.0.b"]);
    }

    #[test]
    fn test_reverse_flips_time_around_children() {
        let device = Default::default();
        let lstm = LstmConfig::new(3, 2).init::<TestBackend>(&device).unwrap();
        let params = lstm.export_params().unwrap();
        let plain = Layer::leaf(Leaf::Lstm(lstm));
        let copy = LstmConfig::new(3, 2)
            .init::<TestBackend>(&device)
            .unwrap()
            .import_params(&params, &device)
            .unwrap();
        let reversed = Layer::reverse(vec![Layer::leaf(Leaf::Lstm(copy))]);

        let x = Tensor::<TestBackend, 3>::random([6, 1, 2], Distribution::Default, &device);
        let expected: Vec<f32> = plain.forward(x.clone().flip([0])).flip([0]).into_data().to_vec().unwrap();
        let actual: Vec<f32> = reversed.forward(x).into_data().to_vec().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_nested_layer_is_an_autodiff_module() {
        let device = Default::default();
        let layer = nested::<Autodiff<TestBackend>>(&device);
        let x = Tensor::<Autodiff<TestBackend>, 3>::ones([1, 1, 5], &device);
        assert_eq!(layer.forward(x).dims(), [5, 1, 4]);

        let record = layer.clone().into_record();
        let valid: Layer<TestBackend> = layer.valid();
        let restored = nested::<Autodiff<TestBackend>>(&device).load_record(record);
        assert_eq!(valid.export_params().unwrap(), restored.valid().export_params().unwrap());
        assert_eq!(restored.tree(), valid.tree());
    }
}
