//! MobileNetV3-Small, laid out so that variable names line up with the
//! torchvision `state_dict` (`features.{i}...`, `classifier.{0,3}...`).
//!
//! Only the final linear layer depends on the checkpoint: it is sized to the
//! number of classes before any weights are copied in.

use tch::nn::{self, ModuleT};
use tch::Tensor;

const BN_EPS: f64 = 0.001;
const BN_MOMENTUM: f64 = 0.01;
const LAST_CHANNEL: i64 = 1024;
const CLASSIFIER_DROPOUT: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activation {
    Relu,
    Hardswish,
}

struct BlockConfig {
    input: i64,
    kernel: i64,
    expanded: i64,
    output: i64,
    use_se: bool,
    activation: Activation,
    stride: i64,
}

const fn block(
    input: i64,
    kernel: i64,
    expanded: i64,
    output: i64,
    use_se: bool,
    activation: Activation,
    stride: i64,
) -> BlockConfig {
    BlockConfig {
        input,
        kernel,
        expanded,
        output,
        use_se,
        activation,
        stride,
    }
}

const SMALL_BLOCKS: [BlockConfig; 11] = [
    block(16, 3, 16, 16, true, Activation::Relu, 2),
    block(16, 3, 72, 24, false, Activation::Relu, 2),
    block(24, 3, 88, 24, false, Activation::Relu, 1),
    block(24, 5, 96, 40, true, Activation::Hardswish, 2),
    block(40, 5, 240, 40, true, Activation::Hardswish, 1),
    block(40, 5, 240, 40, true, Activation::Hardswish, 1),
    block(40, 5, 120, 48, true, Activation::Hardswish, 1),
    block(48, 5, 144, 48, true, Activation::Hardswish, 1),
    block(48, 5, 288, 96, true, Activation::Hardswish, 2),
    block(96, 5, 576, 96, true, Activation::Hardswish, 1),
    block(96, 5, 576, 96, true, Activation::Hardswish, 1),
];

/// Rounds a channel count to the nearest multiple of `divisor`, never going
/// below 90% of the requested value.
fn make_divisible(value: i64, divisor: i64) -> i64 {
    let v = value as f64;
    let d = divisor as f64;
    let mut rounded = (((v + d / 2.0) as i64) / divisor * divisor).max(divisor);
    if (rounded as f64) < 0.9 * v {
        rounded += divisor;
    }
    rounded
}

#[derive(Debug)]
struct ConvBnAct {
    conv: nn::Conv2D,
    bn: nn::BatchNorm,
    activation: Option<Activation>,
}

fn conv_bn_act(
    p: nn::Path,
    c_in: i64,
    c_out: i64,
    kernel: i64,
    stride: i64,
    groups: i64,
    activation: Option<Activation>,
) -> ConvBnAct {
    let conv_config = nn::ConvConfig {
        stride,
        padding: (kernel - 1) / 2,
        groups,
        bias: false,
        ..Default::default()
    };
    let bn_config = nn::BatchNormConfig {
        eps: BN_EPS,
        momentum: BN_MOMENTUM,
        ..Default::default()
    };
    ConvBnAct {
        conv: nn::conv2d(&p / 0, c_in, c_out, kernel, conv_config),
        bn: nn::batch_norm2d(&p / 1, c_out, bn_config),
        activation,
    }
}

impl ModuleT for ConvBnAct {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let ys = xs.apply(&self.conv).apply_t(&self.bn, train);
        match self.activation {
            Some(Activation::Relu) => ys.relu(),
            Some(Activation::Hardswish) => ys.hardswish(),
            None => ys,
        }
    }
}

#[derive(Debug)]
struct SqueezeExcitation {
    fc1: nn::Conv2D,
    fc2: nn::Conv2D,
}

impl SqueezeExcitation {
    fn new(p: nn::Path, channels: i64, squeezed: i64) -> Self {
        Self {
            fc1: nn::conv2d(&p / "fc1", channels, squeezed, 1, Default::default()),
            fc2: nn::conv2d(&p / "fc2", squeezed, channels, 1, Default::default()),
        }
    }
}

impl ModuleT for SqueezeExcitation {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        let scale = xs
            .adaptive_avg_pool2d([1, 1])
            .apply(&self.fc1)
            .relu()
            .apply(&self.fc2)
            .hardsigmoid();
        xs * scale
    }
}

#[derive(Debug)]
enum BlockLayer {
    Conv(ConvBnAct),
    Se(SqueezeExcitation),
}

#[derive(Debug)]
struct InvertedResidual {
    layers: Vec<BlockLayer>,
    use_residual: bool,
}

impl InvertedResidual {
    fn new(p: nn::Path, cfg: &BlockConfig) -> Self {
        let block = &p / "block";
        let mut layers = Vec::with_capacity(4);
        let act = Some(cfg.activation);

        if cfg.expanded != cfg.input {
            let idx = layers.len();
            layers.push(BlockLayer::Conv(conv_bn_act(
                &block / idx,
                cfg.input,
                cfg.expanded,
                1,
                1,
                1,
                act,
            )));
        }

        let idx = layers.len();
        layers.push(BlockLayer::Conv(conv_bn_act(
            &block / idx,
            cfg.expanded,
            cfg.expanded,
            cfg.kernel,
            cfg.stride,
            cfg.expanded,
            act,
        )));

        if cfg.use_se {
            let idx = layers.len();
            let squeezed = make_divisible(cfg.expanded / 4, 8);
            layers.push(BlockLayer::Se(SqueezeExcitation::new(
                &block / idx,
                cfg.expanded,
                squeezed,
            )));
        }

        let idx = layers.len();
        layers.push(BlockLayer::Conv(conv_bn_act(
            &block / idx,
            cfg.expanded,
            cfg.output,
            1,
            1,
            1,
            None,
        )));

        Self {
            layers,
            use_residual: cfg.stride == 1 && cfg.input == cfg.output,
        }
    }
}

impl ModuleT for InvertedResidual {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut ys = xs.shallow_clone();
        for layer in &self.layers {
            ys = match layer {
                BlockLayer::Conv(conv) => conv.forward_t(&ys, train),
                BlockLayer::Se(se) => se.forward_t(&ys, train),
            };
        }
        if self.use_residual { ys + xs } else { ys }
    }
}

/// The classification backbone. Input is `[N, 3, 224, 224]`, output is
/// `[N, num_classes]` logits.
#[derive(Debug)]
pub struct MobileNetV3Small {
    stem: ConvBnAct,
    blocks: Vec<InvertedResidual>,
    head: ConvBnAct,
    fc1: nn::Linear,
    fc2: nn::Linear,
}

impl MobileNetV3Small {
    pub fn new(p: &nn::Path, num_classes: i64) -> Self {
        let features = p / "features";
        let classifier = p / "classifier";

        let stem = conv_bn_act(&features / 0, 3, 16, 3, 2, 1, Some(Activation::Hardswish));
        let blocks = SMALL_BLOCKS
            .iter()
            .enumerate()
            .map(|(i, cfg)| InvertedResidual::new(&features / (i + 1), cfg))
            .collect::<Vec<_>>();

        let last_input = SMALL_BLOCKS[SMALL_BLOCKS.len() - 1].output;
        let last_output = 6 * last_input;
        let head = conv_bn_act(
            &features / (SMALL_BLOCKS.len() + 1),
            last_input,
            last_output,
            1,
            1,
            1,
            Some(Activation::Hardswish),
        );

        Self {
            stem,
            blocks,
            head,
            fc1: nn::linear(&classifier / 0, last_output, LAST_CHANNEL, Default::default()),
            fc2: nn::linear(&classifier / 3, LAST_CHANNEL, num_classes, Default::default()),
        }
    }
}

impl ModuleT for MobileNetV3Small {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let mut ys = self.stem.forward_t(xs, train);
        for block in &self.blocks {
            ys = block.forward_t(&ys, train);
        }
        self.head
            .forward_t(&ys, train)
            .adaptive_avg_pool2d([1, 1])
            .flatten(1, -1)
            .apply(&self.fc1)
            .hardswish()
            .dropout(CLASSIFIER_DROPOUT, train)
            .apply(&self.fc2)
    }
}
