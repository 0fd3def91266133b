// src/nn_model.rs
// Residual conv network over the board planes (feature `torch`)

use tch::nn::{self, Module, OptimizerConfig};
use tch::{Device, Kind, Tensor};

use crate::error::{Result, ShogiError};
use crate::game_env::{
    Observation, ACTION_SPACE_SIZE, BOARD_CHANNELS, BOARD_COLS, BOARD_ROWS, SCALAR_FEATURE_COUNT,
};
use crate::model::{Gradients, PolicyModel, PolicyOutput, TrainableModel};

const HIDDEN_CHANNELS: i64 = 64;
const RESIDUAL_BLOCKS: usize = 4;

// Standard residual block: channel count preserved
struct BasicBlock {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
}

impl BasicBlock {
    fn new(vs: &nn::Path, channels: i64) -> Self {
        let conv_cfg = nn::ConvConfig {
            padding: 1,
            ..Default::default()
        };
        Self {
            conv1: nn::conv2d(vs / "conv1", channels, channels, 3, conv_cfg),
            bn1: nn::batch_norm2d(vs / "bn1", channels, Default::default()),
            conv2: nn::conv2d(vs / "conv2", channels, channels, 3, conv_cfg),
            bn2: nn::batch_norm2d(vs / "bn2", channels, Default::default()),
        }
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let out = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .relu()
            .apply(&self.conv2)
            .apply_t(&self.bn2, train);
        (out + xs).relu()
    }
}

pub struct ShogiNet {
    conv_input: nn::Conv2D,
    bn_input: nn::BatchNorm,
    tower: Vec<BasicBlock>,
    fc1: nn::Linear,
    fc2: nn::Linear,
    policy_head: nn::Linear,
    value_head: nn::Linear,
}

impl ShogiNet {
    pub fn new(vs: &nn::Path) -> Self {
        let conv_cfg = nn::ConvConfig {
            padding: 1,
            ..Default::default()
        };
        // [B, 28, 9, 9] -> [B, 64, 9, 9]
        let conv_input = nn::conv2d(
            vs / "conv_input",
            BOARD_CHANNELS as i64,
            HIDDEN_CHANNELS,
            3,
            conv_cfg,
        );
        let bn_input = nn::batch_norm2d(vs / "bn_input", HIDDEN_CHANNELS, Default::default());
        let tower = (0..RESIDUAL_BLOCKS)
            .map(|i| BasicBlock::new(&(vs / format!("res{}", i + 1)), HIDDEN_CHANNELS))
            .collect();

        let flat_size = HIDDEN_CHANNELS * (BOARD_ROWS * BOARD_COLS) as i64;
        let fc_input = flat_size + SCALAR_FEATURE_COUNT as i64;
        let fc1 = nn::linear(vs / "fc1", fc_input, 512, Default::default());
        let fc2 = nn::linear(vs / "fc2", 512, 256, Default::default());
        let policy_head = nn::linear(vs / "policy", 256, ACTION_SPACE_SIZE as i64, Default::default());
        let value_head = nn::linear(vs / "value", 256, 1, Default::default());

        Self {
            conv_input,
            bn_input,
            tower,
            fc1,
            fc2,
            policy_head,
            value_head,
        }
    }

    fn forward_t(&self, board: &Tensor, scalars: &Tensor, train: bool) -> (Tensor, Tensor) {
        let mut x = board
            .apply(&self.conv_input)
            .apply_t(&self.bn_input, train)
            .relu();
        for block in &self.tower {
            x = block.forward_t(&x, train);
        }
        let x = x.flatten(1, -1);
        let combined = Tensor::cat(&[&x, scalars], 1);
        let shared = self.fc2.forward(&self.fc1.forward(&combined).relu()).relu();

        let policy_logits = shared.apply(&self.policy_head);
        let value = shared.apply(&self.value_head).tanh();
        (policy_logits, value)
    }

    /// Batch-norm in inference mode; used for both collection and PPO
    /// re-evaluation so the two see the same function.
    pub fn forward_inference(&self, board: &Tensor, scalars: &Tensor) -> (Tensor, Tensor) {
        self.forward_t(board, scalars, false)
    }
}

// ================ TorchPolicy ================

pub struct TorchPolicy {
    vs: nn::VarStore,
    net: ShogiNet,
    opt: nn::Optimizer,
    device: Device,
}

pub struct TorchGradients {
    grads: Vec<Tensor>,
}

impl Gradients for TorchGradients {
    fn global_norm(&self) -> f32 {
        let sq: f64 = self
            .grads
            .iter()
            .map(|g| g.pow_tensor_scalar(2).sum(Kind::Float).double_value(&[]))
            .sum();
        sq.sqrt() as f32
    }

    fn scale(&mut self, factor: f32) {
        for g in &mut self.grads {
            *g *= factor as f64;
        }
    }

    fn is_finite(&self) -> bool {
        self.grads
            .iter()
            .all(|g| g.isfinite().all().to_kind(Kind::Int64).int64_value(&[]) == 1)
    }
}

fn model_err(e: tch::TchError) -> ShogiError {
    ShogiError::Model(e.to_string())
}

impl TorchPolicy {
    pub fn new(device: Device, learning_rate: f64) -> Result<Self> {
        let vs = nn::VarStore::new(device);
        let net = ShogiNet::new(&vs.root());
        let opt = nn::Adam::default()
            .build(&vs, learning_rate)
            .map_err(model_err)?;
        Ok(Self {
            vs,
            net,
            opt,
            device,
        })
    }

    pub fn load(&mut self, path: &str) -> Result<()> {
        self.vs.load(path).map_err(model_err)
    }

    pub fn save(&self, path: &str) -> Result<()> {
        self.vs.save(path).map_err(model_err)
    }

    fn input_tensors(&self, observations: &[&Observation]) -> Result<(Tensor, Tensor)> {
        let n = observations.len();
        let mut board = Vec::with_capacity(n * BOARD_CHANNELS * BOARD_ROWS * BOARD_COLS);
        let mut scalars = Vec::with_capacity(n * SCALAR_FEATURE_COUNT);
        for obs in observations {
            let b = obs
                .board
                .as_slice()
                .ok_or_else(|| ShogiError::MalformedInput("non-contiguous board tensor".into()))?;
            let s = obs
                .scalars
                .as_slice()
                .ok_or_else(|| ShogiError::MalformedInput("non-contiguous scalar vector".into()))?;
            if b.len() != BOARD_CHANNELS * BOARD_ROWS * BOARD_COLS || s.len() != SCALAR_FEATURE_COUNT {
                return Err(ShogiError::MalformedInput("observation shape mismatch".into()));
            }
            board.extend_from_slice(b);
            scalars.extend_from_slice(s);
        }
        let board = Tensor::from_slice(&board)
            .view([
                n as i64,
                BOARD_CHANNELS as i64,
                BOARD_ROWS as i64,
                BOARD_COLS as i64,
            ])
            .to(self.device);
        let scalars = Tensor::from_slice(&scalars)
            .view([n as i64, SCALAR_FEATURE_COUNT as i64])
            .to(self.device);
        Ok((board, scalars))
    }
}

impl PolicyModel for TorchPolicy {
    fn evaluate(&self, observation: &Observation) -> Result<PolicyOutput> {
        let mut outputs = self.evaluate_batch(&[observation])?;
        outputs
            .pop()
            .ok_or_else(|| ShogiError::Model("empty batch output".into()))
    }

    fn evaluate_batch(&self, observations: &[&Observation]) -> Result<Vec<PolicyOutput>> {
        let n = observations.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let (board, scalars) = self.input_tensors(observations)?;
        let (logits, values) = tch::no_grad(|| self.net.forward_inference(&board, &scalars));

        let mut logits_flat = vec![0.0f32; n * ACTION_SPACE_SIZE];
        let len = logits_flat.len();
        logits.to_device(Device::Cpu).copy_data(&mut logits_flat, len);
        let mut value_flat = vec![0.0f32; n];
        values
            .to_device(Device::Cpu)
            .view([n as i64])
            .copy_data(&mut value_flat, n);

        Ok(logits_flat
            .chunks(ACTION_SPACE_SIZE)
            .zip(value_flat)
            .map(|(chunk, value)| PolicyOutput {
                logits: chunk.to_vec(),
                value,
            })
            .collect())
    }
}

impl TrainableModel for TorchPolicy {
    type Grads = TorchGradients;

    fn compute_gradients(
        &self,
        observations: &[&Observation],
        logit_grads: &[Vec<f32>],
        value_grads: &[f32],
    ) -> Result<TorchGradients> {
        let n = observations.len();
        if logit_grads.len() != n || value_grads.len() != n {
            return Err(ShogiError::Model("gradient batch size mismatch".into()));
        }
        let (board, scalars) = self.input_tensors(observations)?;
        let flat: Vec<f32> = logit_grads.iter().flatten().copied().collect();
        if flat.len() != n * ACTION_SPACE_SIZE {
            return Err(ShogiError::Model("logit gradient length mismatch".into()));
        }
        let g_logits = Tensor::from_slice(&flat)
            .view([n as i64, ACTION_SPACE_SIZE as i64])
            .to(self.device);
        let g_values = Tensor::from_slice(value_grads)
            .view([n as i64, 1])
            .to(self.device);

        for var in self.vs.trainable_variables() {
            let mut grad = var.grad();
            if grad.defined() {
                let _ = grad.zero_();
            }
        }
        let (logits, values) = self.net.forward_inference(&board, &scalars);
        // d/dθ of this surrogate equals the chain rule through the given output gradients
        let surrogate = (logits * &g_logits).sum(Kind::Float) + (values * &g_values).sum(Kind::Float);
        surrogate.backward();

        let grads = self
            .vs
            .trainable_variables()
            .iter()
            .map(|var| {
                let g = var.grad();
                if g.defined() {
                    g.detach().copy()
                } else {
                    var.zeros_like()
                }
            })
            .collect();
        Ok(TorchGradients { grads })
    }

    fn apply_gradients(&mut self, grads: &TorchGradients) -> Result<()> {
        let vars = self.vs.trainable_variables();
        if vars.len() != grads.grads.len() {
            return Err(ShogiError::Model("gradient count does not match the variables".into()));
        }
        tch::no_grad(|| {
            for (var, g) in vars.iter().zip(&grads.grads) {
                let mut slot = var.grad();
                if slot.defined() {
                    slot.copy_(g);
                }
            }
        });
        self.opt.step();
        self.opt.zero_grad();
        Ok(())
    }
}
