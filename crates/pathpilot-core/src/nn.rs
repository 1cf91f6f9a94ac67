use crate::features::FEATURE_COUNT;
use crate::matrix::Matrix;
use crate::optim::Gradients;
use rand::Rng;
use std::{error::Error, fmt};

/// Multi-layer perceptron: a sequence of dense layers.
///
/// Standard topology: 130 features → 256 → 128 → 64 → 32 → 16 (ReLU) → 2 (linear).
/// Outputs: `[move_x, use_energy]` before discretization.
pub const STANDARD_HIDDEN: [usize; 5] = [256, 128, 64, 32, 16];
pub const OUTPUT_SIZE: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Activation {
    Relu,
    Linear,
}

impl Activation {
    #[inline]
    pub fn apply(self, z: f32) -> f32 {
        match self {
            Activation::Relu => z.max(0.0),
            Activation::Linear => z,
        }
    }

    /// Derivative at pre-activation `z`. ReLU uses `z > 0`.
    #[inline]
    pub fn derivative(self, z: f32) -> f32 {
        match self {
            Activation::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Linear => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// Topology needs an input and at least one layer, all widths non-zero.
    InvalidTopology(Vec<usize>),
    InputLength { expected: usize, actual: usize },
    TargetLength { expected: usize, actual: usize },
    LayerMismatch { layer: usize, expected: usize, actual: usize },
    NonFinite,
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::InvalidTopology(sizes) => {
                write!(f, "invalid topology {sizes:?}: need >= 2 non-zero widths")
            }
            NetworkError::InputLength { expected, actual } => {
                write!(f, "network expects {expected} inputs, got {actual}")
            }
            NetworkError::TargetLength { expected, actual } => {
                write!(f, "network produces {expected} outputs, target has {actual}")
            }
            NetworkError::LayerMismatch {
                layer,
                expected,
                actual,
            } => write!(
                f,
                "layer {layer} takes {actual} inputs but previous layer outputs {expected}"
            ),
            NetworkError::NonFinite => write!(f, "network produced a non-finite value"),
        }
    }
}

impl Error for NetworkError {}

/// Layer widths from input to output. Hidden layers use ReLU, the last is linear.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    sizes: Vec<usize>,
}

impl Topology {
    pub fn new(sizes: Vec<usize>) -> Result<Self, NetworkError> {
        if sizes.len() < 2 || sizes.contains(&0) {
            return Err(NetworkError::InvalidTopology(sizes));
        }
        Ok(Self { sizes })
    }

    pub fn standard() -> Self {
        let mut sizes = Vec::with_capacity(STANDARD_HIDDEN.len() + 2);
        sizes.push(FEATURE_COUNT);
        sizes.extend_from_slice(&STANDARD_HIDDEN);
        sizes.push(OUTPUT_SIZE);
        Self { sizes }
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn input_dim(&self) -> usize {
        self.sizes[0]
    }

    pub fn output_dim(&self) -> usize {
        self.sizes[self.sizes.len() - 1]
    }

    pub fn layer_count(&self) -> usize {
        self.sizes.len() - 1
    }

    /// `(inputs, outputs)` of each layer.
    pub fn layer_shapes(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sizes.windows(2).map(|w| (w[0], w[1]))
    }

    pub fn activation(&self, layer: usize) -> Activation {
        if layer + 1 == self.layer_count() {
            Activation::Linear
        } else {
            Activation::Relu
        }
    }

    pub fn parameter_count(&self) -> usize {
        self.layer_shapes().map(|(i, o)| i * o + o).sum()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.sizes.iter().map(usize::to_string).collect();
        write!(f, "{}", parts.join("→"))
    }
}

/// One step of a feedforward stack.
pub trait Layer {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;

    /// Writes the pre-activation into `z` and the activation into `a`.
    fn forward_into(&self, x: &[f32], z: &mut Vec<f32>, a: &mut Vec<f32>);

    /// Given `delta` (dL/dz of this layer) and its input `x`, accumulate parameter
    /// gradients and write dL/dx into `dx`.
    fn backward(
        &self,
        x: &[f32],
        delta: &[f32],
        weight_grad: &mut Matrix,
        bias_grad: &mut [f32],
        dx: &mut Vec<f32>,
    );
}

#[derive(Clone, Debug, PartialEq)]
pub struct Dense {
    /// `input_dim × output_dim`, element `(j, i)` connects input j to output i.
    pub weights: Matrix,
    pub bias: Vec<f32>,
    pub activation: Activation,
}

impl Dense {
    pub fn zeros(inputs: usize, outputs: usize, activation: Activation) -> Self {
        Self {
            weights: Matrix::zeros(inputs, outputs),
            bias: vec![0.0; outputs],
            activation,
        }
    }

    /// Xavier-uniform weights in `±sqrt(6 / (in + out))`, zero bias.
    pub fn xavier<R: Rng + ?Sized>(
        inputs: usize,
        outputs: usize,
        activation: Activation,
        rng: &mut R,
    ) -> Self {
        let limit = (6.0 / (inputs + outputs) as f32).sqrt();
        Self {
            weights: Matrix::from_fn(inputs, outputs, |_, _| rng.random_range(-limit..limit)),
            bias: vec![0.0; outputs],
            activation,
        }
    }
}

impl Layer for Dense {
    fn input_dim(&self) -> usize {
        self.weights.rows()
    }

    fn output_dim(&self) -> usize {
        self.weights.cols()
    }

    fn forward_into(&self, x: &[f32], z: &mut Vec<f32>, a: &mut Vec<f32>) {
        self.weights.vec_mul_add(x, &self.bias, z);
        a.clear();
        a.extend(z.iter().map(|&v| self.activation.apply(v)));
    }

    fn backward(
        &self,
        x: &[f32],
        delta: &[f32],
        weight_grad: &mut Matrix,
        bias_grad: &mut [f32],
        dx: &mut Vec<f32>,
    ) {
        weight_grad.add_outer(x, delta);
        for (b, d) in bias_grad.iter_mut().zip(delta) {
            *b += d;
        }
        self.weights.mul_vec(delta, dx);
    }
}

/// Per-layer values kept from a forward pass for backpropagation.
#[derive(Clone, Debug, Default)]
pub struct ForwardTrace {
    /// `activations[0]` is the input, `activations[k + 1]` the output of layer k.
    pub activations: Vec<Vec<f32>>,
    /// Pre-activations of each layer.
    pub pre_activations: Vec<Vec<f32>>,
}

impl ForwardTrace {
    pub fn output(&self) -> &[f32] {
        self.activations.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Network {
    topology: Topology,
    layers: Vec<Dense>,
}

impl Network {
    pub fn zeros(topology: Topology) -> Self {
        let layers = topology
            .layer_shapes()
            .enumerate()
            .map(|(k, (i, o))| Dense::zeros(i, o, topology.activation(k)))
            .collect();
        Self { topology, layers }
    }

    pub fn xavier<R: Rng + ?Sized>(topology: Topology, rng: &mut R) -> Self {
        let layers = topology
            .layer_shapes()
            .enumerate()
            .map(|(k, (i, o))| Dense::xavier(i, o, topology.activation(k), rng))
            .collect();
        Self { topology, layers }
    }

    /// Assemble from explicit layers, checking that widths chain.
    pub fn from_layers(layers: Vec<Dense>) -> Result<Self, NetworkError> {
        let Some(first) = layers.first() else {
            return Err(NetworkError::InvalidTopology(Vec::new()));
        };
        let mut sizes = vec![first.input_dim()];
        for (k, layer) in layers.iter().enumerate() {
            let prev = sizes[sizes.len() - 1];
            if layer.input_dim() != prev || layer.bias.len() != layer.output_dim() {
                return Err(NetworkError::LayerMismatch {
                    layer: k,
                    expected: prev,
                    actual: layer.input_dim(),
                });
            }
            sizes.push(layer.output_dim());
        }
        let topology = Topology::new(sizes)?;
        Ok(Self { topology, layers })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn layers(&self) -> &[Dense] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [Dense] {
        &mut self.layers
    }

    pub fn input_dim(&self) -> usize {
        self.topology.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.topology.output_dim()
    }

    pub fn parameter_count(&self) -> usize {
        self.topology.parameter_count()
    }

    /// Plain inference.
    pub fn forward(&self, input: &[f32]) -> Result<Vec<f32>, NetworkError> {
        self.check_input(input)?;
        let mut x = input.to_vec();
        let mut z = Vec::new();
        let mut a = Vec::new();
        for layer in &self.layers {
            layer.forward_into(&x, &mut z, &mut a);
            std::mem::swap(&mut x, &mut a);
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(NetworkError::NonFinite);
        }
        Ok(x)
    }

    /// Forward pass that keeps every layer's values for [`Network::backward`].
    pub fn forward_trace(&self, input: &[f32]) -> Result<ForwardTrace, NetworkError> {
        self.check_input(input)?;
        let mut trace = ForwardTrace {
            activations: Vec::with_capacity(self.layers.len() + 1),
            pre_activations: Vec::with_capacity(self.layers.len()),
        };
        trace.activations.push(input.to_vec());
        for (k, layer) in self.layers.iter().enumerate() {
            let mut z = Vec::with_capacity(layer.output_dim());
            let mut a = Vec::with_capacity(layer.output_dim());
            layer.forward_into(&trace.activations[k], &mut z, &mut a);
            trace.pre_activations.push(z);
            trace.activations.push(a);
        }
        Ok(trace)
    }

    /// Backpropagate `output_grad` (dL/d output) through a trace, accumulating
    /// into `grads`.
    pub fn backward(&self, trace: &ForwardTrace, output_grad: &[f32], grads: &mut Gradients) {
        let mut delta: Vec<f32> = output_grad.to_vec();
        let mut dx = Vec::new();
        for k in (0..self.layers.len()).rev() {
            let layer = &self.layers[k];
            for (d, &z) in delta.iter_mut().zip(&trace.pre_activations[k]) {
                *d *= layer.activation.derivative(z);
            }
            let (wg, bg) = grads.layer_mut(k);
            layer.backward(&trace.activations[k], &delta, wg, bg, &mut dx);
            std::mem::swap(&mut delta, &mut dx);
        }
    }

    /// MSE of one sample, averaged over outputs, with its gradient accumulated
    /// into `grads`. Output delta is `2 (pred − target) / output_dim`.
    pub fn accumulate_mse(
        &self,
        input: &[f32],
        target: &[f32],
        grads: &mut Gradients,
    ) -> Result<f32, NetworkError> {
        let trace = self.forward_trace(input)?;
        let (loss, delta) = mse_delta(trace.output(), target)?;
        self.backward(&trace, &delta, grads);
        Ok(loss)
    }

    /// MSE of one sample without touching gradients.
    pub fn mse(&self, input: &[f32], target: &[f32]) -> Result<f32, NetworkError> {
        let out = self.forward(input)?;
        mse_delta(&out, target).map(|(loss, _)| loss)
    }

    fn check_input(&self, input: &[f32]) -> Result<(), NetworkError> {
        if input.len() != self.input_dim() {
            return Err(NetworkError::InputLength {
                expected: self.input_dim(),
                actual: input.len(),
            });
        }
        Ok(())
    }
}

fn mse_delta(pred: &[f32], target: &[f32]) -> Result<(f32, Vec<f32>), NetworkError> {
    if pred.len() != target.len() {
        return Err(NetworkError::TargetLength {
            expected: pred.len(),
            actual: target.len(),
        });
    }
    let n = pred.len() as f32;
    let mut loss = 0.0;
    let delta = pred
        .iter()
        .zip(target)
        .map(|(p, t)| {
            let e = p - t;
            loss += e * e;
            2.0 * e / n
        })
        .collect();
    Ok((loss / n, delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha12Rng;

    #[test]
    fn standard_topology_shape() {
        let t = Topology::standard();
        assert_eq!(t.sizes(), &[130, 256, 128, 64, 32, 16, 2]);
        assert_eq!(t.layer_count(), 6);
        assert_eq!(t.activation(0), Activation::Relu);
        assert_eq!(t.activation(4), Activation::Relu);
        assert_eq!(t.activation(5), Activation::Linear);
        assert_eq!(
            t.parameter_count(),
            130 * 256 + 256 + 256 * 128 + 128 + 128 * 64 + 64 + 64 * 32 + 32 + 32 * 16 + 16 + 16 * 2 + 2
        );
    }

    #[test]
    fn xavier_respects_limit_and_zero_bias() {
        let mut rng = ChaCha12Rng::seed_from_u64(1);
        let net = Network::xavier(Topology::standard(), &mut rng);
        for layer in net.layers() {
            let limit = (6.0 / (layer.input_dim() + layer.output_dim()) as f32).sqrt();
            assert!(layer.weights.as_slice().iter().all(|w| w.abs() <= limit));
            assert!(layer.bias.iter().all(|&b| b == 0.0));
        }
    }

    #[test]
    fn forward_is_deterministic_and_finite() {
        let mut rng = ChaCha12Rng::seed_from_u64(2);
        let net = Network::xavier(Topology::standard(), &mut rng);
        let input: Vec<f32> = (0..130).map(|i| (i as f32 / 130.0) - 0.5).collect();
        let a = net.forward(&input).unwrap();
        let b = net.forward(&input).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(net.forward_trace(&input).unwrap().output(), a.as_slice());
    }

    #[test]
    fn wrong_input_length_is_an_error() {
        let net = Network::zeros(Topology::standard());
        assert_eq!(
            net.forward(&[0.0; 129]),
            Err(NetworkError::InputLength {
                expected: 130,
                actual: 129
            })
        );
    }

    #[test]
    fn hand_computed_forward() {
        // 2 → 2 (ReLU) → 1 (linear)
        let hidden = Dense {
            weights: Matrix::from_vec(2, 2, vec![1.0, -1.0, 2.0, 1.0]).unwrap(),
            bias: vec![0.0, 0.5],
            activation: Activation::Relu,
        };
        let out = Dense {
            weights: Matrix::from_vec(2, 1, vec![1.0, 3.0]).unwrap(),
            bias: vec![-1.0],
            activation: Activation::Linear,
        };
        let net = Network::from_layers(vec![hidden, out]).unwrap();
        // z1 = [1*1 + 2*1, -1*1 + 1*1 + 0.5] = [3, 0.5]
        let y = net.forward(&[1.0, 1.0]).unwrap();
        assert!((y[0] - (3.0 + 1.5 - 1.0)).abs() < 1e-6);
        // z1 = [-1 - 2, 1 - 1 + 0.5] → relu [0, 0.5]
        let y = net.forward(&[-1.0, -1.0]).unwrap();
        assert!((y[0] - (1.5 - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn mismatched_layers_are_rejected() {
        let a = Dense::zeros(3, 4, Activation::Relu);
        let b = Dense::zeros(5, 1, Activation::Linear);
        assert!(matches!(
            Network::from_layers(vec![a, b]),
            Err(NetworkError::LayerMismatch { layer: 1, .. })
        ));
        assert!(Topology::new(vec![3]).is_err());
        assert!(Topology::new(vec![3, 0, 1]).is_err());
    }
}
