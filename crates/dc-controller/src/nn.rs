//! A stacked recurrent policy network with manual backpropagation through
//! time and the Adam optimizer.
//!
//! Every decode step feeds `metafeatures ⊕ embedding(previous action)` through
//! `n_layers` Elman cells and a linear output layer with one logit per
//! action. Each cell's hidden state is carried to the next step. A step
//! returns a [`StepTrace`]. [`RecurrentPolicy::backward_sequence`] replays the
//! traces of one decode in reverse to accumulate gradients, so traces can be
//! buffered across decodes and backpropagated later.

use ndarray::{s, Array1, Array2, ArrayD, ArrayViewD, ArrayViewMutD, Axis, Zip};
use rand::Rng;

pub type Vector = Array1<f64>;

/// Hidden state of every layer, bottom first.
pub type Hidden = Vec<Vector>;

fn uniform<R: Rng + ?Sized>(shape: (usize, usize), bound: f64, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn(shape, || rng.gen_range(-bound..=bound))
}

fn outer(a: &Vector, b: &Vector) -> Array2<f64> {
    a.view().insert_axis(Axis(1)).dot(&b.view().insert_axis(Axis(0)))
}

/// Fully connected layer, weights `n_out x n_in`.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    pub weights: Array2<f64>,
    pub bias: Vector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseGrad {
    pub weights: Array2<f64>,
    pub bias: Vector,
}

impl Dense {
    /// Uniform init in `±1/sqrt(n_in)`.
    pub fn new<R: Rng + ?Sized>(n_in: usize, n_out: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (n_in.max(1) as f64).sqrt();
        let weights = uniform((n_out, n_in), bound, rng);
        let bias = Vector::from_shape_simple_fn(n_out, || rng.gen_range(-bound..=bound));
        Self { weights, bias }
    }

    fn zero_grad(&self) -> DenseGrad {
        DenseGrad {
            weights: Array2::zeros(self.weights.raw_dim()),
            bias: Vector::zeros(self.bias.len()),
        }
    }

    pub fn forward(&self, x: &Vector) -> Vector {
        self.weights.dot(x) + &self.bias
    }

    /// Accumulates parameter gradients into `grad` and returns `dL/dx`.
    fn backward(&self, x: &Vector, dy: &Vector, grad: &mut DenseGrad) -> Vector {
        grad.bias += dy;
        grad.weights += &outer(dy, x);
        self.weights.t().dot(dy)
    }
}

/// Elman cell: `h = tanh(W_x · x + W_h · h_prev + b)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Elman {
    pub input: Array2<f64>,
    pub recurrent: Array2<f64>,
    pub bias: Vector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ElmanGrad {
    pub input: Array2<f64>,
    pub recurrent: Array2<f64>,
    pub bias: Vector,
}

impl Elman {
    pub fn new<R: Rng + ?Sized>(n_in: usize, hidden_size: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (hidden_size.max(1) as f64).sqrt();
        let input = uniform((hidden_size, n_in), bound, rng);
        let recurrent = uniform((hidden_size, hidden_size), bound, rng);
        let bias = Vector::from_shape_simple_fn(hidden_size, || rng.gen_range(-bound..=bound));
        Self {
            input,
            recurrent,
            bias,
        }
    }

    fn zero_grad(&self) -> ElmanGrad {
        ElmanGrad {
            input: Array2::zeros(self.input.raw_dim()),
            recurrent: Array2::zeros(self.recurrent.raw_dim()),
            bias: Vector::zeros(self.bias.len()),
        }
    }

    pub fn forward(&self, x: &Vector, h_prev: &Vector) -> Vector {
        (self.input.dot(x) + self.recurrent.dot(h_prev) + &self.bias).mapv_into(f64::tanh)
    }

    /// Returns `(dL/dx, dL/dh_prev)` given `dL/dh` for the output `h`.
    fn backward(
        &self,
        x: &Vector,
        h_prev: &Vector,
        h: &Vector,
        dh: &Vector,
        grad: &mut ElmanGrad,
    ) -> (Vector, Vector) {
        let dz = dh * &h.mapv(|a| 1.0 - a * a);
        grad.input += &outer(&dz, x);
        grad.recurrent += &outer(&dz, h_prev);
        grad.bias += &dz;
        (self.input.t().dot(&dz), self.recurrent.t().dot(&dz))
    }
}

/// Activations of one decode step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepTrace {
    action: usize,
    /// Input of every layer.
    inputs: Vec<Vector>,
    /// Hidden state each layer started the step with.
    previous: Hidden,
    /// tanh outputs before dropout, carried to the next step.
    hidden: Hidden,
    /// Inverted dropout scales: 0 or `1 / (1 - p)`.
    masks: Vec<Vector>,
    output_input: Vector,
}

impl StepTrace {
    /// The action fed to the network at this step.
    pub fn previous_action(&self) -> usize {
        self.action
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicyGrad {
    pub embedding: Array2<f64>,
    pub layers: Vec<ElmanGrad>,
    pub output: DenseGrad,
}

impl PolicyGrad {
    fn tensors(&self) -> Vec<ArrayViewD<'_, f64>> {
        let mut out = vec![self.embedding.view().into_dyn()];
        for g in &self.layers {
            out.push(g.input.view().into_dyn());
            out.push(g.recurrent.view().into_dyn());
            out.push(g.bias.view().into_dyn());
        }
        out.push(self.output.weights.view().into_dyn());
        out.push(self.output.bias.view().into_dyn());
        out
    }

    pub fn norm(&self) -> f64 {
        self.tensors()
            .iter()
            .map(|t| t.iter().map(|g| g * g).sum::<f64>())
            .sum::<f64>()
            .sqrt()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecurrentPolicy {
    n_metafeatures: usize,
    hidden_size: usize,
    /// `n_actions x embedding_size`.
    embedding: Array2<f64>,
    layers: Vec<Elman>,
    output: Dense,
    dropout_rate: f64,
}

impl RecurrentPolicy {
    pub fn new<R: Rng + ?Sized>(
        n_metafeatures: usize,
        embedding_size: usize,
        hidden_size: usize,
        n_layers: usize,
        n_actions: usize,
        dropout_rate: f64,
        rng: &mut R,
    ) -> Self {
        let embedding = uniform((n_actions, embedding_size), 1.0, rng);
        let mut layers = Vec::with_capacity(n_layers);
        let mut width = n_metafeatures + embedding_size;
        for _ in 0..n_layers {
            layers.push(Elman::new(width, hidden_size, rng));
            width = hidden_size;
        }
        Self {
            n_metafeatures,
            hidden_size,
            embedding,
            layers,
            output: Dense::new(width, n_actions, rng),
            dropout_rate,
        }
    }

    pub fn n_actions(&self) -> usize {
        self.embedding.nrows()
    }

    pub fn n_metafeatures(&self) -> usize {
        self.n_metafeatures
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Zero state a decode starts from.
    pub fn initial_hidden(&self) -> Hidden {
        vec![Vector::zeros(self.hidden_size); self.layers.len()]
    }

    pub fn zero_grad(&self) -> PolicyGrad {
        PolicyGrad {
            embedding: Array2::zeros(self.embedding.raw_dim()),
            layers: self.layers.iter().map(Elman::zero_grad).collect(),
            output: self.output.zero_grad(),
        }
    }

    /// Logits for the next action and the hidden state after this step.
    /// `hidden` comes from [`initial_hidden`](Self::initial_hidden) or the
    /// previous step. Dropout is applied between layers only when `train`.
    pub fn forward_step<R: Rng + ?Sized>(
        &self,
        hidden: &[Vector],
        metafeatures: &[f64],
        previous_action: usize,
        train: bool,
        rng: &mut R,
    ) -> (Vector, StepTrace, Hidden) {
        let mut x: Vector = metafeatures
            .iter()
            .copied()
            .chain(self.embedding.row(previous_action).iter().copied())
            .collect();

        let keep = 1.0 - self.dropout_rate;
        let n_layers = self.layers.len();
        let mut trace = StepTrace {
            action: previous_action,
            inputs: Vec::with_capacity(n_layers),
            previous: hidden.to_vec(),
            hidden: Vec::with_capacity(n_layers),
            masks: Vec::with_capacity(n_layers),
            output_input: Vector::zeros(0),
        };
        for (layer, h_prev) in self.layers.iter().zip(hidden) {
            let h = layer.forward(&x, h_prev);
            let mask = if train && self.dropout_rate > 0.0 {
                Vector::from_shape_simple_fn(h.len(), || if rng.gen_bool(keep) { 1.0 / keep } else { 0.0 })
            } else {
                Vector::ones(h.len())
            };
            let next = &h * &mask;
            trace.inputs.push(std::mem::replace(&mut x, next));
            trace.hidden.push(h);
            trace.masks.push(mask);
        }
        let logits = self.output.forward(&x);
        trace.output_input = x;
        let next_hidden = trace.hidden.clone();
        (logits, trace, next_hidden)
    }

    /// Backpropagation through time over the steps of one decode, in the
    /// order they were taken, each with its `dL/dlogits`. Accumulates into
    /// `grad`.
    pub fn backward_sequence(&self, steps: &[(&StepTrace, Vector)], grad: &mut PolicyGrad) {
        let mut dh_next: Hidden = self.initial_hidden();
        for (trace, dlogits) in steps.iter().rev() {
            let mut dx = self.output.backward(&trace.output_input, dlogits, &mut grad.output);
            for l in (0..self.layers.len()).rev() {
                let dh = dx * &trace.masks[l] + &dh_next[l];
                let (d_input, d_previous) = self.layers[l].backward(
                    &trace.inputs[l],
                    &trace.previous[l],
                    &trace.hidden[l],
                    &dh,
                    &mut grad.layers[l],
                );
                dh_next[l] = d_previous;
                dx = d_input;
            }
            let mut row = grad.embedding.row_mut(trace.action);
            row += &dx.slice(s![self.n_metafeatures..]);
        }
    }

    fn parameters_mut(&mut self) -> Vec<ArrayViewMutD<'_, f64>> {
        let mut out = vec![self.embedding.view_mut().into_dyn()];
        for layer in &mut self.layers {
            out.push(layer.input.view_mut().into_dyn());
            out.push(layer.recurrent.view_mut().into_dyn());
            out.push(layer.bias.view_mut().into_dyn());
        }
        out.push(self.output.weights.view_mut().into_dyn());
        out.push(self.output.bias.view_mut().into_dyn());
        out
    }
}

/// Adam with bias correction.
#[derive(Debug, Clone)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: u64,
    m: Vec<Option<ArrayD<f64>>>,
    v: Vec<Option<ArrayD<f64>>>,
}

impl Adam {
    pub fn new(lr: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn default_params(lr: f64) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    pub fn step_count(&self) -> u64 {
        self.t
    }

    /// Descends `grad` on the parameters of `policy`.
    pub fn step(&mut self, policy: &mut RecurrentPolicy, grad: &PolicyGrad) {
        let grads = grad.tensors();
        if self.m.is_empty() {
            self.m = grads.iter().map(|_| None).collect();
            self.v = grads.iter().map(|_| None).collect();
        }
        self.t += 1;
        let lr_t = self.lr * (1.0 - self.beta2.powi(self.t as i32)).sqrt()
            / (1.0 - self.beta1.powi(self.t as i32));
        let (beta1, beta2, epsilon) = (self.beta1, self.beta2, self.epsilon);

        for (i, (mut param, g)) in policy.parameters_mut().into_iter().zip(&grads).enumerate() {
            let m = self.m[i].get_or_insert_with(|| ArrayD::zeros(g.raw_dim()));
            let v = self.v[i].get_or_insert_with(|| ArrayD::zeros(g.raw_dim()));
            Zip::from(&mut param)
                .and(m)
                .and(v)
                .and(g)
                .for_each(|p, m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + epsilon);
                });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    const FED_ACTIONS: [usize; 3] = [0, 1, 3];

    fn small_policy(dropout: f64) -> (RecurrentPolicy, ChaCha8Rng) {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let policy = RecurrentPolicy::new(2, 3, 4, 2, 5, dropout, &mut rng);
        (policy, rng)
    }

    fn targets() -> Vec<Vector> {
        vec![
            array![0.3, -0.2, 0.9, 0.0, -0.5],
            array![-0.4, 0.1, 0.0, 0.7, 0.2],
            array![1.0, 0.0, -0.3, 0.5, -0.1],
        ]
    }

    fn unroll(policy: &RecurrentPolicy, rng: &mut ChaCha8Rng) -> Vec<(Vector, StepTrace)> {
        let mut hidden = policy.initial_hidden();
        FED_ACTIONS
            .iter()
            .map(|&action| {
                let (logits, trace, next) = policy.forward_step(&hidden, &[0.5, -1.0], action, false, rng);
                hidden = next;
                (logits, trace)
            })
            .collect()
    }

    fn loss(policy: &RecurrentPolicy, rng: &mut ChaCha8Rng) -> f64 {
        unroll(policy, rng)
            .iter()
            .zip(targets())
            .map(|((logits, _), t)| logits.dot(&t))
            .sum()
    }

    fn gradient(policy: &RecurrentPolicy, rng: &mut ChaCha8Rng) -> PolicyGrad {
        let steps = unroll(policy, rng);
        let pairs: Vec<(&StepTrace, Vector)> = steps.iter().map(|(_, t)| t).zip(targets()).collect();
        let mut grad = policy.zero_grad();
        policy.backward_sequence(&pairs, &mut grad);
        grad
    }

    #[test]
    fn gradients_match_finite_differences_through_time() {
        let (mut policy, mut rng) = small_policy(0.0);
        let grad = gradient(&policy, &mut rng);

        let eps = 1e-6;
        // embedding, both recurrent matrices, an input matrix, output weights
        let checks = [(0usize, 4usize), (2, 5), (5, 3), (1, 7), (7, 2)];
        for (tensor, index) in checks {
            let analytic = grad.tensors()[tensor].iter().nth(index).copied().unwrap();
            let nudge = |policy: &mut RecurrentPolicy, delta: f64| {
                if let Some(p) = policy.parameters_mut()[tensor].iter_mut().nth(index) {
                    *p += delta;
                }
            };
            nudge(&mut policy, eps);
            let up = loss(&policy, &mut rng);
            nudge(&mut policy, -2.0 * eps);
            let down = loss(&policy, &mut rng);
            nudge(&mut policy, eps);
            let numeric = (up - down) / (2.0 * eps);
            assert!((analytic - numeric).abs() < 1e-5, "{analytic} vs {numeric}");
        }

        // only the embedding rows of the fed actions receive gradient
        assert!(grad.embedding.row(2).iter().all(|g| *g == 0.0));
        assert!(grad.embedding.row(4).iter().all(|g| *g == 0.0));
        assert!(grad.embedding.row(3).iter().any(|g| *g != 0.0));
        // later steps push gradient into the recurrent weights
        assert!(grad.layers[0].recurrent.iter().any(|g| *g != 0.0));
    }

    #[test]
    fn hidden_state_carries_across_steps() {
        let (policy, mut rng) = small_policy(0.0);
        let zero = policy.initial_hidden();
        assert_eq!(zero.len(), 2);
        let (first, _, after) = policy.forward_step(&zero, &[1.0, 1.0], 0, false, &mut rng);
        let (again, _, _) = policy.forward_step(&zero, &[1.0, 1.0], 0, false, &mut rng);
        let (carried, _, _) = policy.forward_step(&after, &[1.0, 1.0], 0, false, &mut rng);
        assert_eq!(first, again);
        assert_ne!(first, carried);
    }

    #[test]
    fn dropout_only_in_train_mode() {
        let (policy, mut rng) = small_policy(0.5);
        let hidden = policy.initial_hidden();
        let (a, _, _) = policy.forward_step(&hidden, &[1.0, 1.0], 0, false, &mut rng);
        let (b, _, _) = policy.forward_step(&hidden, &[1.0, 1.0], 0, false, &mut rng);
        assert_eq!(a, b);
        let (_, trace, _) = policy.forward_step(&hidden, &[1.0, 1.0], 0, true, &mut rng);
        assert!(trace.masks.iter().flatten().all(|m| *m == 0.0 || *m == 2.0));
        // the carried state is taken before dropout
        let (_, eval_trace, _) = policy.forward_step(&hidden, &[1.0, 1.0], 0, false, &mut rng);
        assert_eq!(trace.hidden[0], eval_trace.hidden[0]);
    }

    #[test]
    fn adam_descends() {
        let (mut policy, mut rng) = small_policy(0.0);
        let mut adam = Adam::default_params(0.01);
        let before = loss(&policy, &mut rng);
        for _ in 0..50 {
            let grad = gradient(&policy, &mut rng);
            assert!(grad.norm() > 0.0);
            adam.step(&mut policy, &grad);
        }
        assert!(loss(&policy, &mut rng) < before);
        assert_eq!(adam.step_count(), 50);
    }
}
