//! The CASH controller: a policy over algorithm and hyperparameter actions.
//!
//! The action vocabulary is the component vocabulary of the algorithm
//! space (components then special tokens) followed by the flat
//! hyperparameter vocabulary (`"<name>__state_<i>"` values then tokens).
//! Decoding proposes one algorithm per component type and then one value
//! for each hyperparameter of the chosen algorithms. Every step samples from
//! a softmax restricted to the actions valid at that step.

use dc_space::{
    component::excluded_values, AlgorithmComponent, AlgorithmSpace, ComponentType, FlatValue,
    Setting, SpaceItem, SpecialToken,
};
use dc_types::{ControllerError, DcResult, ExperimentConfig, HyperValue};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::nn::{Adam, Hidden, RecurrentPolicy, StepTrace, Vector};

const NORMALIZE_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Algorithm,
    Hyperparameter,
}

/// What an action selected.
#[derive(Debug, Clone, PartialEq)]
pub enum Choice {
    Algorithm(AlgorithmComponent),
    Value(HyperValue),
}

/// Gradient of `log π(a)` with respect to the logits of the step that
/// produced it, plus the step trace needed to push it back through time.
#[derive(Debug, Clone, PartialEq)]
pub struct LogProbGrad {
    log_prob: f64,
    trace: StepTrace,
    dlogits: Vector,
}

impl LogProbGrad {
    pub fn log_prob(&self) -> f64 {
        self.log_prob
    }

    /// Vocabulary index fed to the policy at this step.
    pub fn previous_action(&self) -> usize {
        self.trace.previous_action()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub action_type: ActionType,
    /// Component type for algorithm actions, prefixed hyperparameter name
    /// otherwise.
    pub name: String,
    pub choice: Choice,
    /// Index in the action vocabulary.
    pub index: usize,
    pub log_prob: f64,
    pub log_prob_grad: LogProbGrad,
}

/// Network and optimizer settings of a controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub n_metafeatures: usize,
    pub input_size: usize,
    pub hidden_size: usize,
    pub output_size: Option<usize>,
    pub n_layers: usize,
    pub dropout_rate: f64,
    pub learning_rate: f64,
    pub random_state: Option<u64>,
}

impl ControllerConfig {
    pub fn from_experiment(config: &ExperimentConfig, n_metafeatures: usize) -> Self {
        Self {
            n_metafeatures,
            input_size: config.input_size,
            hidden_size: config.hidden_size,
            output_size: config.output_size,
            n_layers: config.n_layers,
            dropout_rate: config.dropout_rate,
            learning_rate: config.learning_rate,
            random_state: config.random_state,
        }
    }
}

#[derive(Debug)]
pub struct CashController {
    pub a_space: AlgorithmSpace,
    policy: RecurrentPolicy,
    optimizer: Adam,
    rng: ChaCha8Rng,
    n_components: usize,
    /// Vocabulary index of the first action of each decode.
    start_index: usize,
    /// Vocabulary index fed before the first hyperparameter action.
    h_start_index: usize,
    /// Value of every hyperparameter vocabulary entry; `None` for start and
    /// end tokens.
    h_values: Vec<Option<HyperValue>>,
    pub log_prob_buffer: Vec<Vec<LogProbGrad>>,
    pub reward_buffer: Vec<f64>,
    pub baseline_reward_buffer: Vec<f64>,
}

impl CashController {
    pub fn new(a_space: AlgorithmSpace, config: &ControllerConfig) -> DcResult<Self> {
        a_space.validate()?;
        let n_components = a_space.n_components();
        let vocabulary_size = n_components + a_space.n_hyperparameters();
        if let Some(output_size) = config.output_size {
            if output_size != vocabulary_size {
                return Err(ControllerError::VocabularyMismatch {
                    expected: vocabulary_size,
                    actual: output_size,
                }
                .into());
            }
        }
        let start_index = a_space.start_token_index().ok_or_else(|| ControllerError::InvalidConfig {
            message: "the algorithm space needs a start token".to_string(),
        })?;
        let h_start_index = a_space
            .h_start_token_index()
            .map(|i| n_components + i)
            .ok_or_else(|| ControllerError::InvalidConfig {
                message: "the hyperparameter space needs a start token".to_string(),
            })?;

        let h_values = a_space
            .hyperparameter_state_space_values()
            .into_iter()
            .map(|v| match v {
                FlatValue::Value(v) => Some(v),
                FlatValue::Token(SpecialToken::None) => Some(HyperValue::NoneToken),
                FlatValue::Token(_) => None,
            })
            .collect();

        let mut rng = match config.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let policy = RecurrentPolicy::new(
            config.n_metafeatures,
            config.input_size,
            config.hidden_size,
            config.n_layers,
            vocabulary_size,
            config.dropout_rate,
            &mut rng,
        );
        debug!(
            vocabulary_size,
            n_components,
            hidden_size = config.hidden_size,
            n_layers = config.n_layers,
            "initialized cash controller"
        );

        Ok(Self {
            a_space,
            policy,
            optimizer: Adam::default_params(config.learning_rate),
            rng,
            n_components,
            start_index,
            h_start_index,
            h_values,
            log_prob_buffer: Vec::new(),
            reward_buffer: Vec::new(),
            baseline_reward_buffer: Vec::new(),
        })
    }

    pub fn vocabulary_size(&self) -> usize {
        self.policy.n_actions()
    }

    /// Samples one action among `allowed`, feeding `previous` to the policy
    /// and advancing `hidden` by one step.
    fn select(
        &mut self,
        hidden: &mut Hidden,
        metafeatures: &[f64],
        previous: usize,
        allowed: &[usize],
    ) -> (usize, f64, LogProbGrad) {
        let (logits, trace, next) = self
            .policy
            .forward_step(hidden, metafeatures, previous, true, &mut self.rng);
        *hidden = next;
        let max = allowed
            .iter()
            .map(|&i| logits[i])
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = allowed.iter().map(|&i| (logits[i] - max).exp()).collect();
        let total: f64 = weights.iter().sum();
        let probs: Vec<f64> = weights.iter().map(|w| w / total).collect();

        let u: f64 = self.rng.gen();
        let mut acc = 0.0;
        let mut pick = allowed.len() - 1;
        for (k, p) in probs.iter().enumerate() {
            acc += p;
            if u < acc {
                pick = k;
                break;
            }
        }

        let mut dlogits = Vector::zeros(logits.len());
        for (k, &i) in allowed.iter().enumerate() {
            let indicator = if k == pick { 1.0 } else { 0.0 };
            dlogits[i] = indicator - probs[k];
        }
        let log_prob = probs[pick].ln();
        (
            allowed[pick],
            log_prob,
            LogProbGrad {
                log_prob,
                trace,
                dlogits,
            },
        )
    }

    fn component_indices(&self, component_type: ComponentType) -> Vec<usize> {
        self.a_space
            .components()
            .iter()
            .enumerate()
            .filter(|(_, item)| matches!(item, SpaceItem::Algorithm(c) if c.component_type == component_type))
            .map(|(i, _)| i)
            .collect()
    }

    /// Proposes an ML framework as a sequence of actions. Metafeatures are
    /// log-scaled before entering the network.
    pub fn decode(&mut self, metafeatures: &[f64]) -> DcResult<Vec<Action>> {
        if metafeatures.len() != self.policy.n_metafeatures() {
            return Err(ControllerError::InvalidConfig {
                message: format!(
                    "expected {} metafeatures, found {}",
                    self.policy.n_metafeatures(),
                    metafeatures.len()
                ),
            }
            .into());
        }
        // metafeatures such as row counts span orders of magnitude
        let inputs: Vec<f64> = metafeatures.iter().map(|m| m.signum() * m.abs().ln_1p()).collect();
        let metafeatures = inputs.as_slice();
        let mut actions = Vec::new();
        let mut hidden = self.policy.initial_hidden();
        let mut previous = self.start_index;

        let mut algorithms: Vec<AlgorithmComponent> = Vec::new();
        for component_type in self.a_space.component_type_order() {
            let allowed = self.component_indices(component_type);
            if allowed.is_empty() {
                return Err(ControllerError::NoValidAction {
                    step: component_type.to_string(),
                }
                .into());
            }
            let (index, log_prob, log_prob_grad) = self.select(&mut hidden, metafeatures, previous, &allowed);
            let component = match self.a_space.components()[index] {
                SpaceItem::Algorithm(c) => c.clone(),
                SpaceItem::Token(t) => {
                    return Err(dc_types::internal_error!("token {t} selected as {component_type}"))
                }
            };
            algorithms.push(component.clone());
            actions.push(Action {
                action_type: ActionType::Algorithm,
                name: component_type.to_string(),
                choice: Choice::Algorithm(component),
                index,
                log_prob,
                log_prob_grad,
            });
            previous = index;
        }

        previous = self.h_start_index;
        let none_index = self.a_space.h_none_token_index();
        for component in &algorithms {
            let conditions = component.hyperparameter_exclusion_conditions();
            let mut chosen: Vec<(String, HyperValue)> = Vec::new();
            for name in component.hyperparameter_name_space() {
                let excluded = excluded_values(&conditions, &chosen, &name);
                let mut allowed: Vec<usize> = self
                    .a_space
                    .h_value_index(&name)
                    .into_iter()
                    .filter(|&i| match &self.h_values[i] {
                        Some(v) => !excluded.contains(&v),
                        None => false,
                    })
                    .collect();
                allowed.extend(none_index);
                if allowed.is_empty() {
                    return Err(ControllerError::NoValidAction { step: name }.into());
                }
                let allowed: Vec<usize> = allowed.into_iter().map(|i| i + self.n_components).collect();

                let (index, log_prob, log_prob_grad) =
                    self.select(&mut hidden, metafeatures, previous, &allowed);
                let value = self.h_values[index - self.n_components]
                    .clone()
                    .ok_or_else(|| dc_types::internal_error!("token selected for {name}"))?;
                chosen.push((name.clone(), value.clone()));
                actions.push(Action {
                    action_type: ActionType::Hyperparameter,
                    name,
                    choice: Choice::Value(value),
                    index,
                    log_prob,
                    log_prob_grad,
                });
                previous = index;
            }
        }
        Ok(actions)
    }

    /// Splits decoded actions into the algorithms and the hyperparameter
    /// setting they describe.
    pub fn framework_components(actions: &[Action]) -> (Vec<AlgorithmComponent>, Setting) {
        let mut algorithms = Vec::new();
        let mut hyperparameters = Setting::new();
        for action in actions {
            match &action.choice {
                Choice::Algorithm(c) => algorithms.push(c.clone()),
                Choice::Value(v) => {
                    hyperparameters.insert(action.name.clone(), v.clone());
                }
            }
        }
        (algorithms, hyperparameters)
    }

    /// REINFORCE update over the buffered iterations:
    /// `loss = -Σ log π(a) · (R - b)`, averaged over iterations.
    /// Clears the buffers and returns the mean loss.
    pub fn backward(&mut self, with_baseline: bool, normalize_reward: bool) -> DcResult<f64> {
        let n = self.log_prob_buffer.len();
        if n == 0 || self.reward_buffer.len() != n {
            return Err(ControllerError::EmptyBuffer.into());
        }
        let mut advantages: Vec<f64> = if with_baseline {
            if self.baseline_reward_buffer.len() != n {
                return Err(ControllerError::EmptyBuffer.into());
            }
            self.reward_buffer
                .iter()
                .zip(&self.baseline_reward_buffer)
                .map(|(r, b)| r - b)
                .collect()
        } else {
            self.reward_buffer.clone()
        };
        if normalize_reward {
            let mean = advantages.iter().sum::<f64>() / n as f64;
            let std = (advantages.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
            for a in &mut advantages {
                *a = (*a - mean) / (std + NORMALIZE_EPSILON);
            }
        }

        let mut grad = self.policy.zero_grad();
        let mut total_loss = 0.0;
        for (steps, advantage) in self.log_prob_buffer.iter().zip(&advantages) {
            let scale = -advantage / n as f64;
            let sequence: Vec<(&StepTrace, Vector)> = steps
                .iter()
                .map(|step| (&step.trace, &step.dlogits * scale))
                .collect();
            self.policy.backward_sequence(&sequence, &mut grad);
            total_loss -= steps.iter().map(|step| step.log_prob).sum::<f64>() * advantage;
        }
        self.optimizer.step(&mut self.policy, &grad);

        self.log_prob_buffer.clear();
        self.reward_buffer.clear();
        self.baseline_reward_buffer.clear();
        Ok(total_loss / n as f64)
    }
}
