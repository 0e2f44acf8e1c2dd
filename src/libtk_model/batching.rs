// Copyright 2020 Karl Sundequist Blomdahl <karl.sundequist.blomdahl@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crossbeam_channel::{bounded, Sender};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use tk_go::symmetry::Transform;
use tk_go::Position;
use tk_utils::config;

use crate::features::FeatureDescriptor;
use crate::model::{Model, ModelInput, ModelOutput};
use crate::Error;

/// A single queued position, the symmetry to apply and an owned snapshot of
/// the position history (most recent first). The snapshot lets the request
/// outlive the caller's borrows while it sits in the queue.
struct OwnedInput {
    symmetry: Transform,
    history: Vec<Position>
}

impl OwnedInput {
    fn from_input(input: &ModelInput) -> OwnedInput {
        OwnedInput {
            symmetry: input.symmetry(),
            history: input.history().iter().map(|&position| position.clone()).collect()
        }
    }

    fn as_input(&self) -> ModelInput {
        ModelInput::new(self.symmetry, self.history.iter().collect())
    }
}

/// The outputs handed back to a waiting caller once its batch has been
/// dispatched.
struct BatchResponse {
    outputs: Vec<ModelOutput>,
    model_name: Option<String>
}

/// A request sitting in a batcher's queue, the positions to evaluate and
/// the rendezvous channel its caller is blocked on.
struct InferenceRequest {
    inputs: Vec<OwnedInput>,
    wants_name: bool,
    tx: Sender<BatchResponse>
}

struct BatcherState {
    /// Pending requests, in arrival order.
    queue: VecDeque<InferenceRequest>,

    /// The total number of positions in `queue`.
    num_pending_inputs: usize,

    /// The number of games currently started on this batcher.
    num_active_games: usize,

    /// The number of requests currently enqueued on a paired batcher whose
    /// games are expected to send us a request soon.
    num_waiting: usize
}

/// Coalesces evaluation requests from many concurrent games into batches of
/// up to `batch_size` positions, and dispatches them to the underlying
/// model one batch at a time.
pub struct ModelBatcher {
    model_path: String,
    batch_size: usize,
    descriptor: FeatureDescriptor,

    /// The wrapped backend. It is kept behind its own lock so that a batch
    /// can be dispatched while the queue lock is released.
    model: Mutex<Box<dyn Model>>,

    state: Mutex<BatcherState>
}

impl ModelBatcher {
    /// Returns a batcher that owns the given model.
    ///
    /// # Arguments
    ///
    /// * `model` -
    /// * `model_path` -
    /// * `batch_size` -
    ///
    pub fn new<S: Into<String>>(model: Box<dyn Model>, model_path: S, batch_size: usize) -> ModelBatcher {
        assert!(batch_size >= 1);

        ModelBatcher {
            model_path: model_path.into(),
            batch_size,
            descriptor: model.feature_descriptor(),
            model: Mutex::new(model),
            state: Mutex::new(BatcherState {
                queue: VecDeque::new(),
                num_pending_inputs: 0,
                num_active_games: 0,
                num_waiting: 0
            })
        }
    }

    /// Returns the path of the model this batcher dispatches to.
    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    /// Returns the descriptor of the input features the wrapped model
    /// expects.
    pub fn feature_descriptor(&self) -> FeatureDescriptor {
        self.descriptor
    }

    fn increment_game_count(&self) {
        let mut state = self.state.lock().expect("could not acquire batcher lock");

        state.num_active_games += 1;
    }

    fn decrement_game_count(&self) {
        let mut state = self.state.lock().expect("could not acquire batcher lock");

        assert!(state.num_active_games > 0, "game ended twice");
        state.num_active_games -= 1;

        // a retiring game may make a partial batch the best we can do for
        // the remaining games
        self.maybe_run_batches(state);
    }

    /// Enqueues a request for the given positions and blocks until its
    /// outputs have been filled in by some dispatched batch.
    ///
    /// # Arguments
    ///
    /// * `other` - the paired batcher of the calling game, if any
    /// * `inputs` -
    /// * `outputs` -
    /// * `model_name` -
    ///
    fn run_many(
        &self,
        other: Option<&Arc<ModelBatcher>>,
        inputs: &[ModelInput],
        outputs: &mut [ModelOutput],
        mut model_name: Option<&mut String>
    ) -> Result<(), Error>
    {
        assert_eq!(inputs.len(), outputs.len());
        assert!(!inputs.is_empty() && inputs.len() <= self.batch_size);

        let other_is_self = other.map_or(false, |other| {
            ::std::ptr::eq(Arc::as_ptr(other), self as *const ModelBatcher)
        });
        let (tx, rx) = bounded(1);
        let request = InferenceRequest {
            inputs: inputs.iter().map(OwnedInput::from_input).collect(),
            wants_name: model_name.is_some(),
            tx
        };

        {
            let mut state = self.state.lock().expect("could not acquire batcher lock");

            state.num_pending_inputs += request.inputs.len();
            state.queue.push_back(request);

            if other_is_self {
                // the other color of the same game plays on this batcher
                // and is expected to send a request soon
                state.num_waiting += 1;
            }

            self.maybe_run_batches(state);
        }

        if let Some(other) = other {
            if !other_is_self {
                let mut other_state = other.state.lock().expect("could not acquire batcher lock");

                other_state.num_waiting += 1;

                // this may unblock the paired batcher if it was waiting for
                // our game to settle
                other.maybe_run_batches(other_state);
            }
        }

        let response = rx.recv()
            .map_err(|_| Error::Backend(format!("batcher for {} dropped the request", self.model_path)))?;

        if let Some(other) = other {
            let mut other_state = other.state.lock().expect("could not acquire batcher lock");

            other_state.num_waiting -= 1;
        }

        for (output, response) in outputs.iter_mut().zip(response.outputs.into_iter()) {
            *output = response;
        }

        if let Some(model_name) = model_name.as_mut() {
            **model_name = response.model_name.unwrap_or_default();
        }

        Ok(())
    }

    /// Dispatches batches while it is no longer worth waiting for more
    /// requests, i.e. while either a full batch is queued, or every active
    /// game already has a request in hand or imminently arriving on the
    /// paired batcher.
    ///
    /// # Arguments
    ///
    /// * `state` - the held batcher lock, released around each dispatch
    ///
    fn maybe_run_batches<'a>(&'a self, mut state: MutexGuard<'a, BatcherState>) {
        loop {
            let num_requests = state.queue.len();
            let is_ready = num_requests > 0 && (
                state.num_pending_inputs >= self.batch_size ||
                num_requests + state.num_waiting >= state.num_active_games
            );

            if !is_ready {
                break;
            }

            // pop requests in FIFO order, never splitting a single request
            // across two batches
            let mut batch = vec! [];
            let mut batch_len = 0;

            loop {
                let front_len = match state.queue.front() {
                    Some(request) if batch_len + request.inputs.len() <= self.batch_size => {
                        request.inputs.len()
                    },
                    _ => { break }
                };

                batch_len += front_len;
                state.num_pending_inputs -= front_len;
                batch.push(state.queue.pop_front().expect("queue is non-empty"));
            }

            drop(state);
            self.run_batch(batch, batch_len);
            state = self.state.lock().expect("could not acquire batcher lock");
        }
    }

    /// Runs a single batch through the wrapped model and notifies every
    /// request in it.
    ///
    /// # Arguments
    ///
    /// * `batch` -
    /// * `batch_len` - the total number of positions in `batch`
    ///
    fn run_batch(&self, batch: Vec<InferenceRequest>, batch_len: usize) {
        debug_assert!(batch_len > 0 && batch_len <= self.batch_size);
        debug!("dispatching a batch of {} positions to {}", batch_len, self.model_path);

        let inputs = batch.iter()
            .flat_map(|request| request.inputs.iter().map(OwnedInput::as_input))
            .collect::<Vec<_>>();
        let mut outputs = vec! [ModelOutput::default(); batch_len];
        let mut name = String::new();

        {
            let mut model = self.model.lock().expect("could not acquire model lock");

            if let Err(reason) = model.run_many(&inputs, &mut outputs, Some(&mut name)) {
                // the state of an accelerator after a failed call is
                // undefined, so partial-batch recovery is not attempted
                panic!("backend failure on {}: {}", self.model_path, reason);
            }
        }

        drop(inputs);

        let mut outputs = outputs.into_iter();

        for request in batch {
            let response = BatchResponse {
                outputs: outputs.by_ref().take(request.inputs.len()).collect(),
                model_name: if request.wants_name { Some(name.clone()) } else { None }
            };

            // the caller may have gone away, in which case nobody cares
            // about this response
            let _ = request.tx.send(response);
        }
    }
}

/// A per-game handle that routes the game's requests to its primary
/// batcher, and during head-to-head evaluation keeps track of the paired
/// batcher that the opposing color plays on.
pub struct BatchingClient {
    batcher: Arc<ModelBatcher>,
    other: Mutex<Option<Arc<ModelBatcher>>>
}

impl BatchingClient {
    fn new(batcher: Arc<ModelBatcher>) -> BatchingClient {
        BatchingClient {
            batcher,
            other: Mutex::new(None)
        }
    }

    /// Returns the descriptor of the input features the underlying model
    /// expects.
    pub fn feature_descriptor(&self) -> FeatureDescriptor {
        self.batcher.feature_descriptor()
    }

    /// Evaluates all of the given positions through the game's batcher,
    /// blocking until the outputs have been filled in.
    ///
    /// # Arguments
    ///
    /// * `inputs` -
    /// * `outputs` -
    /// * `model_name` -
    ///
    pub fn run_many(
        &self,
        inputs: &[ModelInput],
        outputs: &mut [ModelOutput],
        model_name: Option<&mut String>
    ) -> Result<(), Error>
    {
        let other = self.other.lock().expect("could not acquire client lock").clone();

        self.batcher.run_many(other.as_ref(), inputs, outputs, model_name)
    }

    fn set_other(&self, other: Option<Arc<ModelBatcher>>) {
        let mut guard = self.other.lock().expect("could not acquire client lock");

        assert!(
            guard.is_none() || other.is_none(),
            "paired batcher set twice without an intervening end of game"
        );
        *guard = other;
    }
}

impl Model for BatchingClient {
    fn name(&self) -> String {
        self.batcher.model_path().to_string()
    }

    fn feature_descriptor(&self) -> FeatureDescriptor {
        self.batcher.feature_descriptor()
    }

    fn run_many(
        &mut self,
        inputs: &[ModelInput],
        outputs: &mut [ModelOutput],
        model_name: Option<&mut String>
    ) -> Result<(), Error>
    {
        BatchingClient::run_many(self, inputs, outputs, model_name)
    }
}

/// Constructor for the backend that a batcher wraps, called once per
/// distinct model path.
pub type Constructor = Box<dyn Fn(&str) -> Result<Box<dyn Model>, Error> + Send + Sync>;

/// Hands out per-game clients and shares one batcher between all of the
/// games that use the same model path.
pub struct BatchingFactory {
    batchers: Mutex<HashMap<String, Arc<ModelBatcher>>>,
    constructor: Constructor,
    batch_size: usize
}

impl BatchingFactory {
    /// Returns a factory that dispatches batches of the default size.
    ///
    /// # Arguments
    ///
    /// * `constructor` -
    ///
    pub fn new(constructor: Constructor) -> BatchingFactory {
        BatchingFactory::with_batch_size(constructor, *config::BATCH_SIZE)
    }

    /// Returns a factory that dispatches batches of up to `batch_size`
    /// positions.
    ///
    /// # Arguments
    ///
    /// * `constructor` -
    /// * `batch_size` -
    ///
    pub fn with_batch_size(constructor: Constructor, batch_size: usize) -> BatchingFactory {
        BatchingFactory {
            batchers: Mutex::new(HashMap::new()),
            constructor,
            batch_size
        }
    }

    /// Returns a new client for the given model path, sharing the batcher
    /// with every other client of the same path.
    ///
    /// # Arguments
    ///
    /// * `model_path` -
    ///
    pub fn new_client(&self, model_path: &str) -> Result<BatchingClient, Error> {
        let mut batchers = self.batchers.lock().expect("could not acquire factory lock");

        let batcher = match batchers.get(model_path) {
            Some(batcher) => batcher.clone(),
            None => {
                let model = (self.constructor)(model_path)?;
                let batcher = Arc::new(ModelBatcher::new(model, model_path, self.batch_size));

                batchers.insert(model_path.to_string(), batcher.clone());
                batcher
            }
        };

        Ok(BatchingClient::new(batcher))
    }

    /// Marks the start of a game between the two given clients. Each
    /// distinct underlying batcher has its active game count incremented
    /// once, and if the batchers differ each client records the other as
    /// its pair.
    ///
    /// # Arguments
    ///
    /// * `black` -
    /// * `white` -
    ///
    pub fn start_game(&self, black: &BatchingClient, white: &BatchingClient) {
        if ::std::ptr::eq(black, white) {
            // a single client playing both colors
            black.batcher.increment_game_count();
        } else if Arc::ptr_eq(&black.batcher, &white.batcher) {
            black.batcher.increment_game_count();
            black.set_other(Some(white.batcher.clone()));
            white.set_other(Some(black.batcher.clone()));
        } else {
            black.batcher.increment_game_count();
            white.batcher.increment_game_count();
            black.set_other(Some(white.batcher.clone()));
            white.set_other(Some(black.batcher.clone()));
        }
    }

    /// Marks the end of a game between the two given clients, undoing the
    /// bookkeeping of `start_game` and dropping any batcher that no longer
    /// has a client.
    ///
    /// # Arguments
    ///
    /// * `black` -
    /// * `white` -
    ///
    pub fn end_game(&self, black: &BatchingClient, white: &BatchingClient) {
        if ::std::ptr::eq(black, white) {
            black.batcher.decrement_game_count();
        } else if Arc::ptr_eq(&black.batcher, &white.batcher) {
            black.set_other(None);
            white.set_other(None);
            black.batcher.decrement_game_count();
        } else {
            black.set_other(None);
            white.set_other(None);
            black.batcher.decrement_game_count();
            white.batcher.decrement_game_count();
        }

        // drop any batcher that is only kept alive by the registry itself
        let mut batchers = self.batchers.lock().expect("could not acquire factory lock");

        batchers.retain(|_, batcher| Arc::strong_count(batcher) > 1);
    }
}
