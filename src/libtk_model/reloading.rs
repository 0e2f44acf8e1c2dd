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

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tk_utils::config;

use crate::features::FeatureDescriptor;
use crate::model::{Model, ModelInput, ModelOutput};
use crate::Error;

/// Constructor for the backend that a reloading model wraps, called once at
/// start-up and again for every new generation.
pub type Constructor = Box<dyn Fn(&Path) -> Result<Box<dyn Model>, Error> + Send>;

/// A basename pattern of the form `<prefix>%d<suffix>`, where `%d` matches
/// the generation number and everything else is literal. Matches whole
/// basenames only.
struct GenerationPattern {
    regex: Regex
}

impl GenerationPattern {
    /// Returns the compiled pattern, or an error if the basename does not
    /// contain exactly one `%d`, or contains any other `%` or a `*`.
    ///
    /// # Arguments
    ///
    /// * `basename` -
    ///
    fn new(basename: &str) -> Result<GenerationPattern, Error> {
        let parts = basename.split("%d").collect::<Vec<_>>();

        if parts.len() != 2 || parts.iter().any(|part| part.contains('%') || part.contains('*')) {
            return Err(Error::InvalidPattern(basename.to_string()));
        }

        let regex = Regex::new(&format!(
            "^{}(\\d+){}$",
            regex::escape(parts[0]),
            regex::escape(parts[1])
        )).map_err(|_| Error::InvalidPattern(basename.to_string()))?;

        Ok(GenerationPattern { regex })
    }

    /// Returns the generation number of the given basename, or `None` if it
    /// does not match the pattern.
    ///
    /// # Arguments
    ///
    /// * `basename` -
    ///
    fn generation(&self, basename: &str) -> Option<u64> {
        self.regex.captures(basename)?.get(1)?.as_str().parse().ok()
    }
}

/// Returns the path of the matching file with the largest generation in the
/// given directory, if any. A missing directory is transient and yields no
/// match.
///
/// # Arguments
///
/// * `directory` -
/// * `pattern` -
///
fn scan_latest(directory: &Path, pattern: &GenerationPattern) -> Option<PathBuf> {
    let entries = fs::read_dir(directory).ok()?;
    let mut latest: Option<(u64, PathBuf)> = None;

    for entry in entries.filter_map(|entry| entry.ok()) {
        let file_name = entry.file_name();
        let generation = file_name.to_str().and_then(|name| pattern.generation(name));

        if let Some(generation) = generation {
            // ties are broken by generation, not lexicographic order
            if latest.as_ref().map_or(true, |&(best, _)| generation > best) {
                latest = Some((generation, entry.path()));
            }
        }
    }

    latest.map(|(_, path)| path)
}

struct WatchState {
    directory: PathBuf,
    pattern: GenerationPattern,
    latest: Option<PathBuf>,
    instances: Vec<Weak<InstanceState>>,
    constructor: Constructor
}

impl WatchState {
    /// Replaces the backend of every registered instance with one freshly
    /// constructed from `path`. The old backend is dropped before the new
    /// one is constructed, some accelerator runtimes cannot host the old
    /// and new session at the same time.
    ///
    /// # Arguments
    ///
    /// * `path` -
    ///
    fn swap_all(&mut self, path: &Path) {
        self.instances.retain(|instance| instance.upgrade().is_some());

        for weak in &self.instances {
            if let Some(instance) = weak.upgrade() {
                let mut guard = instance.model.lock().expect("could not acquire instance lock");

                drop(guard.take());
                *guard = Some((self.constructor)(path).unwrap_or_else(|reason| {
                    panic!("could not load model from {:?}: {}", path, reason)
                }));
            }
        }
    }
}

struct InstanceState {
    model: Mutex<Option<Box<dyn Model>>>
}

/// A model factory that watches a directory for files matching a basename
/// pattern with a `%d` generation number, and atomically swaps the backend
/// of every model it has handed out whenever a newer generation appears.
pub struct ReloadingModelFactory {
    state: Arc<Mutex<WatchState>>,
    is_running: Arc<AtomicBool>,
    poll_interval: Duration,
    handle: Option<JoinHandle<()>>
}

impl ReloadingModelFactory {
    /// Returns a factory that polls for new generations at the default
    /// interval.
    ///
    /// # Arguments
    ///
    /// * `pattern` - directory plus basename containing exactly one `%d`
    /// * `constructor` -
    ///
    pub fn new(pattern: &str, constructor: Constructor) -> Result<ReloadingModelFactory, Error> {
        ReloadingModelFactory::with_poll_interval(
            pattern,
            Duration::from_secs(*config::POLL_INTERVAL),
            constructor
        )
    }

    /// Returns a factory that polls for new generations at the given
    /// interval.
    ///
    /// # Arguments
    ///
    /// * `pattern` -
    /// * `poll_interval` -
    /// * `constructor` -
    ///
    pub fn with_poll_interval(
        pattern: &str,
        poll_interval: Duration,
        constructor: Constructor
    ) -> Result<ReloadingModelFactory, Error>
    {
        let full_path = Path::new(pattern);
        let basename = full_path.file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidPattern(pattern.to_string()))?;
        let directory = full_path.parent()
            .map(|parent| parent.to_path_buf())
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));

        if directory.to_string_lossy().contains('%') {
            return Err(Error::InvalidPattern(pattern.to_string()));
        }

        let state = Arc::new(Mutex::new(WatchState {
            directory,
            pattern: GenerationPattern::new(basename)?,
            latest: None,
            instances: vec! [],
            constructor
        }));
        let is_running = Arc::new(AtomicBool::new(true));
        let handle = {
            let state = state.clone();
            let is_running = is_running.clone();

            thread::Builder::new()
                .name("model_scanner".into())
                .spawn(move || scanner_worker(state, is_running, poll_interval))
                .expect("could not spawn the scanner thread")
        };

        Ok(ReloadingModelFactory {
            state,
            is_running,
            poll_interval,
            handle: Some(handle)
        })
    }

    /// Returns a model backed by the latest matching generation. If no
    /// generation exists yet this blocks, polling, until one appears; this
    /// is the only place the watcher is allowed to block.
    pub fn new_model(&self) -> Result<ReloadingModel, Error> {
        loop {
            {
                let mut state = self.state.lock().expect("could not acquire watch state lock");

                if state.latest.is_none() {
                    state.latest = scan_latest(&state.directory, &state.pattern);
                }

                if let Some(path) = state.latest.clone() {
                    let model = (state.constructor)(&path)?;
                    let inner = Arc::new(InstanceState {
                        model: Mutex::new(Some(model))
                    });

                    state.instances.push(Arc::downgrade(&inner));

                    return Ok(ReloadingModel { inner });
                }
            }

            thread::sleep(self.poll_interval);
        }
    }
}

impl Drop for ReloadingModelFactory {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            handle.join().expect("could not terminate the scanner thread");
        }
    }
}

/// The body of the scanner thread, polls the watched directory until the
/// owning factory is dropped.
fn scanner_worker(
    state: Arc<Mutex<WatchState>>,
    is_running: Arc<AtomicBool>,
    poll_interval: Duration
) {
    while is_running.load(Ordering::Acquire) {
        {
            let mut state = state.lock().expect("could not acquire watch state lock");
            let latest = scan_latest(&state.directory, &state.pattern);

            if latest.is_some() && latest != state.latest {
                let path = latest.expect("latest generation is set");

                info!("switching to new model generation {:?}", path);
                state.latest = Some(path.clone());
                state.swap_all(&path);
            }
        }

        // sleep in small slices so that dropping the factory does not have
        // to wait out a full poll interval
        let mut remaining = poll_interval;

        while remaining > Duration::from_millis(0) && is_running.load(Ordering::Acquire) {
            let step = remaining.min(Duration::from_millis(100));

            thread::sleep(step);
            remaining -= step;
        }
    }
}

/// A model whose backend is swapped by its factory whenever a new
/// generation appears. Calls during a swap block until the new backend is
/// installed and observe either the old or the new backend atomically.
pub struct ReloadingModel {
    inner: Arc<InstanceState>
}

impl Model for ReloadingModel {
    fn name(&self) -> String {
        let guard = self.inner.model.lock().expect("could not acquire instance lock");

        guard.as_ref().expect("no model installed").name()
    }

    fn feature_descriptor(&self) -> FeatureDescriptor {
        let guard = self.inner.model.lock().expect("could not acquire instance lock");

        guard.as_ref().expect("no model installed").feature_descriptor()
    }

    fn run_many(
        &mut self,
        inputs: &[ModelInput],
        outputs: &mut [ModelOutput],
        model_name: Option<&mut String>
    ) -> Result<(), Error>
    {
        let mut guard = self.inner.model.lock().expect("could not acquire instance lock");

        guard.as_mut().expect("no model installed").run_many(inputs, outputs, model_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_requires_exactly_one_percent_d() {
        assert!(GenerationPattern::new("model-%d.pb").is_ok());
        assert!(GenerationPattern::new("model.pb").is_err());
        assert!(GenerationPattern::new("%d-model-%d.pb").is_err());
        assert!(GenerationPattern::new("%s-model-%d.pb").is_err());
        assert!(GenerationPattern::new("*-%d.pb").is_err());
    }

    #[test]
    fn pattern_matches_whole_basenames() {
        let pattern = GenerationPattern::new("%d-foo.pb").unwrap();

        assert_eq!(pattern.generation("000017-foo.pb"), Some(17));
        assert_eq!(pattern.generation("x000017-foo.pb"), None);
        assert_eq!(pattern.generation("000017-foo.pb.tmp"), None);
        assert_eq!(pattern.generation("000017-bar.pb"), None);
    }

    #[test]
    fn literal_dots_are_escaped() {
        let pattern = GenerationPattern::new("model-%d.pb").unwrap();

        assert_eq!(pattern.generation("model-3xpb"), None);
        assert_eq!(pattern.generation("model-3.pb"), Some(3));
    }

    #[test]
    fn directory_with_percent_is_rejected() {
        let constructor: Constructor = Box::new(|_| panic!("not expected to be called"));

        assert!(ReloadingModelFactory::new("some/%dir/model-%d.pb", constructor).is_err());
    }

    #[test]
    fn missing_directory_yields_no_match() {
        let pattern = GenerationPattern::new("model-%d.pb").unwrap();

        assert_eq!(scan_latest(Path::new("/no/such/directory"), &pattern), None);
    }

    #[test]
    fn largest_generation_wins() {
        let directory = std::env::temp_dir().join(format!("tk_scan_{}", std::process::id()));

        fs::create_dir_all(&directory).unwrap();
        fs::write(directory.join("2-foo.pb"), b"").unwrap();
        fs::write(directory.join("10-foo.pb"), b"").unwrap();
        fs::write(directory.join("9-foo.pb"), b"").unwrap();
        fs::write(directory.join("other.txt"), b"").unwrap();

        let pattern = GenerationPattern::new("%d-foo.pb").unwrap();
        let latest = scan_latest(&directory, &pattern);

        assert_eq!(latest, Some(directory.join("10-foo.pb")));
        fs::remove_dir_all(&directory).ok();
    }
}
