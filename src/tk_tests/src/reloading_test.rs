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

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tk_go::symmetry::Transform;
use tk_go::Position;
use tk_model::fake::FakeModel;
use tk_model::features::Layout;
use tk_model::reloading::Constructor;
use tk_model::{FeatureDescriptor, Model, ModelInput, ModelOutput, ReloadingModelFactory};

fn temp_dir(name: &str) -> PathBuf {
    let directory = std::env::temp_dir()
        .join(format!("tk_reloading_{}_{}", std::process::id(), name));

    fs::create_dir_all(&directory).expect("could not create temp directory");
    directory
}

/// Returns a constructor whose models are fakes named after the path they
/// were loaded from.
fn fake_constructor() -> Constructor {
    Box::new(|path| {
        Ok(Box::new(FakeModel::new(
            path.display().to_string(),
            FeatureDescriptor::agz(Layout::Nhwc)
        )))
    })
}

/// Returns the name of the model that served a single inference.
fn served_by(model: &mut dyn Model) -> String {
    let position = Position::new();
    let inputs = vec! [ModelInput::new(Transform::Identity, vec! [&position])];
    let mut outputs = vec! [ModelOutput::default()];
    let mut name = String::new();

    model.run_many(&inputs, &mut outputs, Some(&mut name)).expect("inference failed");
    name
}

#[test]
fn follows_the_latest_generation() {
    crate::setup();

    let directory = temp_dir("follows");

    fs::write(directory.join("0-foo.pb"), b"").unwrap();

    let pattern = directory.join("%d-foo.pb").display().to_string();
    let factory = ReloadingModelFactory::with_poll_interval(
        &pattern,
        Duration::from_millis(20),
        fake_constructor()
    ).expect("could not create factory");
    let mut model = factory.new_model().expect("could not create model");

    assert!(served_by(&mut model).ends_with("0-foo.pb"));

    // a new generation appears, within one poll interval the next call must
    // be served by it
    fs::write(directory.join("1-foo.pb"), b"").unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);

    loop {
        let name = served_by(&mut model);

        if name.ends_with("1-foo.pb") {
            break;
        }

        assert!(Instant::now() < deadline, "still served by {}", name);
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(factory);
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn picks_the_largest_generation_at_startup() {
    crate::setup();

    let directory = temp_dir("largest");

    fs::write(directory.join("2-foo.pb"), b"").unwrap();
    fs::write(directory.join("10-foo.pb"), b"").unwrap();

    let pattern = directory.join("%d-foo.pb").display().to_string();
    let factory = ReloadingModelFactory::with_poll_interval(
        &pattern,
        Duration::from_millis(20),
        fake_constructor()
    ).expect("could not create factory");
    let mut model = factory.new_model().expect("could not create model");

    // generation 10 beats generation 2 even though "10" sorts before "2"
    assert!(served_by(&mut model).ends_with("10-foo.pb"));

    drop(factory);
    fs::remove_dir_all(&directory).ok();
}

#[test]
fn every_instance_is_swapped() {
    crate::setup();

    let directory = temp_dir("instances");

    fs::write(directory.join("7-foo.pb"), b"").unwrap();

    let pattern = directory.join("%d-foo.pb").display().to_string();
    let factory = ReloadingModelFactory::with_poll_interval(
        &pattern,
        Duration::from_millis(20),
        fake_constructor()
    ).expect("could not create factory");
    let mut model_1 = factory.new_model().expect("could not create model");
    let mut model_2 = factory.new_model().expect("could not create model");

    fs::write(directory.join("8-foo.pb"), b"").unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);

    loop {
        let name_1 = served_by(&mut model_1);
        let name_2 = served_by(&mut model_2);

        if name_1.ends_with("8-foo.pb") && name_2.ends_with("8-foo.pb") {
            break;
        }

        assert!(Instant::now() < deadline);
        std::thread::sleep(Duration::from_millis(20));
    }

    drop(factory);
    fs::remove_dir_all(&directory).ok();
}
