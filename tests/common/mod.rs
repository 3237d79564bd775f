//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use alphaforge::adapters::{GenerationRequest, Generator, TransportError};
use alphaforge::core::{ArtifactStore, Journal, Runner, StageEnv};
use alphaforge::domain::{CollisionPolicy, FixedClock, LineageKeyGenerator};
use alphaforge::hygiene::HygieneEngine;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};

/// Timestamp half of every lineage key produced by [`env`]
pub const STAMP: &str = "20240102_030405";

pub fn fixed_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap()
}

/// In-memory generator replaying queued responses in order
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<String, TransportError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<Result<String, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(responses: &[&str]) -> Arc<Self> {
        Self::new(responses.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Stage name of every request, in call order
    pub fn stages(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.stage).collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Decode("script exhausted".to_string())))
    }
}

pub fn env_with_policy(root: &Path, generator: Arc<ScriptedGenerator>, policy: CollisionPolicy) -> StageEnv {
    StageEnv {
        generator,
        store: ArtifactStore::new(root),
        hygiene: HygieneEngine::default(),
        lineage: LineageKeyGenerator::new(Arc::new(FixedClock(fixed_time())), policy),
    }
}

pub fn env(root: &Path, generator: Arc<ScriptedGenerator>) -> StageEnv {
    env_with_policy(root, generator, CollisionPolicy::Accept)
}

pub fn runner(root: &Path, generator: Arc<ScriptedGenerator>) -> Runner {
    Runner::new(env(root, generator), Journal::new(root))
}

pub const IDEA: &str = "\
idea: volume_spike_ratio
family: volume
dependencies: [pandas]
description: Ratio of current volume to its rolling mean.
inputs: [volume]
parameters:
  window_size: 20
";

pub const FEATURE_CODE: &str = "Here is the implementation:
```python
import numpy as np
import pandas as pd

def zscore(x, n):
    return (x - x.rolling(n).mean()) / x.rolling(n).std()

def volume_spike_ratio(df: pd.DataFrame, window_size: int = 20, volume_col: str = 'volume') -> pd.Series:
    v = df[volume_col]
    return v / v.rolling(window_size).mean()
```
";

pub const FEATURE_REFINED: &str = "\
import pandas as pd

def volume_spike_ratio(df: pd.DataFrame, window_size: int = 20, volume_col: str = 'volume') -> pd.Series:
    v = df[volume_col]
    return v / v.rolling(window_size).mean()
";

pub const EXPLANATION: &str = "\
- **Purpose:** measures how unusual current volume is relative to its recent average.
- **How it works:** divides volume by its rolling mean over `window_size` bars.
";

pub const CONCEPT: &str = "\
alpha_concept:
  name: Volume Exhaustion Reversal
  hypothesis: Extreme volume after a long run marks capitulation.
  expected_role: signal
  target_behavior: mean_reversion
  related_features: [volume_ratio_20]
";

pub const FORMULA: &str = "\
```yaml
alpha_formula:
  name: vol_exhaustion
  formula: -zscore(volume_ratio_20, window)
  conditioning: null
  used_features: [volume_ratio_20]
  parameters:
    window: 20
  rationale: Fade extreme volume.
```";

pub const ALPHA_CODE: &str = "\
import pandas as pd

def zscore(s: pd.Series, window: int) -> pd.Series:
    return (s - s.rolling(window).mean()) / s.rolling(window).std()

def alpha(df: pd.DataFrame, window: int = 20) -> Tuple[pd.Series, pd.Series]:
    required = {'volume_ratio_20'}
    missing = required - set(df.columns)
    if missing:
        raise ValueError(f\"missing columns: {missing}\")
    signal = -zscore(df['volume_ratio_20'], window)
    condition = pd.Series(True, index=df.index)
    return signal, condition
";

pub const REPORT: &str = "\
# Overview
**Objective:** fade capitulation after extreme volume.
**In one sentence:** short the exhaustion, collect the reversion.

# Signal Logic
- `-zscore(volume_ratio_20, 20)`
";
