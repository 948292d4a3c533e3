//! Optional numerical capabilities.
//!
//! Several stages have an optional component (the hidden-state model, the
//! classifiers, the model cache, the convex solver). Availability is injected
//! explicitly so that fallback paths are selected deterministically instead of
//! being discovered at runtime.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single optional capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Gaussian hidden Markov model used for regime inference.
    StateModel,
    /// Discriminative classifiers (regime ensemble and signal model).
    Classifier,
    /// Persistence of fitted regime models.
    Persistence,
    /// Interior-point solver used by the convex allocation strategies.
    ConvexSolver,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::StateModel => "state model",
            Capability::Classifier => "classifier",
            Capability::Persistence => "persistence",
            Capability::ConvexSolver => "convex solver",
        };
        f.write_str(name)
    }
}

/// Set of capabilities available to a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub state_model: bool,
    pub classifier: bool,
    pub persistence: bool,
    pub convex_solver: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl Capabilities {
    /// Every capability enabled.
    pub fn all() -> Self {
        Self {
            state_model: true,
            classifier: true,
            persistence: true,
            convex_solver: true,
        }
    }

    /// Every capability disabled.
    pub fn none() -> Self {
        Self {
            state_model: false,
            classifier: false,
            persistence: false,
            convex_solver: false,
        }
    }

    /// Disable a single capability.
    pub fn without(mut self, capability: Capability) -> Self {
        match capability {
            Capability::StateModel => self.state_model = false,
            Capability::Classifier => self.classifier = false,
            Capability::Persistence => self.persistence = false,
            Capability::ConvexSolver => self.convex_solver = false,
        }
        self
    }

    /// Check whether a capability is available.
    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::StateModel => self.state_model,
            Capability::Classifier => self.classifier,
            Capability::Persistence => self.persistence,
            Capability::ConvexSolver => self.convex_solver,
        }
    }

    /// Return `Ok(())` when available, otherwise the capability error.
    pub fn require(&self, capability: Capability) -> crate::error::Result<()> {
        if self.has(capability) {
            Ok(())
        } else {
            Err(crate::error::PipelineError::CapabilityUnavailable(capability))
        }
    }
}
