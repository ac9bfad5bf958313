//! Diff requests against the comparison collaborator
//!
//! At most one comparison runs per name. A second request while the first is
//! in flight joins the existing operation; a request for a name that already
//! completed is refused.

use crate::error::ComparisonFailure;
use crate::types::{DiffResult, ImageRef};
use crate::Result;
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Result of one comparison as seen by the engine
pub type DiffOutcome = std::result::Result<DiffResult, ComparisonFailure>;

/// Handle to an in-flight comparison; clones resolve to the same outcome
pub type PendingDiff = Shared<BoxFuture<'static, DiffOutcome>>;

/// Pixel comparison collaborator
#[async_trait]
pub trait Comparator: Send + Sync {
    /// Compare `test` against `reference`.
    ///
    /// A result with a non-zero mismatch must carry the rendered diff image.
    async fn compare(&self, reference: &ImageRef, test: &ImageRef) -> Result<DiffResult>;
}

/// A complete pair ready to be compared
#[derive(Debug, Clone, PartialEq)]
pub struct DiffRequest {
    pub name: String,
    pub reference: ImageRef,
    pub test: ImageRef,
}

/// What a call to [`DiffRequestor::request`] did
pub enum RequestOutcome {
    /// A new comparison was created; the caller must drive it
    Started(PendingDiff),
    /// A comparison for this name is already running
    Joined(PendingDiff),
    /// This name was already compared in this session
    AlreadyCompleted,
}

/// Issues comparisons and tracks them per name
pub struct DiffRequestor {
    comparator: Arc<dyn Comparator>,
    in_flight: HashMap<String, PendingDiff>,
    requested: HashSet<String>,
}

impl DiffRequestor {
    pub fn new(comparator: Arc<dyn Comparator>) -> Self {
        Self {
            comparator,
            in_flight: HashMap::new(),
            requested: HashSet::new(),
        }
    }

    /// Request a comparison for `request.name`
    pub fn request(&mut self, request: DiffRequest) -> RequestOutcome {
        if let Some(pending) = self.in_flight.get(&request.name) {
            warn!("Diff for '{}' already in flight, joining it", request.name);
            return RequestOutcome::Joined(pending.clone());
        }
        if self.requested.contains(&request.name) {
            debug!("Diff for '{}' already completed", request.name);
            return RequestOutcome::AlreadyCompleted;
        }

        debug!(
            "Requesting diff for '{}': {} vs {}",
            request.name,
            request.reference.path.display(),
            request.test.path.display()
        );

        let comparator = Arc::clone(&self.comparator);
        let DiffRequest {
            name,
            reference,
            test,
        } = request;
        let failure_name = name.clone();
        let pending = async move {
            comparator
                .compare(&reference, &test)
                .await
                .map_err(|e| ComparisonFailure::new(failure_name, e.detail()))
        }
        .boxed()
        .shared();

        self.requested.insert(name.clone());
        self.in_flight.insert(name, pending.clone());
        RequestOutcome::Started(pending)
    }

    /// The running comparison for `name`, if any
    pub fn pending(&self, name: &str) -> Option<PendingDiff> {
        self.in_flight.get(name).cloned()
    }

    pub fn is_in_flight(&self, name: &str) -> bool {
        self.in_flight.contains_key(name)
    }

    pub fn was_requested(&self, name: &str) -> bool {
        self.requested.contains(name)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Drop the in-flight handle once its outcome has been consumed
    pub fn complete(&mut self, name: &str) {
        self.in_flight.remove(name);
    }

    /// Forget everything, dropping outstanding comparisons
    pub fn reset(&mut self) {
        self.in_flight.clear();
        self.requested.clear();
    }
}
