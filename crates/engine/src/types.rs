//! Core types for shotcheck

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Identifier of a result group
pub type GroupId = String;

/// Which side of an image pair an image belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "ref", alias = "reference")]
    Reference,
    #[serde(rename = "test")]
    Test,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Reference => write!(f, "ref"),
            Role::Test => write!(f, "test"),
        }
    }
}

/// Materialized location of one screenshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub role: Role,
    pub name: String,
    pub path: PathBuf,
}

/// Reference and test images for one name
#[derive(Debug, Clone, Default)]
pub struct ImagePair {
    pub name: String,
    pub reference: Option<ImageRef>,
    pub test: Option<ImageRef>,
    /// Set once a diff has been handed to the requestor
    pub requested: bool,
}

impl ImagePair {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn reference_ready(&self) -> bool {
        self.reference.is_some()
    }

    pub fn test_ready(&self) -> bool {
        self.test.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.reference_ready() && self.test_ready()
    }

    /// Record an image for `image.role`
    pub fn mark(&mut self, image: ImageRef) {
        match image.role {
            Role::Reference => self.reference = Some(image),
            Role::Test => self.test = Some(image),
        }
    }
}

/// Bounding box of the differing pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffBounds {
    pub top: i64,
    pub left: i64,
    pub bottom: i64,
    pub right: i64,
}

/// Reference minus test dimensions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionDifference {
    pub width: i64,
    pub height: i64,
}

/// Output of one pixel comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    #[serde(rename = "misMatchPercentage")]
    pub mismatch_percentage: f64,
    pub is_same_dimensions: bool,
    pub diff_bounds: DiffBounds,
    pub dimension_difference: DimensionDifference,
    /// Encoded PNG, present only when something differs
    #[serde(skip)]
    pub rendered_diff_image: Option<Vec<u8>>,
}

impl DiffResult {
    /// Build a result, discarding a diff image supplied for a zero mismatch.
    ///
    /// A non-zero mismatch without an image is kept as given: rendering the
    /// diff is the comparator's job, and [`DiffResult::has_consistent_image`]
    /// reports the gap.
    pub fn new(
        mismatch_percentage: f64,
        is_same_dimensions: bool,
        diff_bounds: DiffBounds,
        dimension_difference: DimensionDifference,
        rendered_diff_image: Option<Vec<u8>>,
    ) -> Self {
        let mismatch_percentage = mismatch_percentage.max(0.0);
        let rendered_diff_image = if mismatch_percentage > 0.0 {
            rendered_diff_image
        } else {
            None
        };
        Self {
            mismatch_percentage,
            is_same_dimensions,
            diff_bounds,
            dimension_difference,
            rendered_diff_image,
        }
    }

    /// A result with no differing pixels
    pub fn identical() -> Self {
        Self::new(0.0, true, DiffBounds::default(), DimensionDifference::default(), None)
    }

    /// The diff image is present iff the mismatch is non-zero
    pub fn has_consistent_image(&self) -> bool {
        self.rendered_diff_image.is_some() == (self.mismatch_percentage > 0.0)
    }
}

/// Outcome of comparing one image pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    Errored,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Passed => write!(f, "passed"),
            Verdict::Failed => write!(f, "failed"),
            Verdict::Errored => write!(f, "errored"),
        }
    }
}

/// Data attached to a Failed or Errored verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum VerdictDetail {
    Mismatch(DiffResult),
    Error(String),
}

/// Derived verdict of a result group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupVerdict {
    Pending,
    Passed,
    Failed,
}

impl Default for GroupVerdict {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for GroupVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupVerdict::Pending => write!(f, "pending"),
            GroupVerdict::Passed => write!(f, "passed"),
            GroupVerdict::Failed => write!(f, "failed"),
        }
    }
}

/// How an Errored breakpoint affects its group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErroredPolicy {
    /// Errored counts as neither passed nor failed; the group stays pending
    Exclude,
    /// Errored fails the group
    Fail,
}

impl Default for ErroredPolicy {
    fn default() -> Self {
        Self::Exclude
    }
}

/// One named image pair plus its verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub name: String,
    pub group: Option<GroupId>,
    pub verdict: Option<Verdict>,
    pub detail: Option<VerdictDetail>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Breakpoint {
    pub fn new(name: impl Into<String>, group: Option<GroupId>) -> Self {
        Self {
            name: name.into(),
            group,
            verdict: None,
            detail: None,
            decided_at: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.verdict.is_some()
    }
}

/// Layout entry: a group and its breakpoints in display order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultGroupSpec {
    pub id: GroupId,
    #[serde(default)]
    pub breakpoints: Vec<String>,
}

/// Notification for the rendering side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StateChange {
    ImageAvailable {
        name: String,
        role: Role,
        image: ImageRef,
    },
    BreakpointDecided {
        name: String,
        group: Option<GroupId>,
        verdict: Verdict,
        detail: Option<VerdictDetail>,
    },
    GroupChanged {
        group: GroupId,
        from: GroupVerdict,
        to: GroupVerdict,
    },
    /// An error that could not be attributed to a breakpoint
    Diagnostic { message: String },
    Reset,
}

/// Group line in a report snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub id: GroupId,
    pub verdict: GroupVerdict,
    pub breakpoints: Vec<Breakpoint>,
}

/// Point-in-time view of the whole report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub session_id: String,
    pub groups: Vec<GroupReport>,
    /// Breakpoints seen on the wire that no group lists
    pub ungrouped: Vec<Breakpoint>,
    pub taken_at: DateTime<Utc>,
}

impl ReportSnapshot {
    pub fn count(&self, verdict: Verdict) -> usize {
        self.groups
            .iter()
            .flat_map(|g| g.breakpoints.iter())
            .chain(self.ungrouped.iter())
            .filter(|b| b.verdict == Some(verdict))
            .count()
    }
}
