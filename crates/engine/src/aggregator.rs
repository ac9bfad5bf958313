//! Breakpoint → result group rollup
//!
//! Each breakpoint holds at most one verdict (first write wins). Each result
//! group derives its verdict from its children on demand and caches the last
//! derived value so transitions can be announced exactly once.

use crate::types::{
    Breakpoint, ErroredPolicy, GroupId, GroupReport, GroupVerdict, ResultGroupSpec, StateChange,
    Verdict, VerdictDetail,
};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Derive a group verdict from its children's verdicts.
///
/// Any Failed child fails the group; all children Passed passes it;
/// anything else is Pending. Under [`ErroredPolicy::Exclude`] an Errored
/// child counts as neither passed nor failed, so it holds the group at
/// Pending unless a sibling failed.
pub fn derive_group_verdict<I>(children: I, policy: ErroredPolicy) -> GroupVerdict
where
    I: IntoIterator<Item = Option<Verdict>>,
{
    let mut total = 0usize;
    let mut passed = 0usize;
    let mut failed = 0usize;

    for verdict in children {
        total += 1;
        match verdict {
            Some(Verdict::Passed) => passed += 1,
            Some(Verdict::Failed) => failed += 1,
            Some(Verdict::Errored) if policy == ErroredPolicy::Fail => failed += 1,
            Some(Verdict::Errored) | None => {}
        }
    }

    if failed > 0 {
        GroupVerdict::Failed
    } else if passed == total {
        GroupVerdict::Passed
    } else {
        GroupVerdict::Pending
    }
}

/// Verdict store and group rollup
pub struct Aggregator {
    groups: Vec<ResultGroupSpec>,
    /// breakpoint name -> owning group
    membership: HashMap<String, GroupId>,
    breakpoints: HashMap<String, Breakpoint>,
    /// Last announced verdict per group
    announced: HashMap<GroupId, GroupVerdict>,
    policy: ErroredPolicy,
    notifier: broadcast::Sender<StateChange>,
}

impl Aggregator {
    /// Create an aggregator over a fixed group layout
    pub fn new(
        groups: Vec<ResultGroupSpec>,
        policy: ErroredPolicy,
        notifier: broadcast::Sender<StateChange>,
    ) -> Self {
        let membership = groups
            .iter()
            .flat_map(|g| g.breakpoints.iter().map(move |b| (b.clone(), g.id.clone())))
            .collect();

        let mut aggregator = Self {
            groups,
            membership,
            breakpoints: HashMap::new(),
            announced: HashMap::new(),
            policy,
            notifier,
        };
        aggregator.reset_announced();
        aggregator
    }

    pub fn policy(&self) -> ErroredPolicy {
        self.policy
    }

    /// Get or lazily create the breakpoint for `name`
    pub fn touch(&mut self, name: &str) -> &mut Breakpoint {
        let group = self.membership.get(name).cloned();
        self.breakpoints.entry(name.to_string()).or_insert_with(|| {
            if group.is_none() {
                debug!("Breakpoint '{}' is not part of any result group", name);
            }
            Breakpoint::new(name, group)
        })
    }

    pub fn breakpoint(&self, name: &str) -> Option<&Breakpoint> {
        self.breakpoints.get(name)
    }

    pub fn verdict(&self, name: &str) -> Option<Verdict> {
        self.breakpoints.get(name).and_then(|b| b.verdict)
    }

    pub fn group_of(&self, name: &str) -> Option<&GroupId> {
        self.membership.get(name)
    }

    /// Record a verdict for a breakpoint.
    ///
    /// Returns `false` and leaves state untouched when the breakpoint
    /// already holds a verdict.
    pub fn set_verdict(
        &mut self,
        name: &str,
        verdict: Verdict,
        detail: Option<VerdictDetail>,
    ) -> bool {
        let breakpoint = self.touch(name);
        if let Some(existing) = breakpoint.verdict {
            debug!(
                "Ignoring {} verdict for '{}': already {}",
                verdict, name, existing
            );
            return false;
        }

        breakpoint.verdict = Some(verdict);
        breakpoint.detail = detail.clone();
        breakpoint.decided_at = Some(Utc::now());
        let group = breakpoint.group.clone();

        info!("Breakpoint '{}' {}", name, verdict);
        self.notify(StateChange::BreakpointDecided {
            name: name.to_string(),
            group: group.clone(),
            verdict,
            detail,
        });

        if let Some(group) = group {
            self.refresh_group(&group);
        }
        true
    }

    /// Current derived verdict of a group, `None` if the group is unknown
    pub fn group_verdict(&self, group: &str) -> Option<GroupVerdict> {
        self.groups
            .iter()
            .find(|g| g.id == group)
            .map(|g| self.derive(g))
    }

    /// Serializable view of every group and breakpoint
    pub fn reports(&self) -> (Vec<GroupReport>, Vec<Breakpoint>) {
        let groups = self
            .groups
            .iter()
            .map(|g| GroupReport {
                id: g.id.clone(),
                verdict: self.derive(g),
                breakpoints: g
                    .breakpoints
                    .iter()
                    .map(|name| {
                        self.breakpoints
                            .get(name)
                            .cloned()
                            .unwrap_or_else(|| Breakpoint::new(name.as_str(), Some(g.id.clone())))
                    })
                    .collect(),
            })
            .collect();

        let mut ungrouped: Vec<Breakpoint> = self
            .breakpoints
            .values()
            .filter(|b| b.group.is_none())
            .cloned()
            .collect();
        ungrouped.sort_by(|a, b| a.name.cmp(&b.name));

        (groups, ungrouped)
    }

    /// Forget every verdict; the layout is kept
    pub fn reset(&mut self) {
        self.breakpoints.clear();
        self.reset_announced();
    }

    fn derive(&self, group: &ResultGroupSpec) -> GroupVerdict {
        derive_group_verdict(
            group.breakpoints.iter().map(|name| self.verdict(name)),
            self.policy,
        )
    }

    fn refresh_group(&mut self, id: &str) {
        let Some(current) = self.group_verdict(id) else {
            return;
        };
        let previous = self
            .announced
            .insert(id.to_string(), current)
            .unwrap_or_default();

        if previous != current {
            info!("Result group '{}' {} -> {}", id, previous, current);
            self.notify(StateChange::GroupChanged {
                group: id.to_string(),
                from: previous,
                to: current,
            });
        }
    }

    fn reset_announced(&mut self) {
        self.announced = self
            .groups
            .iter()
            .map(|g| (g.id.clone(), self.derive(g)))
            .collect();
    }

    fn notify(&self, change: StateChange) {
        // No subscribers is fine; the renderer may attach later.
        let _ = self.notifier.send(change);
    }
}
