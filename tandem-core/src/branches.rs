//! Branch progression: the per-couple content tier state machine.
//!
//! Each activity type carries a fixed ordered branch sequence; completions
//! advance a couple through it. Advancing past the final branch either loops
//! back or holds, per activity configuration, and never produces a label
//! outside the sequence.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::admin::AdminAccess;
use crate::config::ConfigError;
use crate::error::SyncError;
use crate::model::{ActivityType, CoupleId};
use crate::ProgressionRepo;

/// Ordered content tier label, e.g. "intro" or "deeper-waters".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchLabel(pub String);

impl BranchLabel {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What happens when a couple completes the final branch of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WrapPolicy {
    /// Restart from the first branch.
    Loop,
    /// Stay on the final branch for further completions.
    #[default]
    Hold,
}

/// Branch sequence and advancement rules for one activity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPlan {
    pub branches: Vec<BranchLabel>,
    /// Completions required before advancing to the next branch.
    #[serde(default = "BranchPlan::default_completions_per_branch")]
    pub completions_per_branch: u32,
    #[serde(default)]
    pub wrap: WrapPolicy,
}

impl BranchPlan {
    const fn default_completions_per_branch() -> u32 {
        1
    }

    #[must_use]
    pub fn new(labels: &[&str], completions_per_branch: u32, wrap: WrapPolicy) -> Self {
        Self {
            branches: labels.iter().map(|l| BranchLabel::new(*l)).collect(),
            completions_per_branch,
            wrap,
        }
    }

    fn validate(&self, activity: &'static str) -> Result<(), ConfigError> {
        if self.branches.is_empty() {
            return Err(ConfigError::EmptyBranchSequence { activity });
        }
        if self.completions_per_branch == 0 {
            return Err(ConfigError::MinViolation {
                field: "branches.completions_per_branch",
                min: 1,
                value: 0,
            });
        }
        Ok(())
    }

    /// Label at `index`, clamped into the sequence.
    #[must_use]
    pub fn label_at(&self, index: usize) -> &BranchLabel {
        let clamped = index.min(self.branches.len() - 1);
        &self.branches[clamped]
    }

    /// Index following `index` under this plan's wrap policy.
    #[must_use]
    pub fn next_index(&self, index: usize) -> usize {
        let last = self.branches.len() - 1;
        if index < last {
            index + 1
        } else {
            match self.wrap {
                WrapPolicy::Loop => 0,
                WrapPolicy::Hold => last,
            }
        }
    }
}

/// Per-activity branch plans. Every activity type has an entry, so lookups
/// are total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchPlans {
    #[serde(default = "BranchPlans::default_linked")]
    pub linked: BranchPlan,
    #[serde(default = "BranchPlans::default_word_search")]
    pub word_search: BranchPlan,
    #[serde(default = "BranchPlans::default_daily_quiz")]
    pub daily_quiz: BranchPlan,
}

impl BranchPlans {
    fn default_linked() -> BranchPlan {
        BranchPlan::new(
            &["intro", "familiar", "challenging", "expert"],
            1,
            WrapPolicy::Hold,
        )
    }

    fn default_word_search() -> BranchPlan {
        BranchPlan::new(
            &["intro", "familiar", "challenging", "expert"],
            1,
            WrapPolicy::Hold,
        )
    }

    fn default_daily_quiz() -> BranchPlan {
        BranchPlan::new(
            &["getting-started", "daily-rhythms", "deeper-waters", "inner-landscape"],
            1,
            WrapPolicy::Loop,
        )
    }

    #[must_use]
    pub const fn plan(&self, activity: ActivityType) -> &BranchPlan {
        match activity {
            ActivityType::Linked => &self.linked,
            ActivityType::WordSearch => &self.word_search,
            ActivityType::DailyQuiz => &self.daily_quiz,
        }
    }

    /// Validate every plan.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError` found across the plans.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.linked.validate("linked")?;
        self.word_search.validate("word_search")?;
        self.daily_quiz.validate("daily_quiz")?;
        Ok(())
    }
}

impl Default for BranchPlans {
    fn default() -> Self {
        Self {
            linked: Self::default_linked(),
            word_search: Self::default_word_search(),
            daily_quiz: Self::default_daily_quiz(),
        }
    }
}

/// Persisted progression state for one `(couple, activity)` pair. Created
/// lazily on first access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BranchProgress {
    pub current_index: usize,
    pub completions_in_branch: u32,
}

/// Result of recording one completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchAdvance {
    /// Branch the couple is on after the completion was recorded.
    pub branch: BranchLabel,
    /// Whether the completion crossed the threshold into a new branch.
    pub advanced: bool,
}

/// Per-couple, per-activity branch progression over a persistence seam.
pub struct BranchProgressionStore {
    repo: Arc<dyn ProgressionRepo>,
    plans: BranchPlans,
}

impl BranchProgressionStore {
    #[must_use]
    pub fn new(repo: Arc<dyn ProgressionRepo>, plans: BranchPlans) -> Self {
        Self { repo, plans }
    }

    #[must_use]
    pub const fn plans(&self) -> &BranchPlans {
        &self.plans
    }

    async fn load_or_default(
        &self,
        couple: &CoupleId,
        activity: ActivityType,
    ) -> Result<BranchProgress, SyncError> {
        Ok(self
            .repo
            .load(couple, activity)
            .await?
            .unwrap_or_default())
    }

    /// Current branch label for a couple and activity.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the progression backend fails.
    pub async fn current_branch(
        &self,
        couple: &CoupleId,
        activity: ActivityType,
    ) -> Result<BranchLabel, SyncError> {
        let progress = self.load_or_default(couple, activity).await?;
        Ok(self.plans.plan(activity).label_at(progress.current_index).clone())
    }

    /// Record one completion, advancing the branch when the plan's threshold
    /// is reached.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the progression backend fails.
    pub async fn complete_activity(
        &self,
        couple: &CoupleId,
        activity: ActivityType,
    ) -> Result<BranchAdvance, SyncError> {
        let plan = self.plans.plan(activity);
        let mut progress = self.load_or_default(couple, activity).await?;
        progress.completions_in_branch += 1;
        let advanced = progress.completions_in_branch >= plan.completions_per_branch;
        if advanced {
            progress.current_index = plan.next_index(progress.current_index);
            progress.completions_in_branch = 0;
        }
        self.repo.store(couple, activity, &progress).await?;
        let branch = plan.label_at(progress.current_index).clone();
        log::debug!(
            "activity {activity} for {couple}: completion recorded, branch now {branch} (advanced: {advanced})"
        );
        Ok(BranchAdvance { branch, advanced })
    }

    /// Privileged: jump to the next branch regardless of completions.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the progression backend fails.
    pub async fn skip_branch(
        &self,
        _admin: &AdminAccess,
        couple: &CoupleId,
        activity: ActivityType,
    ) -> Result<BranchLabel, SyncError> {
        let plan = self.plans.plan(activity);
        let mut progress = self.load_or_default(couple, activity).await?;
        progress.current_index = plan.next_index(progress.current_index);
        progress.completions_in_branch = 0;
        self.repo.store(couple, activity, &progress).await?;
        Ok(plan.label_at(progress.current_index).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn store_with(plans: BranchPlans) -> BranchProgressionStore {
        BranchProgressionStore::new(Arc::new(MemoryBackend::new()), plans)
    }

    fn couple() -> CoupleId {
        CoupleId::from("couple-1")
    }

    #[tokio::test]
    async fn first_access_starts_on_first_branch() {
        let store = store_with(BranchPlans::default());
        let branch = store
            .current_branch(&couple(), ActivityType::Linked)
            .await
            .unwrap();
        assert_eq!(branch.as_str(), "intro");
    }

    #[tokio::test]
    async fn threshold_gates_advancement() {
        let mut plans = BranchPlans::default();
        plans.linked.completions_per_branch = 2;
        let store = store_with(plans);

        let first = store
            .complete_activity(&couple(), ActivityType::Linked)
            .await
            .unwrap();
        assert!(!first.advanced);
        assert_eq!(first.branch.as_str(), "intro");

        let second = store
            .complete_activity(&couple(), ActivityType::Linked)
            .await
            .unwrap();
        assert!(second.advanced);
        assert_eq!(second.branch.as_str(), "familiar");
    }

    #[tokio::test]
    async fn hold_policy_pins_final_branch() {
        let store = store_with(BranchPlans::default());
        for _ in 0..10 {
            store
                .complete_activity(&couple(), ActivityType::WordSearch)
                .await
                .unwrap();
        }
        let branch = store
            .current_branch(&couple(), ActivityType::WordSearch)
            .await
            .unwrap();
        assert_eq!(branch.as_str(), "expert");
    }

    #[tokio::test]
    async fn loop_policy_cycles_back_to_start() {
        let store = store_with(BranchPlans::default());
        for _ in 0..4 {
            store
                .complete_activity(&couple(), ActivityType::DailyQuiz)
                .await
                .unwrap();
        }
        let branch = store
            .current_branch(&couple(), ActivityType::DailyQuiz)
            .await
            .unwrap();
        assert_eq!(branch.as_str(), "getting-started");
    }

    #[tokio::test]
    async fn labels_always_stay_inside_the_sequence() {
        let plans = BranchPlans::default();
        let known: Vec<_> = plans
            .daily_quiz
            .branches
            .iter()
            .cloned()
            .collect();
        let store = store_with(plans);
        for _ in 0..23 {
            let advance = store
                .complete_activity(&couple(), ActivityType::DailyQuiz)
                .await
                .unwrap();
            assert!(known.contains(&advance.branch));
        }
    }

    #[tokio::test]
    async fn skip_branch_requires_only_the_capability() {
        let store = store_with(BranchPlans::default());
        let admin = AdminAccess::grant();
        let branch = store
            .skip_branch(&admin, &couple(), ActivityType::Linked)
            .await
            .unwrap();
        assert_eq!(branch.as_str(), "familiar");
    }

    #[tokio::test]
    async fn couples_progress_independently() {
        let store = store_with(BranchPlans::default());
        store
            .complete_activity(&couple(), ActivityType::Linked)
            .await
            .unwrap();
        let other = store
            .current_branch(&CoupleId::from("couple-2"), ActivityType::Linked)
            .await
            .unwrap();
        assert_eq!(other.as_str(), "intro");
    }
}
