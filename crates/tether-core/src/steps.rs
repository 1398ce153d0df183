use serde::{Deserialize, Serialize};

use tether_wire::WorkflowKind;

/// A named milestone and the progress threshold at which it becomes the
/// active step. Thresholds within a template are strictly increasing and the
/// first is always 0; ids are unique within a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepSpec {
    pub id: &'static str,
    pub title: &'static str,
    pub threshold: u8,
}

pub const PAPER_TO_CODE_STEPS: [StepSpec; 5] = [
    StepSpec { id: "parse", title: "Parse document", threshold: 0 },
    StepSpec { id: "analyze", title: "Analyze paper", threshold: 10 },
    StepSpec { id: "plan", title: "Plan implementation", threshold: 30 },
    StepSpec { id: "generate", title: "Generate code", threshold: 55 },
    StepSpec { id: "validate", title: "Validate & package", threshold: 90 },
];

pub const CHAT_PLANNING_STEPS: [StepSpec; 5] = [
    StepSpec { id: "clarify", title: "Clarify requirements", threshold: 0 },
    StepSpec { id: "draft", title: "Draft plan", threshold: 20 },
    StepSpec { id: "review", title: "Review plan", threshold: 45 },
    StepSpec { id: "generate", title: "Generate code", threshold: 65 },
    StepSpec { id: "finalize", title: "Finalize output", threshold: 90 },
];

pub fn template_for(kind: WorkflowKind) -> &'static [StepSpec] {
    match kind {
        WorkflowKind::PaperToCode => &PAPER_TO_CODE_STEPS,
        WorkflowKind::ChatPlanning => &CHAT_PLANNING_STEPS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
    /// The step that was in flight when the task failed.
    Error,
}

/// One row of the derived step view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub title: String,
    pub threshold: u8,
    pub status: StepStatus,
}

/// Map a progress percentage onto a step template.
///
/// The active step is the one with the greatest threshold not exceeding the
/// progress value; earlier steps are completed, later ones pending. At 100
/// every step is completed.
pub fn map_steps(specs: &[StepSpec], progress: u8) -> Vec<Step> {
    let progress = progress.min(100);
    let active = specs.iter().rposition(|spec| spec.threshold <= progress);

    specs
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let status = if progress >= 100 {
                StepStatus::Completed
            } else {
                match active {
                    Some(active) if index < active => StepStatus::Completed,
                    Some(active) if index == active => StepStatus::Active,
                    _ => StepStatus::Pending,
                }
            };
            Step {
                id: spec.id.to_string(),
                title: spec.title.to_string(),
                threshold: spec.threshold,
                status,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statuses(specs: &[StepSpec], progress: u8) -> Vec<StepStatus> {
        map_steps(specs, progress).into_iter().map(|s| s.status).collect()
    }

    #[test]
    fn templates_have_increasing_thresholds_from_zero() {
        for specs in [&PAPER_TO_CODE_STEPS[..], &CHAT_PLANNING_STEPS[..]] {
            assert_eq!(specs[0].threshold, 0);
            for pair in specs.windows(2) {
                assert!(pair[0].threshold < pair[1].threshold);
            }
        }
    }

    #[test]
    fn zero_progress_activates_first_step() {
        let statuses = statuses(&PAPER_TO_CODE_STEPS, 0);
        assert_eq!(statuses[0], StepStatus::Active);
        assert!(statuses[1..].iter().all(|s| *s == StepStatus::Pending));
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        // Thresholds 0, 10, 30, 55, 90.
        let at_29 = statuses(&PAPER_TO_CODE_STEPS, 29);
        assert_eq!(at_29[1], StepStatus::Active);
        assert_eq!(at_29[2], StepStatus::Pending);

        let at_30 = statuses(&PAPER_TO_CODE_STEPS, 30);
        assert_eq!(at_30[1], StepStatus::Completed);
        assert_eq!(at_30[2], StepStatus::Active);
        assert_eq!(at_30[3], StepStatus::Pending);
    }

    #[test]
    fn past_last_threshold_keeps_last_step_active_until_100() {
        let at_99 = statuses(&CHAT_PLANNING_STEPS, 99);
        assert_eq!(at_99[4], StepStatus::Active);
        assert!(at_99[..4].iter().all(|s| *s == StepStatus::Completed));

        let at_100 = statuses(&CHAT_PLANNING_STEPS, 100);
        assert!(at_100.iter().all(|s| *s == StepStatus::Completed));
    }

    #[test]
    fn progress_above_100_clamps() {
        let clamped = statuses(&CHAT_PLANNING_STEPS, 250);
        assert!(clamped.iter().all(|s| *s == StepStatus::Completed));
    }

    #[test]
    fn progress_below_first_threshold_leaves_all_pending() {
        let specs = [
            StepSpec { id: "late", title: "late start", threshold: 40 },
            StepSpec { id: "finish", title: "finish", threshold: 80 },
        ];
        assert!(statuses(&specs, 10).iter().all(|s| *s == StepStatus::Pending));
        assert_eq!(statuses(&specs, 40)[0], StepStatus::Active);
    }

    #[test]
    fn template_selection_matches_kind() {
        assert_eq!(template_for(WorkflowKind::PaperToCode)[3].title, "Generate code");
        assert_eq!(template_for(WorkflowKind::ChatPlanning)[0].title, "Clarify requirements");
    }
}
