//! Default catalog: the six-phase creator pipeline.

use tracing::info;

use super::model::{ActionType, Milestone, Phase};
use super::order::validate_catalog;
use crate::error::CatalogError;
use crate::store::Database;

use super::model::ContentPath::{Blog, Course, Download};

/// Phases of the default pipeline, in order.
pub fn default_phases() -> Vec<Phase> {
    vec![
        Phase::new("onboarding", "Onboarding", 1)
            .with_description("Intake and kickoff with the creator team"),
        Phase::new("agreement", "Agreement", 2)
            .with_description("Terms, contract, and payment details"),
        Phase::new("course_design", "Course Design", 3)
            .with_description("Outline and structure the content"),
        Phase::new("test_prep", "Test Prep", 4)
            .with_description("Assessments and practice material"),
        Phase::new("production", "Production", 5)
            .with_description("Record, write, and edit the content"),
        Phase::new("launch", "Launch", 6).with_description("Publish and promote"),
    ]
}

/// Milestones of the default pipeline.
pub fn default_milestones() -> Vec<Milestone> {
    vec![
        Milestone::new("intake_submitted", "onboarding", 1, "Intake form submitted"),
        Milestone::new("kickoff_call", "onboarding", 2, "Kickoff call")
            .with_action(ActionType::Meeting, None)
            .team_action(),
        Milestone::new("content_path_chosen", "onboarding", 3, "Choose a content format")
            .with_action(ActionType::Form, None),
        Milestone::new("agreement_review", "agreement", 1, "Review creator agreement")
            .with_action(ActionType::Link, None),
        Milestone::new("agreement_signed", "agreement", 2, "Sign creator agreement")
            .with_action(ActionType::Signature, None),
        Milestone::new("payout_details", "agreement", 3, "Payout details on file")
            .with_action(ActionType::Form, None),
        Milestone::new("course_outline", "course_design", 1, "Submit course outline")
            .applies_to([Course])
            .with_action(ActionType::Upload, None),
        Milestone::new("outline_approved", "course_design", 2, "Outline approved")
            .applies_to([Course])
            .team_action(),
        Milestone::new("article_outline", "course_design", 3, "Submit article outline")
            .applies_to([Blog]),
        Milestone::new("question_bank", "test_prep", 1, "Draft question bank")
            .applies_to([Course])
            .with_action(ActionType::Upload, None),
        Milestone::new("practice_exam", "test_prep", 2, "Build practice exam")
            .applies_to([Course]),
        Milestone::new("first_draft", "production", 1, "First draft delivered")
            .with_action(ActionType::Upload, None),
        Milestone::new("recording_complete", "production", 2, "Video recording complete")
            .applies_to([Course]),
        Milestone::new("download_packaged", "production", 3, "Download packaged")
            .applies_to([Download])
            .with_action(ActionType::Upload, None),
        Milestone::new("editorial_review", "production", 4, "Editorial review")
            .team_action(),
        Milestone::new("launch_plan", "launch", 1, "Launch plan agreed")
            .with_action(ActionType::Meeting, None),
        Milestone::new("published", "launch", 2, "Content published").team_action(),
        Milestone::new("promo_assets", "launch", 3, "Promo assets shared")
            .applies_to([Blog, Course, Download]),
    ]
}

/// Write the default catalog if the store has no phases yet.
///
/// Returns the number of milestones written (0 when the catalog already
/// existed).
pub async fn seed_if_empty(db: &dyn Database) -> Result<usize, CatalogError> {
    if !db.list_phases().await?.is_empty() {
        return Ok(0);
    }

    let phases = default_phases();
    let milestones = default_milestones();
    validate_catalog(&phases, &milestones)?;

    for phase in &phases {
        db.upsert_phase(phase).await?;
    }
    for milestone in &milestones {
        db.upsert_milestone(milestone).await?;
    }

    info!(
        phases = phases.len(),
        milestones = milestones.len(),
        "Seeded default catalog"
    );
    Ok(milestones.len())
}
