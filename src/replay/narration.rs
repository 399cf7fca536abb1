use anyhow::Result;
use log::info;

use crate::{
    log_warn,
    models::{RoundAction, RoundStep},
};

const ENABLE_LOGS: bool = true;

pub const NARRATION_LOCALE: &str = "fr-FR";

/// Text-to-speech engine. Calls are fire-and-forget from the replay's side.
pub trait Narrator: Send + Sync {
    fn speak(&self, sentence: &str, locale: &str) -> Result<()>;

    /// Stops whatever is being spoken.
    fn cancel(&self);
}

/// Spoken instruction for the step at `position` (0-based) out of `total`.
pub fn instruction_sentence(step: &RoundStep, position: usize, total: usize) -> String {
    let instruction = match step.action {
        RoundAction::Forward => "Avancez tout droit.",
        RoundAction::Backward => "Reculez.",
        RoundAction::Left => "Tournez à gauche.",
        RoundAction::Right => "Tournez à droite.",
        RoundAction::Walk => "Continuez à marcher.",
        RoundAction::CheckPoints => "Vérifiez les pointeaux.",
        RoundAction::Door => "Vérifiez la porte.",
        RoundAction::Floor => "Vérifiez l'étage.",
        RoundAction::Position => "Marquez votre position.",
    };

    let mut sentence = format!("Étape {} sur {}. {}", position + 1, total, instruction);
    if step.action.is_movement() && step.steps > 0 {
        sentence.push_str(&format!(" {} pas.", step.steps));
    }
    sentence
}

/// Hands the sentence to the narrator; failures are logged and dropped.
pub fn narrate(narrator: &dyn Narrator, step: &RoundStep, position: usize, total: usize) {
    let sentence = instruction_sentence(step, position, total);
    if let Err(err) = narrator.speak(&sentence, NARRATION_LOCALE) {
        log_warn!("Narration failed, continuing silently: {err:#}");
    }
}

/// Writes sentences to the log instead of speaking them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNarrator;

impl Narrator for LogNarrator {
    fn speak(&self, sentence: &str, locale: &str) -> Result<()> {
        info!("[{locale}] {sentence}");
        Ok(())
    }

    fn cancel(&self) {}
}
