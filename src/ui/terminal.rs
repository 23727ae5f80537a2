use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::blocks::survey::{AnswerKind, SurveyQuestion, normalize_answer};
use crate::export::upload::UploadOutcome;
use crate::orchestrator::runner::ParticipantUi;
use crate::orchestrator::session::{Prompt, Response};
use crate::orchestrator::state::TrialRecord;
use crate::phase::Stimulus;
use crate::ui::icons::{BUTTON, CHECK, CLOCK, CROSS, FOLDER, PIVOT, SPARKLE, UPLOAD};

const CONSENT_TEXT: &str = "\
You are invited to take part in a short study about decisions between
options with uncertain rewards. You will press buttons, earn points and
answer a few questions at the end. Your responses are stored under an
anonymous id. You may stop at any time by pressing Esc.";

const INSTRUCTIONS_TEXT: &str = "\
Each button earns points with its own chance. First you will try every
button, then you will choose between them. Try to earn as many points
as you can.";

/// Participant prompts rendered with `dialoguer`, feedback styled with
/// `console` and interval waits shown as an `indicatif` spinner.
#[derive(Default)]
pub struct TerminalUi {
    spinner: Option<ProgressBar>,
}

impl TerminalUi {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Name shown to the participant for a stimulus id.
pub fn stimulus_label(id: &str) -> String {
    match id.strip_prefix("stimulus-") {
        Some(letter) => format!("Button {}", letter.to_uppercase()),
        None => {
            let mut chars = id.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
    }
}

fn described(stimulus: &Stimulus) -> String {
    format!(
        "{}: {} points with a {:.0}% chance",
        stimulus_label(&stimulus.id),
        stimulus.points,
        stimulus.probability * 100.0
    )
}

fn heading(title: &str) {
    println!();
    println!("{}", style(title).bold().underlined());
    println!();
}

fn score_line(score: Option<i64>) {
    if let Some(score) = score {
        println!("  Score: {}", style(score).cyan().bold());
    }
}

/// Pick one of `items`. `None` when the participant pressed Esc.
fn pick(prompt: &str, items: &[String]) -> Result<Option<usize>> {
    Select::new()
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact_opt()
        .context("Failed to read participant choice")
}

fn choose_between(
    prompt: &str,
    left: &Stimulus,
    right: &Stimulus,
    with_odds: bool,
) -> Result<Option<Response>> {
    let render = |s: &Stimulus| {
        if with_odds {
            described(s)
        } else {
            stimulus_label(&s.id)
        }
    };
    let items = [render(left), render(right)];
    Ok(pick(prompt, &items)?.map(|index| {
        let chosen = if index == 0 { left } else { right };
        Response::Choose(chosen.id.clone())
    }))
}

fn ask_survey(questions: &[SurveyQuestion]) -> Result<BTreeMap<String, String>> {
    let mut answers = BTreeMap::new();
    for question in questions {
        let mut prompt = question.prompt.to_string();
        if let Some(stimulus) = question.stimulus {
            prompt = format!("[{}] {}", stimulus_label(stimulus), prompt);
        }
        if question.kind == AnswerKind::Count {
            prompt.push_str(" (0-100)");
        }

        let check = question.clone();
        let answer: String = Input::new()
            .with_prompt(prompt)
            .allow_empty(question.kind != AnswerKind::PanelId)
            .validate_with(move |input: &String| -> Result<(), String> {
                normalize_answer(&check, input)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .interact_text()
            .context("Failed to read survey answer")?;
        answers.insert(question.key.to_string(), answer);
    }
    Ok(answers)
}

impl ParticipantUi for TerminalUi {
    fn ask(&mut self, prompt: &Prompt) -> Result<Option<Response>> {
        match prompt {
            Prompt::Consent { title } => {
                heading(title);
                println!("{}", CONSENT_TEXT);
                println!();
                let agreed = Confirm::new()
                    .with_prompt("Do you agree to take part?")
                    .default(false)
                    .interact_opt()
                    .context("Failed to read consent")?;
                Ok((agreed == Some(true)).then_some(Response::Agree))
            }
            Prompt::Instructions { title } => {
                heading(title);
                println!("{}", INSTRUCTIONS_TEXT);
                println!();
                let items = ["Start".to_string()];
                Ok(pick("Ready?", &items)?.map(|_| Response::Continue))
            }
            Prompt::Forced {
                title,
                stimulus,
                press,
                presses,
                score,
            } => {
                if *press == 1 {
                    heading(title);
                }
                score_line(*score);
                let items = [format!("{}{}", BUTTON, stimulus_label(&stimulus.id))];
                let prompt = format!("Press {} of {}", press, presses);
                Ok(pick(&prompt, &items)?.map(|_| Response::Press))
            }
            Prompt::Gate {
                title,
                left,
                right,
                question,
                questions,
                attempt,
                max_attempts,
            } => {
                if *question == 1 {
                    heading(title);
                    println!(
                        "  {}",
                        style(format!("Attempt {} of {}", attempt, max_attempts)).dim()
                    );
                }
                let prompt = format!("Question {} of {}: which button is better?", question, questions);
                choose_between(&prompt, left, right, false)
            }
            Prompt::Choice {
                title,
                left,
                right,
                trial_number,
                trials,
                score,
            } => {
                if *trial_number == 1 {
                    heading(title);
                }
                score_line(*score);
                let prompt = format!("Choice {} of {}", trial_number, trials);
                choose_between(&prompt, left, right, false)
            }
            Prompt::Description { title, left, right } => {
                heading(title);
                choose_between("Which would you prefer?", left, right, true)
            }
            Prompt::Survey { title, questions } => {
                heading(title);
                Ok(Some(Response::Survey(ask_survey(questions)?)))
            }
            // Driven by the runner, never asked.
            Prompt::Interval { .. } | Prompt::Completion { .. } => Ok(None),
        }
    }

    fn show_outcome(&mut self, trial: &TrialRecord, score: Option<i64>) {
        match (trial.outcome, trial.points) {
            (Some(true), Some(points)) if points > 0 => {
                println!("  {}{}", CHECK, style(format!("+{} points", points)).green().bold())
            }
            (Some(true), _) => println!("  {}{}", CHECK, style("Success").green()),
            _ => println!("  {}{}", CROSS, style("No points").red()),
        }
        score_line(score);
    }

    fn wait_started(&mut self, title: &str, delay: Duration) {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner} {msg} {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("{}{} ({}s)", CLOCK, title, delay.as_secs()));
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    fn wait_finished(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn notice(&mut self, message: &str) {
        println!("  {}{}", PIVOT, style(message).yellow());
    }

    fn completed(&mut self, participant_id: &str, total_score: i64, countdown: Duration) {
        heading("Thank you!");
        println!("  {}You have finished the study.", SPARKLE);
        println!("  Participant: {}", style(participant_id).bold());
        println!("  Final score: {}", style(total_score).cyan().bold());
        println!(
            "  {}Saving your responses. This window closes in {} seconds.",
            UPLOAD,
            countdown.as_secs()
        );
    }

    fn upload_result(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Uploaded(receipt) => {
                println!("  {}Responses saved as {}", CHECK, receipt.file_name)
            }
            UploadOutcome::SavedLocally { path, error } => {
                println!("  {}{}", CROSS, style(format!("Upload failed: {}", error)).red());
                println!("  {}Saved a copy to {}", FOLDER, path.display());
            }
            UploadOutcome::Deferred { path } => {
                println!("  {}Saved a copy to {}", FOLDER, path.display())
            }
            UploadOutcome::Lost {
                error,
                fallback_error,
            } => {
                eprintln!("  {}Upload failed: {}", CROSS, error);
                eprintln!("  {}Local copy failed: {:#}", CROSS, fallback_error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stimulus_labels() {
        assert_eq!(stimulus_label("stimulus-a"), "Button A");
        assert_eq!(stimulus_label("blue"), "Blue");
        assert_eq!(stimulus_label(""), "");
    }

    #[test]
    fn test_described_stimulus() {
        let s = Stimulus::new("stimulus-b", 0.85, 100);
        assert_eq!(described(&s), "Button B: 100 points with a 85% chance");
    }
}
