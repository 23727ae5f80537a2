//! Final survey questions and their mapping to trials.
//!
//! Questions 1-8 ask about each image stimulus and are recorded as trials.
//! The free-text questions and the panel id only land in
//! `survey_responses`; the panel id also replaces the participant id.

use std::collections::BTreeMap;

use crate::errors::ExperimentError;
use crate::orchestrator::state::{QuestionType, TrialInput};
use crate::phase::PhaseId;

/// Response key of the participant's recruitment-panel id.
pub const PANEL_ID_KEY: &str = "prolificId";

const PROBABILITY_PROMPT: &str =
    "If you pressed this button 100 times, how many times do you think you would earn points?";
const CONSISTENCY_PROMPT: &str = "How consistently do you think points are earned from this button?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerKind {
    /// Whole number from 0 to 100.
    Count,
    Text,
    /// Required, non-empty.
    PanelId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveyQuestion {
    pub key: &'static str,
    pub prompt: &'static str,
    pub kind: AnswerKind,
    /// Stimulus the question is about.
    pub stimulus: Option<&'static str>,
    /// Set for questions that are also recorded as trials.
    pub question_type: Option<QuestionType>,
    /// Trial number of the recorded trial.
    pub number: u32,
}

const IMAGE_STIMULI: [&str; 4] = ["stimulus-a", "stimulus-b", "stimulus-c", "stimulus-d"];

/// All survey questions in presentation order.
pub fn questions() -> Vec<SurveyQuestion> {
    const PROBABILITY_KEYS: [&str; 4] = ["q1B1", "q1B2", "q1B3", "q1B4"];
    const CONSISTENCY_KEYS: [&str; 4] = ["q2B1", "q2B2", "q2B3", "q2B4"];

    let mut out = Vec::with_capacity(13);
    for (i, (key, stimulus)) in PROBABILITY_KEYS.into_iter().zip(IMAGE_STIMULI).enumerate() {
        out.push(SurveyQuestion {
            key,
            prompt: PROBABILITY_PROMPT,
            kind: AnswerKind::Count,
            stimulus: Some(stimulus),
            question_type: Some(QuestionType::Probability),
            number: i as u32 + 1,
        });
    }
    for (i, (key, stimulus)) in CONSISTENCY_KEYS.into_iter().zip(IMAGE_STIMULI).enumerate() {
        out.push(SurveyQuestion {
            key,
            prompt: CONSISTENCY_PROMPT,
            kind: AnswerKind::Text,
            stimulus: Some(stimulus),
            question_type: Some(QuestionType::Consistency),
            number: i as u32 + 5,
        });
    }

    let free_text = [
        (
            "q3",
            "Which button do you think gives the BEST outcome? (Button 1, Button 2, Button 3, Button 4)",
        ),
        (
            "q4",
            "Which button do you think gives the WORST outcome? (Button 1, Button 2, Button 3, Button 4)",
        ),
        (
            "q5",
            "What strategy did you use to pick between Button 1 and Button 2?",
        ),
        (
            "q6",
            "What strategy did you use to pick between the blue and orange buttons?",
        ),
    ];
    for (i, (key, prompt)) in free_text.into_iter().enumerate() {
        out.push(SurveyQuestion {
            key,
            prompt,
            kind: AnswerKind::Text,
            stimulus: None,
            question_type: None,
            number: i as u32 + 9,
        });
    }

    out.push(SurveyQuestion {
        key: PANEL_ID_KEY,
        prompt: "Enter your Prolific ID",
        kind: AnswerKind::PanelId,
        stimulus: None,
        question_type: None,
        number: 13,
    });
    out
}

/// Check one answer and return it trimmed.
pub fn normalize_answer(question: &SurveyQuestion, answer: &str) -> Result<String, ExperimentError> {
    let answer = answer.trim();
    match question.kind {
        AnswerKind::Count if !answer.is_empty() => match answer.parse::<u32>() {
            Ok(n) if n <= 100 => Ok(n.to_string()),
            _ => Err(ExperimentError::InvalidInput(format!(
                "{}: expected a whole number from 0 to 100, got '{}'",
                question.key, answer
            ))),
        },
        AnswerKind::PanelId if answer.is_empty() => Err(ExperimentError::InvalidInput(
            "a panel id is required to finish".to_string(),
        )),
        _ => Ok(answer.to_string()),
    }
}

/// Trials recorded for a submitted survey, one per rated question.
/// Unanswered questions are recorded without a choice.
pub fn survey_trials(phase: PhaseId, responses: &BTreeMap<String, String>) -> Vec<TrialInput> {
    questions()
        .into_iter()
        .filter_map(|q| {
            let question_type = q.question_type?;
            let mut input = TrialInput::new(phase)
                .numbered(q.number)
                .condition(q.prompt)
                .question(question_type)
                .points(0);
            if let Some(stimulus) = q.stimulus {
                input = input.stimulus(stimulus);
            }
            if let Some(answer) = responses.get(q.key).filter(|a| !a.is_empty()) {
                input = input.choice(answer.as_str());
            }
            Some(input)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_question_order_and_keys() {
        let qs = questions();
        let keys: Vec<&str> = qs.iter().map(|q| q.key).collect();
        assert_eq!(
            keys,
            vec![
                "q1B1", "q1B2", "q1B3", "q1B4", "q2B1", "q2B2", "q2B3", "q2B4", "q3", "q4", "q5",
                "q6", "prolificId"
            ]
        );
        assert_eq!(
            qs.iter().filter(|q| q.question_type.is_some()).count(),
            8
        );
    }

    #[test]
    fn test_count_answers_are_range_checked() {
        let qs = questions();
        let q1 = &qs[0];
        assert_eq!(normalize_answer(q1, " 85 ").unwrap(), "85");
        assert_eq!(normalize_answer(q1, "").unwrap(), "");
        assert!(normalize_answer(q1, "101").is_err());
        assert!(normalize_answer(q1, "lots").is_err());
    }

    #[test]
    fn test_panel_id_required() {
        let qs = questions();
        let panel = qs.last().unwrap();
        assert!(normalize_answer(panel, "   ").is_err());
        assert_eq!(normalize_answer(panel, " abc123 ").unwrap(), "abc123");
    }

    #[test]
    fn test_survey_trials_map_question_types() {
        let mut responses = BTreeMap::new();
        responses.insert("q1B2".to_string(), "90".to_string());
        responses.insert("q2B4".to_string(), "rarely".to_string());
        responses.insert("q3".to_string(), "Button 1".to_string());

        let trials = survey_trials(PhaseId::FinalSurvey, &responses);
        assert_eq!(trials.len(), 8);
        assert!(trials[..4]
            .iter()
            .all(|t| t.question_type == Some(QuestionType::Probability)));
        assert!(trials[4..]
            .iter()
            .all(|t| t.question_type == Some(QuestionType::Consistency)));
        assert_eq!(trials[1].choice.as_deref(), Some("90"));
        assert_eq!(trials[1].stimulus.as_deref(), Some("stimulus-b"));
        assert_eq!(trials[7].choice.as_deref(), Some("rarely"));
        assert_eq!(trials[7].trial_number, Some(8));
        assert_eq!(trials[0].choice, None);
    }
}
