/// Prompt templates and fixed user-facing texts
///
/// The panelist bot asks the retrieval QA chain to evaluate a pitch three
/// times, once per personality. The prefect bot sends the user's question
/// as-is, so it only needs its welcome text here.

use anyhow::{bail, Result};

use crate::config::BotKind;

/// Text template with `{name}` placeholders
///
/// `{{` and `}}` produce literal braces.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    template: String,
    input_variables: Vec<String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>, input_variables: &[&str]) -> Self {
        Self {
            template: template.into(),
            input_variables: input_variables.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn input_variables(&self) -> &[String] {
        &self.input_variables
    }

    /// Substitute every placeholder with the matching value
    ///
    /// # Errors
    /// Fails when a declared variable is missing from `values`, when `values`
    /// names an undeclared variable, or when the template is malformed.
    pub fn format(&self, values: &[(&str, &str)]) -> Result<String> {
        for (name, _) in values {
            if !self.input_variables.iter().any(|v| v == name) {
                bail!("Unexpected prompt variable '{}'", name);
            }
        }
        for declared in &self.input_variables {
            if !values.iter().any(|(name, _)| name == declared) {
                bail!("Missing prompt variable '{}'", declared);
            }
        }

        let mut out = String::with_capacity(self.template.len());
        let mut chars = self.template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(ch) => name.push(ch),
                            None => bail!("Unclosed placeholder '{{{}' in prompt template", name),
                        }
                    }
                    match values.iter().find(|(n, _)| *n == name) {
                        Some((_, value)) => out.push_str(value),
                        None => bail!("Template placeholder '{}' is not a declared variable", name),
                    }
                }
                '}' => bail!("Single '}}' in prompt template"),
                other => out.push(other),
            }
        }

        Ok(out)
    }
}

const PANELIST_TEMPLATE: &str = r#"I want you to act as a tech startup competition panelist or judge.
Adopt the following personality and characteristics:
{personality}

Do an evaluation of the overall pitch and business model and highlight gaps. If there are big gaps, state outright that the pitch needs improvement.

Write an evaluation and score or grade (from 0-10) the pitch based on these items:

- Business Model (esp. value proposition, customer segments, revenue stream, customer channels) (score 1-10 depending on clarity and completeness)
- What sets the business apart? What are the key differentiators? (Score 1-10 depending on clarity and soundness.)
- Market potential: TAM, SAM, SOM. Is it clear that the founding team knows what these are? Are the SOM targets appropriate for the geographic area cited (if any)? Are the numbers stated in monetary amounts, or simple customer counts? Note that these should be in monetary values. (score 1-10 depending on completeness and soundness)
- Co-founders and founder-market fit. Who are the co-founders? What is the role of each? Is there a Co-founders' Agreement in place? Is there someone in the team who can build this? (Score 1-10 depending on clarity and competitiveness. Score close to 0 if co-founders are not explained nor mentioned.)
- Has the team performed any sort of market validation (pre-sell, survey, concierge, or other techniques such as wizard-of-oz)?(Score 0-10, with 10 being the most convincing demonstration or assertion of market validation performed).
- Stage in the prototyping or MVP phase (Score 1-10, with 10 closest to completeness of MVP.)

Ex. Business Model (5/10), Differentiator (5/10), ...

Calibrate the scores based on personality. For example, a harsh judge will give lower scores (closer to 0) than usual.
Clearly state the individual scores after each item and explain why.
Keep track of a cumulative score. The final score based on the average of the individual scores in the end.

Answer the following questions but state and summarize all in paragraph form:
- Is the business described B2B or B2C? What are the challenges related to this?
- Is it clear what problem is being solved, and who has the problem? Are these problems well-known by those in the industry?
- What industry or vertical does the business fall under? Is the space crowded? What other companies are known to address this problem?
- Are there any business model patterns the founding team needs to study more carefully?
- Has the team demonstrated compelling market validation?

Explain areas for improvement. Do you have tips on improving the business model? How would you rewrite the pitch to make it score at least an 8/10?

Do not make things up. Clearly state that information is lacking if not specified.

If things are not clear, ask!

Q1: <question 1>
...

Evaluate their pitch:
{pitch}"#;

/// The pitch evaluation prompt, with `personality` and `pitch` variables
pub fn panelist_template() -> PromptTemplate {
    PromptTemplate::new(PANELIST_TEMPLATE, &["personality", "pitch"])
}

/// Judging styles of the three panelists, in the order they respond
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Personality {
    Harsh,
    Inquisitive,
    Optimistic,
}

impl Personality {
    pub const PANEL: [Personality; 3] = [
        Personality::Harsh,
        Personality::Inquisitive,
        Personality::Optimistic,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            Personality::Harsh => "\
- Your personality is harsh, brutal, frank, and blunt.
- You have decades of experience in industry.
- You are harsh, blunt, and abrasive at times, but fair.
- You dislike claims that are not substantiated.
- You dislike stylish pitches that are not accompanied by substance.
- You focus on weaknesses in the pitch.
- You do not suggest improvements.
- You tend to give low scores.",
            Personality::Inquisitive => "\
- Your personality is neutral but inquisitive.
- If a claim is not substantiated, you ask them to consider how they might find evidence for their claim.
- You focus on substance and ignore style.
- If you find weaknesses in the pitch, you ask them to expound on their thought process.
- You genuinely want to help the startup team.",
            Personality::Optimistic => "\
- Your personality is optimistic.
- You have only a few years of experience in industry.
- You are optimistic about the merits of ideas.
- You focus on opportunities available to the group.
- You acknowledge weaknesses in the pitch, but you suggest improvements.
- You offer to help even outside the pitch.
- You tend to give high scores.",
        }
    }
}

/// Build the evaluation prompt for one panelist
pub fn panelist_prompt(personality: Personality, pitch: &str) -> Result<String> {
    panelist_template().format(&[
        ("personality", personality.description()),
        ("pitch", pitch),
    ])
}

pub fn welcome_message(kind: BotKind) -> &'static str {
    match kind {
        BotKind::Panelist => "Welcome to the ITE start-up training center. Send your pitch here to get it evaluated by our AI panelists.",
        BotKind::Prefect => "Hello! I can answer your questions about the Ateneo de Manila University Student Handbook.",
    }
}

pub const PANELIST_INTRO: &str = "Thank you for your pitch. We have three panelists with us today. Please give them some time to review your pitch.";

pub const PANELIST_CLOSING: &str = "All panelists have responded. We hope their feedback will help you gain insight into your pitch.";

pub const ERROR_APOLOGY: &str = "Sorry! We encountered an error. Please let the administrators know.";

/// Heading plus answer for the n-th panelist (1-based)
pub fn panelist_feedback(number: usize, answer: &str) -> String {
    format!("Here is Panelist {}'s feedback.\n\n{}", number, answer)
}

const QA_SYSTEM_INSTRUCTIONS: &str = "Use the following pieces of context to answer the user's question. \n\
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\
----------------\n";

/// System message for the "stuff" retrieval QA chain
pub fn qa_system_prompt(context_chunks: &[String]) -> String {
    format!("{}{}", QA_SYSTEM_INSTRUCTIONS, context_chunks.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_substitutes_all_placeholders() {
        let template = PromptTemplate::new("Hi {name}, you are {age}. {{literal}}", &["name", "age"]);
        let text = template.format(&[("age", "30"), ("name", "Ana")]).unwrap();
        assert_eq!(text, "Hi Ana, you are 30. {literal}");
    }

    #[test]
    fn test_format_rejects_missing_and_unknown_variables() {
        let template = PromptTemplate::new("{a} and {b}", &["a", "b"]);
        assert!(template.format(&[("a", "1")]).is_err());
        assert!(template.format(&[("a", "1"), ("b", "2"), ("c", "3")]).is_err());
    }

    #[test]
    fn test_format_rejects_undeclared_placeholder() {
        let template = PromptTemplate::new("{a} and {b}", &["a"]);
        assert!(template.format(&[("a", "1")]).is_err());
    }

    #[test]
    fn test_format_rejects_unclosed_placeholder() {
        let template = PromptTemplate::new("{a", &["a"]);
        assert!(template.format(&[("a", "1")]).is_err());
    }

    #[test]
    fn test_panelist_prompt_contains_personality_and_pitch() {
        let pitch = "We sell {curly} water bottles to hikers.";
        let prompt = panelist_prompt(Personality::Optimistic, pitch).unwrap();

        assert!(prompt.starts_with("I want you to act as a tech startup competition panelist"));
        assert!(prompt.contains("- Your personality is optimistic."));
        assert!(prompt.ends_with(&format!("Evaluate their pitch:\n{}", pitch)));
        assert!(!prompt.contains("{personality}"));
    }

    #[test]
    fn test_panel_order_and_distinct_descriptions() {
        let descriptions: Vec<_> = Personality::PANEL.iter().map(|p| p.description()).collect();
        assert!(descriptions[0].contains("harsh"));
        assert!(descriptions[1].contains("inquisitive"));
        assert!(descriptions[2].contains("optimistic"));
    }

    #[test]
    fn test_panelist_feedback_heading() {
        assert_eq!(
            panelist_feedback(2, "Solid."),
            "Here is Panelist 2's feedback.\n\nSolid."
        );
    }

    #[test]
    fn test_qa_system_prompt_joins_chunks() {
        let prompt = qa_system_prompt(&["one".to_string(), "two".to_string()]);
        assert!(prompt.ends_with("----------------\none\n\ntwo"));
    }
}
