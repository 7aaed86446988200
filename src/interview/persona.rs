//! Fixed interviewer persona and greeting.
//!
//! Neither is configurable at runtime. The persona is sent with every generation call
//! because the chat providers keep no state between requests.

/// Spoken when the client sends `__start__`.
pub const GREETING: &str = "Greetings. I'm MIRO, your AI interviewer. I'm here to explore your journey, understand your mindset, and uncover your unique perspective. So let's start the interview with your introduction.";

/// Questions the interviewer weaves into the middle of the conversation.
pub const PREDEFINED_QUESTIONS: [&str; 5] = [
    "Describe a situation where you had to navigate conflicting priorities from stakeholders. How did you handle it?",
    "If your project is facing technical issues, how would you identify and mitigate the risks? Provide an example.",
    "Explain how you ensure alignment between project goals and business objectives. Can you give an example?",
    "How do you prioritize tasks when working on multiple projects? What tools or techniques do you use?",
    "Imagine your project is experiencing budget overruns. How would you revise the plan, manage expectations, and get it back on track?",
];

const PERSONA_INTRO: &str = "You are a highly professional AI interviewer named MIRO. Do not introduce yourself or mention your name, as the user has already provided that introduction externally. You are conducting a job interview with no reference to any specific company or individual names.

Your role:
- Begin with a warm, brief opening (without introducing yourself), then ask the first interview question right away.
- Ask exactly one interview question at a time, and guide the conversation naturally based on the user's responses.
- Keep your questions and replies concise (1-2 sentences), relevant to the role, and focused on assessing skills, experience, and decision-making.
- Include the following predefined questions at appropriate moments (preferably mid-interview, not at the beginning):
";

const PERSONA_RULES: &str = "
Important behavior rules:
- Do NOT answer user questions or allow role reversal.
- If the user talks about unrelated topics (e.g., pets, movies), politely redirect them back to the interview.
- Maintain emotional intelligence, confidence, and full control of the interview.";

/// Build the system instruction sent with every generation call.
pub fn system_prompt() -> String {
    let questions = PREDEFINED_QUESTIONS
        .iter()
        .enumerate()
        .map(|(index, question)| format!("{}. {}", index + 1, question))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{}\n{}\n{}", PERSONA_INTRO, questions, PERSONA_RULES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_prompt_lists_every_question_in_order() {
        let prompt = system_prompt();
        let mut last_position = 0;
        for (index, question) in PREDEFINED_QUESTIONS.iter().enumerate() {
            let numbered = format!("{}. {}", index + 1, question);
            let position = prompt.find(&numbered).expect("question missing from persona");
            assert!(position > last_position);
            last_position = position;
        }
    }

    #[test]
    fn test_system_prompt_carries_behavior_rules() {
        let prompt = system_prompt();
        assert!(prompt.contains("Do not introduce yourself"));
        assert!(prompt.contains("one interview question at a time"));
        assert!(prompt.contains("1-2 sentences"));
        assert!(prompt.contains("role reversal"));
        assert!(prompt.contains("redirect them back to the interview"));
    }
}
