//! Text commands the bot understands

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    StartOver,
    /// Show a specific lesson; always in range
    Lesson(usize),
    /// Looked like a lesson request but named no valid lesson
    Unrecognized,
    /// Anything else re-renders the current lesson
    Resend,
}

impl Command {
    /// Interpret a message's text against a catalog of `lesson_count` lessons
    pub fn parse(text: &str, lesson_count: usize) -> Self {
        let lower = text.to_lowercase();
        if lower.contains("help") {
            return Command::Help;
        }
        if lower.contains("start over") {
            return Command::StartOver;
        }
        let lesson = Regex::new(r"(?i)\blesson\s+(\S+)").ok();
        if let Some(caps) = lesson.as_ref().and_then(|re| re.captures(text)) {
            return match caps[1].parse::<usize>() {
                Ok(n) if n < lesson_count => Command::Lesson(n),
                _ => Command::Unrecognized,
            };
        }
        Command::Resend
    }
}

pub fn help_text(lesson_count: usize) -> String {
    format!(
        "This bot provides Webex Teams users and developers with an opportunity to experience \
[Buttons and Cards](https://developer.webex.com/docs/api/guides/cards) and to learn more about them.\n\n\
Through a series of lessons, presented using Buttons and Cards, users will experience working with Cards, \
learn about how they are created and gain access to more resources to take their learning further.\n\n\
Most interaction takes place via buttons and cards but I do support a few text commands:\n\n\
* **help** - will present this message again\n\
* **lesson X** - show card for a lesson, X is a digit: 0 - {}\n\
* **start over** - will bring up the first lesson\n\
* any other text input will re-render the current lesson card.",
        lesson_count.saturating_sub(1)
    )
}
