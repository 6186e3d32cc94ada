//! Classification of Action.Submit button presses

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitAction {
    /// "Next lesson" or "pick another lesson"
    Navigate(usize),
    /// Free-text feedback typed into lesson `lesson`
    Feedback { lesson: Option<usize>, text: String },
    ShowCardSource { lesson: Option<usize> },
    /// A navigation button whose target index is unusable
    BadIndex { field: &'static str, value: Value },
    Unhandled,
}

impl SubmitAction {
    pub fn classify(inputs: &Map<String, Value>) -> Self {
        if truthy(inputs.get("nextLesson")) {
            return navigate(inputs, "lessonIndex");
        }
        if truthy(inputs.get("pickAnotherLesson")) {
            return navigate(inputs, "jumpToLessonIndex");
        }

        let lesson = inputs.get("myCardIndex").and_then(parse_index);
        if let Some(text) = inputs.get("feedback").filter(|v| truthy(Some(v))) {
            let text = match text {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return SubmitAction::Feedback { lesson, text };
        }
        if truthy(inputs.get("showCardSource")) {
            return SubmitAction::ShowCardSource { lesson };
        }
        SubmitAction::Unhandled
    }
}

fn navigate(inputs: &Map<String, Value>, field: &'static str) -> SubmitAction {
    let value = inputs.get(field).cloned().unwrap_or(Value::Null);
    match parse_index(&value) {
        Some(index) => SubmitAction::Navigate(index),
        None => SubmitAction::BadIndex { field, value },
    }
}

/// Card inputs arrive as strings, but hand-built payloads may use numbers
pub fn parse_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| usize::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Input.Toggle and hidden inputs send "true"/"false" strings
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty() && s != "false",
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}
