//! Lesson cards, navigation and the text/button inputs that drive them

pub mod actions;
pub mod catalog;
pub mod commands;
pub mod navigator;

pub use actions::SubmitAction;
pub use catalog::{Lesson, LessonCatalog, LessonError, LessonInfo};
pub use commands::{Command, help_text};
pub use navigator::{LessonNavigator, LessonState, Rendered};
