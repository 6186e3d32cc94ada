//! Generated lesson cards loaded from disk

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const LESSON_LIST_FILE: &str = "lesson-list.json";

#[derive(Debug, Error)]
pub enum LessonError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("lesson list in {0} is empty")]
    Empty(PathBuf),
    #[error("lesson {index} ({title}) has no card body")]
    NotACard { index: usize, title: String },
    #[error("no lesson with index {0}")]
    NoSuchLesson(usize),
}

/// One entry of `lesson-list.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonInfo {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_handler_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Lesson {
    pub index: usize,
    pub info: LessonInfo,
    /// Adaptive card JSON posted as the message attachment
    pub card: Value,
}

impl Lesson {
    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn fallback_text(&self) -> String {
        format!(
            "If you see this your client cannot render the card for {}. \
             Try using a different Webex Teams client with this bot.",
            self.info.title
        )
    }
}

/// Every lesson, in presentation order. The last one is the graduation card.
#[derive(Debug, Clone)]
pub struct LessonCatalog {
    lessons: Vec<Lesson>,
}

impl LessonCatalog {
    /// Read `lesson-list.json` and each `lesson-{i}.json` from `dir`
    pub fn load(dir: &Path) -> Result<Self, LessonError> {
        let list_path = dir.join(LESSON_LIST_FILE);
        let infos: Vec<LessonInfo> = read_json(&list_path)?;
        info!("Reading in {} lessons from {}", infos.len(), dir.display());

        let mut lessons = Vec::with_capacity(infos.len());
        for (i, info) in infos.into_iter().enumerate() {
            let path = dir.join(format!("lesson-{}.json", i));
            debug!("{} is being loaded from {}", info.title, path.display());
            let card: Value = read_json(&path)?;
            lessons.push(Lesson { index: i, info, card });
        }
        Self::from_lessons(lessons).map_err(|e| match e {
            LessonError::Empty(_) => LessonError::Empty(list_path),
            other => other,
        })
    }

    pub fn from_lessons(lessons: Vec<Lesson>) -> Result<Self, LessonError> {
        if lessons.is_empty() {
            return Err(LessonError::Empty(PathBuf::new()));
        }
        for lesson in &lessons {
            if !lesson.card.is_object() {
                return Err(LessonError::NotACard {
                    index: lesson.index,
                    title: lesson.info.title.clone(),
                });
            }
        }
        Ok(Self { lessons })
    }

    pub fn get(&self, index: usize) -> Option<&Lesson> {
        self.lessons.get(index)
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    /// Never true for a loaded catalog
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    pub fn last_index(&self) -> usize {
        self.lessons.len().saturating_sub(1)
    }

    pub fn is_graduation(&self, index: usize) -> bool {
        index == self.last_index()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lesson> {
        self.lessons.iter()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, LessonError> {
    let content = std::fs::read_to_string(path).map_err(|source| LessonError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| LessonError::Json {
        path: path.to_path_buf(),
        source,
    })
}
