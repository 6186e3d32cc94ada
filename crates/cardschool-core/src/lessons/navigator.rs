//! Lesson navigation: which card a conversation is on, and posting it

use super::catalog::{Lesson, LessonCatalog, LessonError};
use crate::output::{GatedOutput, SendReceipt};
use crate::store::{StateStore, StateStoreExt, keys};
use crate::types::{ConversationId, Participant};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const SUPPORT_LINK: &str = "https://developer.webex.com/support";

/// Stored under [`keys::LESSON_STATE`]. Records carried over from v1 may
/// lack any of the fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LessonState {
    pub current_lesson_index: usize,
    pub previous_lesson_index: usize,
    pub total_lessons: usize,
}

/// What happened when a card was rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Sent { message_id: String },
    /// The gate dropped the card
    Suppressed,
    /// The platform rejected the card; an apology was posted instead
    Failed,
}

pub struct LessonNavigator {
    catalog: Arc<LessonCatalog>,
    store: Arc<dyn StateStore>,
    image_hosting_url: Option<String>,
}

impl LessonNavigator {
    pub fn new(
        catalog: Arc<LessonCatalog>,
        store: Arc<dyn StateStore>,
        image_hosting_url: Option<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            image_hosting_url: image_hosting_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn catalog(&self) -> &LessonCatalog {
        &self.catalog
    }

    /// Stored lesson state, or the zeroed default
    pub fn state(&self, conversation: &ConversationId) -> LessonState {
        match self
            .store
            .get_as::<LessonState>(conversation, keys::LESSON_STATE)
        {
            Ok(Some(state)) => state,
            Ok(None) => LessonState::default(),
            Err(e) => {
                warn!("Failed to read lesson state for {}: {}", conversation, e);
                LessonState::default()
            }
        }
    }

    /// Index of the lesson a conversation is on. Falls back to the intro
    /// lesson when the stored index is out of range.
    pub fn current(&self, conversation: &ConversationId) -> usize {
        let index = self.state(conversation).current_lesson_index;
        if index >= self.catalog.len() {
            error!(
                "Got invalid index for current lesson: {} in {}. Displaying intro lesson",
                index, conversation
            );
            return 0;
        }
        index
    }

    /// Post lesson `index` and make it the conversation's current lesson.
    ///
    /// `viewer` personalizes the graduation card.
    pub async fn render(
        &self,
        output: &GatedOutput,
        index: usize,
        viewer: Option<&Participant>,
    ) -> Result<Rendered, LessonError> {
        let lesson = self
            .catalog
            .get(index)
            .ok_or(LessonError::NoSuchLesson(index))?;
        let conversation = output.conversation();

        let previous = self.state(conversation).current_lesson_index;
        let state = LessonState {
            current_lesson_index: index,
            previous_lesson_index: previous,
            total_lessons: self.catalog.len(),
        };
        if let Err(e) = self
            .store
            .put_as(conversation, keys::LESSON_STATE, &state)
            .await
        {
            error!("Failed to store lesson state for {}: {}", conversation, e);
        }

        let graduation = self.catalog.is_graduation(index);
        let card = if graduation {
            self.personalize(lesson, viewer)
        } else {
            lesson.card.clone()
        };

        debug!("Rendering lesson {} \"{}\" in {}", index, lesson.title(), conversation);
        match output.send_card(&card, &lesson.fallback_text()).await {
            Ok(SendReceipt::Sent { message_id }) => {
                let active = Value::from(message_id.as_str());
                self.remember(conversation, keys::ACTIVE_CARD_MESSAGE_ID, active)
                    .await;
                if graduation {
                    self.remember(conversation, keys::SEEN_GRADUATION, Value::Bool(true))
                        .await;
                }
                Ok(Rendered::Sent { message_id })
            }
            Ok(SendReceipt::Suppressed) => Ok(Rendered::Suppressed),
            Err(e) => {
                let msg = format!("Failed to render {} lesson.", lesson.title());
                error!("{} Error: {:#}", msg, e);
                let apology = format!(
                    "{} Please contact the Webex Developer Support: {}",
                    msg, SUPPORT_LINK
                );
                if let Err(e) = output.send(&apology).await {
                    error!("Failed to post error message to {}: {:#}", conversation, e);
                }
                Ok(Rendered::Failed)
            }
        }
    }

    async fn remember(&self, conversation: &ConversationId, key: &str, value: Value) {
        if let Err(e) = self.store.put(conversation, key, value).await {
            error!("Failed to store {} for {}: {}", key, conversation, e);
        }
    }

    /// Fill the graduation card's `${name}`, `${avatar}` and
    /// `${imageHostingUrl}` bindings
    fn personalize(&self, lesson: &Lesson, viewer: Option<&Participant>) -> Value {
        let hosting = match &self.image_hosting_url {
            Some(url) => url.as_str(),
            None => {
                warn!(
                    "IMAGE_HOSTING_URL is not set; images on \"{}\" will not load",
                    lesson.title()
                );
                ""
            }
        };
        let name = viewer.map(|p| p.label()).unwrap_or("Student");
        let avatar = viewer
            .and_then(|p| p.avatar.clone())
            .unwrap_or_else(|| format!("{}/missing-avatar.jpg", hosting));
        let bindings = [
            ("${name}", name),
            ("${avatar}", avatar.as_str()),
            ("${imageHostingUrl}", hosting),
        ];
        let mut card = lesson.card.clone();
        bind_strings(&mut card, &bindings);
        card
    }
}

fn bind_strings(value: &mut Value, bindings: &[(&str, &str)]) {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                for (token, replacement) in bindings {
                    if s.contains(token) {
                        *s = s.replace(token, replacement);
                    }
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| bind_strings(v, bindings)),
        Value::Object(map) => map.values_mut().for_each(|v| bind_strings(v, bindings)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lessons::catalog::LessonInfo;
    use crate::output::OutputGateway;
    use crate::store::{CachedStore, MemoryBackend};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct CardSink {
        cards: Mutex<Vec<Value>>,
        texts: Mutex<Vec<String>>,
        reject_cards: AtomicBool,
    }

    #[async_trait]
    impl OutputGateway for CardSink {
        async fn send(&self, _: &ConversationId, markdown: &str) -> Result<SendReceipt> {
            self.texts.lock().unwrap().push(markdown.to_string());
            Ok(SendReceipt::Sent { message_id: "text".into() })
        }

        async fn send_card(
            &self,
            _: &ConversationId,
            card: &Value,
            _: &str,
        ) -> Result<SendReceipt> {
            if self.reject_cards.load(Ordering::SeqCst) {
                return Err(anyhow!("400 Bad Request"));
            }
            let mut cards = self.cards.lock().unwrap();
            cards.push(card.clone());
            Ok(SendReceipt::Sent { message_id: format!("card-{}", cards.len()) })
        }

        async fn reply(&self, c: &ConversationId, _: &str, markdown: &str) -> Result<SendReceipt> {
            self.send(c, markdown).await
        }

        async fn direct_message(&self, _: &str, _: &str) -> Result<SendReceipt> {
            unreachable!()
        }

        async fn upload_file(&self, _: &ConversationId, _: &Path) -> Result<SendReceipt> {
            unreachable!()
        }

        async fn exit(&self, _: &ConversationId) -> Result<()> {
            Ok(())
        }
    }

    fn catalog() -> Arc<LessonCatalog> {
        let lessons = ["Welcome", "Buttons", "Graduation"]
            .iter()
            .enumerate()
            .map(|(i, title)| Lesson {
                index: i,
                info: LessonInfo {
                    title: title.to_string(),
                    index: Some(i),
                    content_file: None,
                    custom_handler_file: None,
                },
                card: json!({"body": [
                    {"type": "TextBlock", "text": format!("Congrats ${{name}} on {}", title)},
                    {"type": "Image", "url": "${imageHostingUrl}/cap.png"},
                    {"type": "Image", "url": "${avatar}"}
                ]}),
            })
            .collect();
        Arc::new(LessonCatalog::from_lessons(lessons).unwrap())
    }

    async fn setup() -> (LessonNavigator, GatedOutput, Arc<CardSink>, Arc<CachedStore>) {
        let store = Arc::new(CachedStore::new(Arc::new(MemoryBackend::new())));
        let conv = ConversationId::new("room-1");
        store.load(&conv).await.unwrap();
        let sink = Arc::new(CardSink::default());
        let output = GatedOutput::new(conv, store.clone(), sink.clone());
        let nav =
            LessonNavigator::new(catalog(), store.clone(), Some("https://img.example/".into()));
        (nav, output, sink, store)
    }

    #[tokio::test]
    async fn test_render_tracks_lessons() {
        let (nav, output, _sink, store) = setup().await;
        let conv = output.conversation().clone();

        assert_eq!(
            nav.render(&output, 1, None).await.unwrap(),
            Rendered::Sent { message_id: "card-1".into() }
        );
        nav.render(&output, 0, None).await.unwrap();

        assert_eq!(
            nav.state(&conv),
            LessonState { current_lesson_index: 0, previous_lesson_index: 1, total_lessons: 3 }
        );
        assert_eq!(nav.current(&conv), 0);
        assert_eq!(
            store.get(&conv, keys::ACTIVE_CARD_MESSAGE_ID).unwrap(),
            Some(json!("card-2"))
        );
        assert_eq!(store.get(&conv, keys::SEEN_GRADUATION).unwrap(), None);
    }

    #[tokio::test]
    async fn test_graduation_is_personalized() {
        let (nav, output, sink, store) = setup().await;
        let viewer = Participant::new("ada@example.com", "Ada");

        nav.render(&output, 2, Some(&viewer)).await.unwrap();

        let card = sink.cards.lock().unwrap()[0].clone();
        assert_eq!(card["body"][0]["text"], "Congrats Ada on Graduation");
        assert_eq!(card["body"][1]["url"], "https://img.example/cap.png");
        assert_eq!(card["body"][2]["url"], "https://img.example/missing-avatar.jpg");
        assert_eq!(
            store.get(output.conversation(), keys::SEEN_GRADUATION).unwrap(),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn test_graduation_uses_viewer_avatar() {
        let (nav, output, sink, _store) = setup().await;
        let viewer = Participant::new("ada@example.com", "Ada")
            .with_avatar(Some("https://avatars.example/ada.png".into()));

        nav.render(&output, 2, Some(&viewer)).await.unwrap();
        nav.render(&output, 2, None).await.unwrap();

        let cards = sink.cards.lock().unwrap();
        assert_eq!(cards[0]["body"][2]["url"], "https://avatars.example/ada.png");
        assert_eq!(cards[1]["body"][0]["text"], "Congrats Student on Graduation");
    }

    #[tokio::test]
    async fn test_send_failure_posts_apology() {
        let (nav, output, sink, store) = setup().await;
        sink.reject_cards.store(true, Ordering::SeqCst);

        assert_eq!(nav.render(&output, 1, None).await.unwrap(), Rendered::Failed);
        let texts = sink.texts.lock().unwrap();
        assert!(texts[0].starts_with("Failed to render Buttons lesson."));
        assert!(texts[0].contains(SUPPORT_LINK));
        assert_eq!(store.get(output.conversation(), keys::ACTIVE_CARD_MESSAGE_ID).unwrap(), None);
    }

    #[tokio::test]
    async fn test_resumes_lesson_from_v1_record() {
        let backend = Arc::new(MemoryBackend::new());
        let conv = ConversationId::new("room-1");
        backend
            .insert_raw(
                conv.clone(),
                json!({"_id": "room-1", "currentLessonIndex": 2, "previousLessonIndex": ""}),
            )
            .await;
        let store = Arc::new(CachedStore::new(backend));
        assert_eq!(
            store.load(&conv).await.unwrap(),
            crate::store::LoadOutcome::Migrated { from: 1 }
        );

        let nav = LessonNavigator::new(catalog(), store.clone(), None);
        assert_eq!(nav.current(&conv), 2);
        assert_eq!(
            nav.state(&conv),
            LessonState { current_lesson_index: 2, previous_lesson_index: 0, total_lessons: 0 }
        );
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let (nav, output, _sink, store) = setup().await;
        assert!(matches!(
            nav.render(&output, 9, None).await,
            Err(LessonError::NoSuchLesson(9))
        ));

        let conv = output.conversation();
        store
            .put(
                conv,
                keys::LESSON_STATE,
                json!({"currentLessonIndex": 42, "previousLessonIndex": 0, "totalLessons": 3}),
            )
            .await
            .unwrap();
        assert_eq!(nav.current(conv), 0);
    }
}
