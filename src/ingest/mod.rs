//! Topic creation from scanned pages or typed text.
//!
//! Uploaded images are written into a [`tempfile::TempDir`] that lives only
//! for the duration of the extraction call, so the files are removed on
//! every exit path, errors included.

pub mod ocr;

pub use ocr::{OcrConfig, OcrError, OcrHealth, PageText, TextExtractor};

#[cfg(feature = "providers")]
pub use ocr::OcrClient;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Classify, ErrorKind};
use crate::store::ContentStore;
use crate::types::{Course, CourseId, Department, DifficultyLevel, NewCourse, NewTopic, Topic, TopicTier};

/// Error type for ingestion.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    /// Topic title is blank.
    #[error("Topic title is required")]
    MissingTitle,
    /// Text content is blank.
    #[error("Text content is required")]
    MissingText,
    /// No images were uploaded.
    #[error("No images uploaded")]
    NoImages,
    /// New course name is blank.
    #[error("Course name is required")]
    MissingCourseName,
    /// Existing course absent or soft-deleted.
    #[error("Course not found: {0}")]
    CourseNotFound(CourseId),
    /// OCR engine failed.
    #[error(transparent)]
    Ocr(#[from] OcrError),
    /// Upload could not be staged.
    #[error("Could not stage upload: {0}")]
    Io(String),
    /// Store error.
    #[error("Store error: {0}")]
    StoreError(String),
}

impl IngestError {
    /// Create a store error from any error type.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreError(e.to_string())
    }
}

impl Classify for IngestError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingTitle | Self::MissingText | Self::NoImages | Self::MissingCourseName => {
                ErrorKind::BadRequest
            }
            Self::CourseNotFound(_) => ErrorKind::NotFound,
            Self::Ocr(e) => e.kind(),
            Self::Io(_) | Self::StoreError(_) => ErrorKind::Internal,
        }
    }
}

/// Where the new topic goes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "course_option", rename_all = "snake_case")]
pub enum CourseChoice {
    /// An existing, live course.
    Existing {
        /// Course id.
        course_id: CourseId,
    },
    /// A course created on the fly.
    New {
        /// Course name.
        name: String,
        /// Department to link, created if absent.
        #[serde(default)]
        department: Option<String>,
    },
}

/// Metadata of the topic to create.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicDraft {
    /// Title.
    pub title: String,
    /// Page range label.
    #[serde(default)]
    pub page_range: String,
    /// Community or premium.
    #[serde(default = "community_tier")]
    pub tier: TopicTier,
    /// Difficulty level.
    #[serde(default)]
    pub difficulty: DifficultyLevel,
}

fn community_tier() -> TopicTier {
    TopicTier::Community
}

/// An uploaded page image.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    /// Client-side file name.
    pub file_name: String,
    /// Image bytes.
    pub bytes: Vec<u8>,
}

/// Header put above one OCR page.
pub fn ocr_page_text(page: &PageText) -> String {
    if page.text.trim().is_empty() {
        return "[No text detected]".to_string();
    }
    format!(
        "[OCR Engine: {} | Confidence: {:.1}%]\n\n{}",
        page.engine_used, page.confidence, page.text
    )
}

/// Join pages as `--- Page N ---` blocks.
pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| format!("--- Page {} ---\n{}\n\n", p.page, ocr_page_text(p)))
        .collect()
}

/// Header put above typed-in text.
pub fn text_input_header(now: DateTime<Utc>) -> String {
    format!(
        "[Source: Direct Text Input | Added: {}]\n\n",
        now.format("%Y-%m-%d %H:%M")
    )
}

fn safe_file_name(idx: usize, name: &str) -> String {
    let base: String = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    format!("page_{}_{}", idx + 1, if base.is_empty() { "upload" } else { &base })
}

/// Run OCR over uploaded images and return the joined page text.
///
/// One image goes through `extract`, several through `extract_batch`.
pub async fn extract_uploads(
    extractor: &dyn TextExtractor,
    images: &[UploadedImage],
) -> Result<String, IngestError> {
    if images.is_empty() {
        return Err(IngestError::NoImages);
    }

    let staging = tempfile::Builder::new()
        .prefix("study-guide-upload-")
        .tempdir()
        .map_err(|e| IngestError::Io(e.to_string()))?;

    let mut paths: Vec<PathBuf> = Vec::with_capacity(images.len());
    for (idx, image) in images.iter().enumerate() {
        let path = staging.path().join(safe_file_name(idx, &image.file_name));
        tokio::fs::write(&path, &image.bytes)
            .await
            .map_err(|e| IngestError::Io(e.to_string()))?;
        paths.push(path);
    }

    let pages = match paths.as_slice() {
        [single] => vec![extractor.extract(single).await?],
        _ => extractor.extract_batch(&paths).await?,
    };
    tracing::info!(images = images.len(), pages = pages.len(), "OCR extraction finished");
    Ok(join_pages(&pages))
}

/// Creates topics from extracted or typed text.
pub struct Ingestor<S: ContentStore> {
    store: Arc<S>,
}

impl<S: ContentStore> Ingestor<S> {
    /// Create an ingestor over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn resolve_course(&self, choice: &CourseChoice) -> Result<Course, IngestError> {
        match choice {
            CourseChoice::Existing { course_id } => self
                .store
                .get_course(*course_id)
                .await
                .map_err(IngestError::from_store)?
                .filter(|c| !c.is_deleted)
                .ok_or(IngestError::CourseNotFound(*course_id)),
            CourseChoice::New { name, department } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(IngestError::MissingCourseName);
                }
                let mut course = NewCourse::named(name);
                if let Some(dept_name) = department.as_deref().and_then(Department::normalize_name) {
                    let dept = self
                        .store
                        .get_or_create_department(&dept_name)
                        .await
                        .map_err(IngestError::from_store)?;
                    course = course.with_department(dept.id);
                }
                let course = self.store.create_course(course).await.map_err(IngestError::from_store)?;
                tracing::info!(course_id = %course.id, name = %course.name, "Created course during ingestion");
                Ok(course)
            }
        }
    }

    /// Create a topic holding `raw_text` at the end of the chosen course.
    pub async fn save_topic(
        &self,
        choice: &CourseChoice,
        draft: &TopicDraft,
        raw_text: String,
    ) -> Result<Topic, IngestError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(IngestError::MissingTitle);
        }
        if raw_text.trim().is_empty() {
            return Err(IngestError::MissingText);
        }

        let course = self.resolve_course(choice).await?;
        let topic = self
            .store
            .create_topic(NewTopic {
                course_id: course.id,
                title: title.to_string(),
                raw_text,
                page_range: draft.page_range.trim().to_string(),
                is_premium: draft.tier.is_premium(),
                difficulty_level: draft.difficulty,
            })
            .await
            .map_err(IngestError::from_store)?;

        tracing::info!(
            topic_id = %topic.id,
            course_id = %course.id,
            premium = topic.is_premium,
            difficulty = %topic.difficulty_level,
            "Topic saved"
        );
        Ok(topic)
    }

    /// OCR the images and save the result as a topic.
    pub async fn ingest_images(
        &self,
        extractor: &dyn TextExtractor,
        images: &[UploadedImage],
        choice: &CourseChoice,
        draft: &TopicDraft,
    ) -> Result<Topic, IngestError> {
        if draft.title.trim().is_empty() {
            return Err(IngestError::MissingTitle);
        }
        let text = extract_uploads(extractor, images).await?;
        self.save_topic(choice, draft, text).await
    }

    /// Save typed-in text as a topic, stamped with the time it was added.
    pub async fn ingest_text(
        &self,
        choice: &CourseChoice,
        draft: &TopicDraft,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Topic, IngestError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(IngestError::MissingText);
        }
        self.save_topic(choice, draft, format!("{}{}", text_input_header(now), text))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryContentStore;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::path::Path;

    /// Records the staged paths and whether they existed during the call.
    #[derive(Default)]
    struct FakeExtractor {
        seen: Mutex<Vec<(PathBuf, bool)>>,
        fail: bool,
    }

    #[async_trait]
    impl TextExtractor for FakeExtractor {
        async fn extract(&self, image: &Path) -> Result<PageText, OcrError> {
            self.seen.lock().push((image.to_path_buf(), image.exists()));
            if self.fail {
                return Err(OcrError::Timeout);
            }
            Ok(PageText {
                page: 1,
                text: "Cell membrane".to_string(),
                engine_used: "EasyOCR".to_string(),
                confidence: 91.25,
            })
        }

        async fn extract_batch(&self, images: &[PathBuf]) -> Result<Vec<PageText>, OcrError> {
            let mut pages = Vec::new();
            for (idx, image) in images.iter().enumerate() {
                self.seen.lock().push((image.clone(), image.exists()));
                pages.push(PageText {
                    page: idx as u32 + 1,
                    text: if idx == 0 { "first".to_string() } else { String::new() },
                    engine_used: "Tesseract".to_string(),
                    confidence: 80.0,
                });
            }
            Ok(pages)
        }

        async fn health(&self) -> OcrHealth {
            OcrHealth {
                ok: true,
                detail: "fake".to_string(),
            }
        }
    }

    fn image(name: &str) -> UploadedImage {
        UploadedImage {
            file_name: name.to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF],
        }
    }

    fn draft(title: &str) -> TopicDraft {
        TopicDraft {
            title: title.to_string(),
            page_range: "1-3".to_string(),
            tier: TopicTier::Premium,
            difficulty: DifficultyLevel::Easy,
        }
    }

    #[tokio::test]
    async fn test_single_image_prefix_and_cleanup() {
        let extractor = FakeExtractor::default();
        let text = extract_uploads(&extractor, &[image("../../etc/page.jpg")]).await.unwrap();

        assert_eq!(
            text,
            "--- Page 1 ---\n[OCR Engine: EasyOCR | Confidence: 91.2%]\n\nCell membrane\n\n"
        );
        let seen = extractor.seen.lock();
        assert!(seen[0].1, "file existed during extraction");
        assert!(!seen[0].0.exists(), "file removed afterwards");
        assert!(seen[0].0.ends_with("page_1_page.jpg"));
    }

    #[tokio::test]
    async fn test_batch_pages_and_empty_text() {
        let extractor = FakeExtractor::default();
        let text = extract_uploads(&extractor, &[image("a.jpg"), image("b.jpg")]).await.unwrap();

        assert!(text.starts_with("--- Page 1 ---\n[OCR Engine: Tesseract | Confidence: 80.0%]\n\nfirst"));
        assert!(text.contains("--- Page 2 ---\n[No text detected]"));
    }

    #[tokio::test]
    async fn test_failed_extraction_still_cleans_up() {
        let extractor = FakeExtractor {
            fail: true,
            ..Default::default()
        };
        let err = extract_uploads(&extractor, &[image("a.jpg")]).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
        assert!(!extractor.seen.lock()[0].0.exists());
    }

    #[tokio::test]
    async fn test_ingest_images_into_new_course() {
        let store = Arc::new(InMemoryContentStore::new());
        let ingestor = Ingestor::new(store.clone());
        let choice = CourseChoice::New {
            name: "BIO 202".to_string(),
            department: Some(" Health Science ".to_string()),
        };

        let topic = ingestor
            .ingest_images(&FakeExtractor::default(), &[image("p.jpg")], &choice, &draft("Cells"))
            .await
            .unwrap();

        assert!(topic.is_premium);
        assert_eq!(topic.difficulty_level, DifficultyLevel::Easy);
        assert!(topic.raw_text.contains("Cell membrane"));
        let dept = store.find_department_by_name("health science").await.unwrap().unwrap();
        let course = store.get_course(topic.course_id).await.unwrap().unwrap();
        assert!(course.in_department(dept.id));
    }

    #[tokio::test]
    async fn test_ingest_text_header_and_order() {
        let store = Arc::new(InMemoryContentStore::new());
        let course = store.create_course(NewCourse::named("BIO")).await.unwrap();
        let ingestor = Ingestor::new(store.clone());
        let choice = CourseChoice::Existing { course_id: course.id };
        let now = Utc.with_ymd_and_hms(2025, 3, 4, 9, 5, 0).unwrap();

        let first = ingestor.ingest_text(&choice, &draft("One"), "  body  ", now).await.unwrap();
        let second = ingestor.ingest_text(&choice, &draft("Two"), "more", now).await.unwrap();

        assert_eq!(
            first.raw_text,
            "[Source: Direct Text Input | Added: 2025-03-04 09:05]\n\nbody"
        );
        assert_eq!((first.order, second.order), (0, 1));
    }

    #[tokio::test]
    async fn test_ingest_validation() {
        let store = Arc::new(InMemoryContentStore::new());
        let course = store.create_course(NewCourse::named("BIO")).await.unwrap();
        store.soft_delete_course(course.id).await.unwrap();
        let ingestor = Ingestor::new(store);
        let now = Utc::now();

        let deleted = CourseChoice::Existing { course_id: course.id };
        let err = ingestor.ingest_text(&deleted, &draft("T"), "x", now).await.unwrap_err();
        assert_eq!(err, IngestError::CourseNotFound(course.id));

        let blank = CourseChoice::New {
            name: " ".to_string(),
            department: None,
        };
        let err = ingestor.ingest_text(&blank, &draft("T"), "x", now).await.unwrap_err();
        assert_eq!(err, IngestError::MissingCourseName);

        let err = ingestor.ingest_text(&deleted, &draft(" "), "x", now).await.unwrap_err();
        assert_eq!(err, IngestError::MissingTitle);

        let err = ingestor.ingest_text(&deleted, &draft("T"), "  ", now).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
