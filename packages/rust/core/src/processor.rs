//! Document → knowledge base pipeline.
//!
//! Each job moves its task record through
//! `queued → parsing → analyzing → merging → completed`, or to `failed` on the
//! first error. The job never returns an error to its submitter; the handle
//! resolves to the terminal status and the record carries the details.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use kbforge_analyzer::{GeminiClient, GenerationSettings, LanguageModel, PhraseExtractor};
use kbforge_knowledge::{KnowledgeBase, SavedArtifact};
use kbforge_parsers::{DocumentExtractor, OfficeExtractor, extract_blocking};
use kbforge_shared::{
    AppConfig, DocumentKind, KbForgeError, MergeMode, Result, TaskId, TaskRecord, TaskStatus,
    TaskUpdate,
};
use kbforge_storage::TaskStore;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{JobHandle, WorkerPool};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A staged upload to process under an existing task id.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub task_id: TaskId,
    /// Staged copy of the document; removed when the job ends.
    pub file_path: PathBuf,
    /// Original file name, recorded as the artifact source.
    pub filename: String,
    pub mode: MergeMode,
    pub credential: String,
    pub model: String,
}

/// A staged upload that still needs a task record.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_path: PathBuf,
    pub filename: String,
    pub mode: MergeMode,
    pub credential: String,
    pub model: String,
}

impl Upload {
    fn into_request(self, task_id: TaskId) -> JobRequest {
        JobRequest {
            task_id,
            file_path: self.file_path,
            filename: self.filename,
            mode: self.mode,
            credential: self.credential,
            model: self.model,
        }
    }
}

/// Tunables shared by every job.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub categories: Vec<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    /// Run load → merge → save one job at a time.
    pub serialize_merges: bool,
}

impl ProcessorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            categories: config.analysis.categories.clone(),
            temperature: config.gemini.temperature,
            max_output_tokens: config.gemini.max_output_tokens,
            serialize_merges: config.executor.serialize_merges,
        }
    }
}

// ---------------------------------------------------------------------------
// DocumentProcessor
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DocumentProcessor {
    store: Arc<dyn TaskStore>,
    pool: Arc<WorkerPool>,
    extractor: Arc<dyn DocumentExtractor>,
    phrases: PhraseExtractor,
    knowledge: Arc<KnowledgeBase>,
    temperature: f32,
    max_output_tokens: u32,
    merge_lock: Option<Arc<Mutex<()>>>,
}

impl DocumentProcessor {
    pub fn new(
        store: Arc<dyn TaskStore>,
        pool: Arc<WorkerPool>,
        extractor: Arc<dyn DocumentExtractor>,
        model: Arc<dyn LanguageModel>,
        knowledge: KnowledgeBase,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            pool,
            extractor,
            phrases: PhraseExtractor::new(model, settings.categories),
            knowledge: Arc::new(knowledge),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            merge_lock: settings.serialize_merges.then(|| Arc::new(Mutex::new(()))),
        }
    }

    /// Wire the production collaborators (Office extractor, Gemini client,
    /// configured artifact path) around `store` and `pool`.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn TaskStore>,
        pool: Arc<WorkerPool>,
    ) -> Result<Self> {
        let model = GeminiClient::new(&config.gemini)?;
        Ok(Self::new(
            store,
            pool,
            Arc::new(OfficeExtractor),
            Arc::new(model),
            KnowledgeBase::new(config.output.artifact_path(), config.output.title.clone()),
            ProcessorSettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    /// Create the `queued` record for `upload` and start processing it.
    ///
    /// Nothing is recorded when the upload fails validation.
    pub async fn enqueue(&self, upload: Upload) -> Result<(TaskId, JobHandle<TaskStatus>)> {
        validate(&upload.filename, &upload.credential, &upload.model)?;

        let task_id = TaskId::new();
        let record = TaskRecord::queued(task_id.clone(), upload.filename.clone());
        self.store.set(&task_id, &record).await?;
        info!(task_id = %task_id, filename = %upload.filename, mode = %upload.mode, "task queued");

        let handle = self.start_job(upload.into_request(task_id.clone()))?;
        Ok((task_id, handle))
    }

    /// Validate `request` and submit it to the worker pool.
    ///
    /// Returns as soon as the job is queued. The task record must already
    /// exist.
    pub fn start_job(&self, request: JobRequest) -> Result<JobHandle<TaskStatus>> {
        let kind = validate(&request.filename, &request.credential, &request.model)?;
        let this = self.clone();
        Ok(self.pool.submit(async move { this.run(request, kind).await }))
    }

    #[instrument(skip_all, fields(task_id = %request.task_id, mode = %request.mode))]
    async fn run(self, request: JobRequest, kind: DocumentKind) -> TaskStatus {
        let _staged = StagedFile(request.file_path.clone());
        let started = Instant::now();
        let id = request.task_id.clone();

        let outcome = match self.pipeline(&request, kind).await {
            Ok(saved) => self
                .store
                .update(&id, TaskUpdate::completed(saved.path, saved.content_size))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!(elapsed_ms, "task completed");
                TaskStatus::Completed
            }
            Err(e) => {
                error!(error = %e, elapsed_ms, "task failed");
                if let Err(store_err) = self.store.update(&id, TaskUpdate::failed(&e)).await {
                    warn!(error = %store_err, "could not record task failure");
                }
                TaskStatus::Failed
            }
        }
    }

    async fn pipeline(&self, request: &JobRequest, kind: DocumentKind) -> Result<SavedArtifact> {
        let id = &request.task_id;

        self.advance(id, TaskStatus::Parsing, "Parsing document...")
            .await?;
        let text = extract_blocking(
            self.extractor.clone(),
            request.file_path.clone(),
            kind.extension().to_string(),
        )
        .await?;

        let chars = text.chars().count();
        self.advance(
            id,
            TaskStatus::Analyzing,
            format!("Parsed document ({chars} characters), analyzing with AI..."),
        )
        .await?;

        let settings = GenerationSettings {
            api_key: request.credential.clone(),
            model: request.model.clone(),
            temperature: self.temperature,
            max_output_tokens: self.max_output_tokens,
        };
        let phrases = self.phrases.extract(&settings, &text).await?;

        self.advance(id, TaskStatus::Merging, "Merging knowledge base...")
            .await?;

        let _merge_guard = match &self.merge_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let content = match request.mode {
            MergeMode::New => phrases,
            MergeMode::Append => {
                let existing = self.knowledge.load_body()?;
                self.phrases
                    .merge_with_existing(&settings, &existing, &phrases)
                    .await?
            }
        };

        let formatted = kbforge_markdown::format(&content);
        self.knowledge.save(&formatted, &request.filename)
    }

    async fn advance(
        &self,
        id: &TaskId,
        status: TaskStatus,
        message: impl Into<String>,
    ) -> Result<()> {
        let message = message.into();
        debug!(stage = %status, %message, "stage transition");
        if !self.store.update(id, TaskUpdate::stage(status, message)).await? {
            warn!(stage = %status, "task record missing or terminal, continuing");
        }
        Ok(())
    }
}

impl std::fmt::Debug for DocumentProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentProcessor")
            .field("store", &self.store.backend_name())
            .field("pool", &self.pool)
            .field("knowledge", &self.knowledge.path())
            .field("serialize_merges", &self.merge_lock.is_some())
            .finish_non_exhaustive()
    }
}

/// Checks that can fail before anything is queued.
fn validate(filename: &str, credential: &str, model: &str) -> Result<DocumentKind> {
    let kind = DocumentKind::require(filename)?;
    if credential.trim().is_empty() {
        return Err(KbForgeError::config("missing API key"));
    }
    if model.trim().is_empty() {
        return Err(KbForgeError::config("missing model name"));
    }
    Ok(kind)
}

/// Removes the staged upload when the job ends, however it ends.
struct StagedFile(PathBuf);

impl Drop for StagedFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!(path = ?self.0, "removed staged upload"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = ?self.0, error = %e, "could not remove staged upload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use kbforge_analyzer::GenerationRequest;
    use kbforge_storage::MemoryTaskStore;

    use super::*;

    const PHRASES: &str = "## Strategic Vocabulary\n### Phrase 1\n**Phrase**: top-level design\n";

    /// Returns fixed text regardless of the file, or fails when told to.
    struct FakeExtractor {
        text: Option<&'static str>,
    }

    impl DocumentExtractor for FakeExtractor {
        fn extract(&self, _path: &Path, _extension: &str) -> Result<String> {
            match self.text {
                Some(text) => Ok(text.to_string()),
                None => Err(KbForgeError::parse("docx document could not be parsed: bad zip")),
            }
        }
    }

    /// Answers extraction prompts with [`PHRASES`] and merge prompts with a
    /// marker; records every prompt.
    #[derive(Default)]
    struct ScriptedModel {
        fail: bool,
        prompts: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if self.fail {
                return Err(KbForgeError::Analysis("quota exceeded".into()));
            }
            if request.prompt.contains("## Existing knowledge base") {
                Ok("## Merged\n\n- combined phrases".into())
            } else {
                Ok(PHRASES.into())
            }
        }
    }

    /// Returns the staged file's text, so each upload carries its own marker.
    struct FileExtractor;

    impl DocumentExtractor for FileExtractor {
        fn extract(&self, path: &Path, _extension: &str) -> Result<String> {
            std::fs::read_to_string(path).map_err(|e| KbForgeError::io(path, e))
        }
    }

    /// Echoes the document as one bullet and merges by appending the new
    /// bullets to the existing body, like a model that keeps everything.
    ///
    /// With `merge_barrier` set, each merge call waits until that many merges
    /// are in flight before answering.
    #[derive(Default)]
    struct AccumulatingModel {
        merge_barrier: Option<tokio::sync::Barrier>,
    }

    fn section<'a>(prompt: &'a str, start: &str, end: &str) -> &'a str {
        let from = prompt.find(start).map_or(0, |at| at + start.len());
        let rest = &prompt[from..];
        rest.find(end).map_or(rest, |at| &rest[..at]).trim()
    }

    #[async_trait]
    impl LanguageModel for AccumulatingModel {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            let prompt = &request.prompt;
            if !prompt.contains("## Existing knowledge base") {
                let content = prompt.rsplit("Document content:\n").next().unwrap_or_default();
                return Ok(format!("- {}\n", content.trim()));
            }

            let existing = section(prompt, "## Existing knowledge base\n", "\n## New content");
            let new = section(prompt, "## New content\n", "\n## Output");
            match &self.merge_barrier {
                Some(barrier) => {
                    barrier.wait().await;
                }
                None => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
            Ok(format!("{existing}\n{new}\n"))
        }
    }

    /// Memory store that also logs every status and message written.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryTaskStore,
        statuses: StdMutex<Vec<TaskStatus>>,
        messages: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskStore for RecordingStore {
        async fn get(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
            self.inner.get(id).await
        }
        async fn set(&self, id: &TaskId, record: &TaskRecord) -> Result<()> {
            self.statuses.lock().unwrap().push(record.status);
            self.inner.set(id, record).await
        }
        async fn update(&self, id: &TaskId, update: TaskUpdate) -> Result<bool> {
            if let Some(status) = update.status {
                self.statuses.lock().unwrap().push(status);
            }
            if let Some(message) = &update.message {
                self.messages.lock().unwrap().push(message.clone());
            }
            self.inner.update(id, update).await
        }
        async fn exists(&self, id: &TaskId) -> Result<bool> {
            self.inner.exists(id).await
        }
        async fn list(&self) -> Result<Vec<TaskRecord>> {
            self.inner.list().await
        }
        async fn delete(&self, id: &TaskId) -> Result<()> {
            self.inner.delete(id).await
        }
        fn backend_name(&self) -> &'static str {
            "recording"
        }
    }

    struct Harness {
        dir: PathBuf,
        store: Arc<RecordingStore>,
        model: Arc<ScriptedModel>,
        processor: DocumentProcessor,
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kbforge-core-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn processor_with(
        dir: &Path,
        store: Arc<dyn TaskStore>,
        extractor: Arc<dyn DocumentExtractor>,
        model: Arc<dyn LanguageModel>,
        serialize_merges: bool,
    ) -> DocumentProcessor {
        let mut settings = ProcessorSettings::from_config(&AppConfig::default());
        settings.serialize_merges = serialize_merges;
        DocumentProcessor::new(
            store,
            Arc::new(WorkerPool::new(2)),
            extractor,
            model,
            KnowledgeBase::new(dir.join("output/knowledge_base.md"), "Project Knowledge Base"),
            settings,
        )
    }

    fn harness(extractor: FakeExtractor, model: ScriptedModel) -> Harness {
        let dir = temp_dir();
        let store = Arc::new(RecordingStore::default());
        let model = Arc::new(model);
        let processor = processor_with(&dir, store.clone(), Arc::new(extractor), model.clone(), true);
        Harness {
            dir,
            store,
            model,
            processor,
        }
    }

    fn stage_upload(dir: &Path, filename: &str, mode: MergeMode) -> Upload {
        let file_path = dir.join(format!("20260116_120000_{filename}"));
        std::fs::write(&file_path, b"PK fake document").unwrap();
        Upload {
            file_path,
            filename: filename.to_string(),
            mode,
            credential: "test-key".into(),
            model: "gemini-2.5-flash-lite".into(),
        }
    }

    async fn run(h: &Harness, upload: Upload) -> (TaskStatus, TaskRecord) {
        let (id, handle) = h.processor.enqueue(upload).await.unwrap();
        let status = handle.wait().await.unwrap();
        let record = h.processor.store().get(&id).await.unwrap().unwrap();
        (status, record)
    }

    #[tokio::test]
    async fn new_mode_completes_with_header() {
        let h = harness(
            FakeExtractor { text: Some("We drive synergy.") },
            ScriptedModel::default(),
        );
        let upload = stage_upload(&h.dir, "report.docx", MergeMode::New);
        let staged = upload.file_path.clone();

        let (status, record) = run(&h, upload).await;

        assert_eq!(status, TaskStatus::Completed);
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.message, "Processing complete");
        assert!(record.completed_at.is_some());
        assert!(record.error.is_none());

        let output = record.output_file.expect("output file recorded");
        let artifact = std::fs::read_to_string(&output).unwrap();
        assert!(artifact.starts_with("---\nmetadata:"));
        assert!(artifact.contains("source: report.docx"));
        assert_eq!(
            record.content_size,
            Some(kbforge_markdown::format(PHRASES).chars().count())
        );
        assert!(!staged.exists());
    }

    #[tokio::test]
    async fn stages_advance_in_order() {
        let h = harness(
            FakeExtractor { text: Some("text") },
            ScriptedModel::default(),
        );
        let (status, _) = run(&h, stage_upload(&h.dir, "deck.pptx", MergeMode::New)).await;
        assert_eq!(status, TaskStatus::Completed);

        let statuses = h.store.statuses.lock().unwrap().clone();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Queued,
                TaskStatus::Parsing,
                TaskStatus::Analyzing,
                TaskStatus::Merging,
                TaskStatus::Completed,
            ]
        );
        assert!(statuses.windows(2).all(|w| w[0].can_transition_to(w[1])));

        let messages = h.store.messages.lock().unwrap().clone();
        assert_eq!(
            messages,
            vec![
                "Parsing document...",
                "Parsed document (4 characters), analyzing with AI...",
                "Merging knowledge base...",
                "Processing complete",
            ]
        );
    }

    #[tokio::test]
    async fn append_merges_with_existing_body() {
        let h = harness(
            FakeExtractor { text: Some("new deck text") },
            ScriptedModel::default(),
        );
        h.processor
            .knowledge()
            .save("## Legacy\n\n- closed loop\n", "report.docx")
            .unwrap();

        let (status, record) =
            run(&h, stage_upload(&h.dir, "report2.pptx", MergeMode::Append)).await;
        assert_eq!(status, TaskStatus::Completed);

        let prompts = h.model.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 2);
        let merge_prompt = &prompts[1];
        assert!(merge_prompt.contains("## Legacy\n\n- closed loop"));
        assert!(merge_prompt.contains("top-level design"));
        // The stale header is stripped before merging
        assert!(!merge_prompt.contains("metadata:"));

        let artifact = std::fs::read_to_string(record.output_file.unwrap()).unwrap();
        assert_eq!(artifact.matches("metadata:").count(), 1);
        assert!(artifact.contains("source: report2.pptx"));
        assert!(artifact.ends_with("## Merged\n\n- combined phrases\n"));
    }

    #[tokio::test]
    async fn append_to_empty_matches_new() {
        let new = harness(FakeExtractor { text: Some("t") }, ScriptedModel::default());
        let append = harness(FakeExtractor { text: Some("t") }, ScriptedModel::default());

        run(&new, stage_upload(&new.dir, "a.docx", MergeMode::New)).await;
        run(&append, stage_upload(&append.dir, "a.docx", MergeMode::Append)).await;

        assert_eq!(
            new.processor.knowledge().load_body().unwrap(),
            append.processor.knowledge().load_body().unwrap()
        );
        // No merge call for an empty knowledge base
        assert_eq!(append.model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn extraction_failure_marks_failed() {
        let h = harness(FakeExtractor { text: None }, ScriptedModel::default());
        let upload = stage_upload(&h.dir, "broken.docx", MergeMode::New);
        let staged = upload.file_path.clone();

        let (status, record) = run(&h, upload).await;

        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(record.status, TaskStatus::Failed);
        let error = record.error.expect("error recorded");
        assert!(error.contains("could not be parsed"));
        assert!(record.message.starts_with("Error: "));
        assert!(record.output_file.is_none());
        assert!(!staged.exists());
        assert!(!h.processor.knowledge().path().exists());
        assert!(h.model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_failure_marks_failed_after_parsing() {
        let h = harness(
            FakeExtractor { text: Some("text") },
            ScriptedModel {
                fail: true,
                ..ScriptedModel::default()
            },
        );
        let (status, record) = run(&h, stage_upload(&h.dir, "a.pptx", MergeMode::New)).await;

        assert_eq!(status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("quota exceeded"));
        let statuses = h.store.statuses.lock().unwrap().clone();
        assert_eq!(
            statuses,
            vec![
                TaskStatus::Queued,
                TaskStatus::Parsing,
                TaskStatus::Analyzing,
                TaskStatus::Failed,
            ]
        );
    }

    #[tokio::test]
    async fn invalid_upload_creates_no_record() {
        let h = harness(FakeExtractor { text: Some("t") }, ScriptedModel::default());

        let mut upload = stage_upload(&h.dir, "notes.pdf", MergeMode::New);
        let err = h.processor.enqueue(upload.clone()).await.unwrap_err();
        assert!(matches!(err, KbForgeError::Config { .. }));

        upload.filename = "notes.docx".into();
        upload.credential = "  ".into();
        let err = h.processor.enqueue(upload.clone()).await.unwrap_err();
        assert!(err.to_string().contains("missing API key"));

        upload.credential = "k".into();
        upload.model = String::new();
        let err = h.processor.enqueue(upload).await.unwrap_err();
        assert!(err.to_string().contains("missing model name"));

        assert!(h.store.list().await.unwrap().is_empty());
    }

    /// Enqueue one append per marker, each staged with the marker as its text.
    async fn append_all(processor: &DocumentProcessor, dir: &Path, markers: &[&str]) {
        let mut handles = Vec::new();
        for (i, marker) in markers.iter().enumerate() {
            let upload = stage_upload(dir, &format!("doc{i}.docx"), MergeMode::Append);
            std::fs::write(&upload.file_path, marker).unwrap();
            handles.push(processor.enqueue(upload).await.unwrap().1);
        }
        for handle in handles {
            assert_eq!(handle.wait().await.unwrap(), TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn concurrent_appends_keep_every_source() {
        let dir = temp_dir();
        let processor = processor_with(
            &dir,
            Arc::new(MemoryTaskStore::default()),
            Arc::new(FileExtractor),
            Arc::new(AccumulatingModel::default()),
            true,
        );
        processor.knowledge().save("## Seed\n\n- seed phrase\n", "seed.docx").unwrap();

        let markers = ["alpha phrase", "bravo phrase", "charlie phrase", "delta phrase"];
        append_all(&processor, &dir, &markers).await;

        let artifact = processor.knowledge().load().unwrap();
        assert_eq!(artifact.matches("metadata:").count(), 1);
        assert!(artifact.contains("- seed phrase"));
        for marker in markers {
            assert_eq!(artifact.matches(marker).count(), 1, "{marker} missing:\n{artifact}");
        }
    }

    #[tokio::test]
    async fn unserialized_appends_lose_a_source() {
        let dir = temp_dir();
        let model = AccumulatingModel {
            merge_barrier: Some(tokio::sync::Barrier::new(2)),
        };
        let processor = processor_with(
            &dir,
            Arc::new(MemoryTaskStore::default()),
            Arc::new(FileExtractor),
            Arc::new(model),
            false,
        );
        processor.knowledge().save("## Seed\n\n- seed phrase\n", "seed.docx").unwrap();

        // Both merges read the seed before either saves.
        let markers = ["alpha phrase", "bravo phrase"];
        append_all(&processor, &dir, &markers).await;

        let artifact = processor.knowledge().load().unwrap();
        assert!(artifact.contains("- seed phrase"));
        let kept = markers.iter().filter(|m| artifact.contains(*m)).count();
        assert_eq!(kept, 1, "expected one lost update:\n{artifact}");
    }
}
