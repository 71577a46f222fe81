//! Run Manager implementation
//!
//! Entry point for callers: creates runs, persists uploads and extracted
//! records, drives the workflow engine in the background or inline, and serves
//! status and artefacts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::domain::{ArtefactRole, DocumentKind, ExtractedRecord, FailureReason, Run};
use crate::error::{AgentError, Result};
use crate::extraction::{Extractor, RecordFileExtractor, SourceDocument};
use crate::llm::{LlmClient, build_client};
use crate::storage::{ArtefactStore, FsArtefactStore, RunStore, sanitize_file_name};
use crate::workflow::{CancelToken, WorkflowEngine};

/// Per-run options supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configured target language
    pub target_language: Option<String>,
}

impl RunOptions {
    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            target_language: Some(language.into()),
        }
    }
}

/// A run executing in this process
struct ActiveRun {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

pub struct RunManager {
    engine: Arc<WorkflowEngine>,
    store: Arc<dyn ArtefactStore>,
    runs: Arc<RunStore>,
    extractor: Arc<dyn Extractor>,
    default_language: String,
    active: Arc<RwLock<HashMap<String, ActiveRun>>>,
}

impl RunManager {
    pub fn new(
        config: &Config,
        store: Arc<dyn ArtefactStore>,
        runs: Arc<RunStore>,
        llm: Arc<dyn LlmClient>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        let engine = WorkflowEngine::new(config, store.clone(), runs.clone(), llm);
        Self::with_engine(config, engine, store, runs, extractor)
    }

    /// Use a pre-built engine (custom stage list or prompts)
    pub fn with_engine(
        config: &Config,
        engine: WorkflowEngine,
        store: Arc<dyn ArtefactStore>,
        runs: Arc<RunStore>,
        extractor: Arc<dyn Extractor>,
    ) -> Self {
        Self {
            engine: Arc::new(engine),
            store,
            runs,
            extractor,
            default_language: config.workflow.target_language.clone(),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Filesystem store, configured model backend, record-file extraction
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(FsArtefactStore::new(
            &config.storage.data_root,
            &config.storage.artefact_root,
        )?);
        let runs = Arc::new(RunStore::new(&config.storage.data_root));
        let llm = build_client(&config.llm)?;
        Ok(Self::new(config, store, runs, llm, Arc::new(RecordFileExtractor::new())))
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Validate inputs, persist uploads and extracted records, and return the
    /// still-pending run, ready for the engine.
    async fn prepare(
        &self,
        contract: Option<SourceDocument>,
        invoice: Option<SourceDocument>,
        options: RunOptions,
    ) -> Result<Run> {
        let contract = contract
            .filter(SourceDocument::is_present)
            .ok_or_else(|| AgentError::Extraction("contract document is missing".to_string()))?;
        let invoice = invoice
            .filter(SourceDocument::is_present)
            .ok_or_else(|| AgentError::Extraction("invoice document is missing".to_string()))?;

        let language = options
            .target_language
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.default_language.clone());
        let mut run = Run::new(language);
        self.runs.save(&run)?;
        log::info!("created run {} (target language {})", run.id, run.target_language);

        // From here on the run exists on disk; any failure must leave it failed
        if let Err(err) = self.persist_inputs(&run.id, &contract, &invoice) {
            log::warn!("preparing run {} failed: {}", run.id, err);
            run.fail(FailureReason::from(&err), None, err.to_string())?;
            self.runs.save(&run)?;
            return Err(err);
        }
        Ok(run)
    }

    /// Raw uploads, then the extracted records
    fn persist_inputs(&self, run_id: &str, contract: &SourceDocument, invoice: &SourceDocument) -> Result<()> {
        let contract_name = upload_name(contract, DocumentKind::Contract);
        let mut invoice_name = upload_name(invoice, DocumentKind::Invoice);
        if invoice_name == contract_name {
            invoice_name = format!("invoice-{}", invoice_name);
        }
        self.store
            .put_named(run_id, ArtefactRole::RawContract, Some(&contract_name), &contract.bytes)?;
        self.store
            .put_named(run_id, ArtefactRole::RawInvoice, Some(&invoice_name), &invoice.bytes)?;

        let contract_record = self.extractor.extract_contract(contract)?;
        let invoice_record = self.extractor.extract_invoice(invoice)?;

        self.persist_record(run_id, ArtefactRole::ContractRecord, &contract_record)?;
        self.persist_record(run_id, ArtefactRole::InvoiceRecord, &invoice_record)?;
        Ok(())
    }

    fn persist_record(&self, run_id: &str, role: ArtefactRole, record: &ExtractedRecord) -> Result<()> {
        let yaml = serde_yaml::to_string(record)?;
        self.store.put(run_id, role, yaml.as_bytes())?;
        Ok(())
    }

    /// Start a run in the background and return its id.
    ///
    /// Both documents must be present; otherwise `Extraction` is returned
    /// before anything is written or any model call is made.
    pub async fn start_run(
        &self,
        contract: Option<SourceDocument>,
        invoice: Option<SourceDocument>,
        options: RunOptions,
    ) -> Result<String> {
        let mut run = self.prepare(contract, invoice, options).await?;
        let run_id = run.id.clone();
        let cancel = CancelToken::new();

        // Registered before spawning so cancel_run and wait see it immediately
        let mut active = self.active.write().await;
        active.insert(
            run_id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                handle: None,
            },
        );

        let engine = self.engine.clone();
        let registry = self.active.clone();
        let runs = self.runs.clone();
        let id = run_id.clone();
        let handle = tokio::spawn(async move {
            // Inner task so a panicking stage still releases the registry entry
            let task = tokio::spawn(async move { engine.execute(&mut run, &cancel).await });
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("run {} ended with error: {}", id, e),
                Err(e) => {
                    log::error!("run {} task aborted: {}", id, e);
                    mark_aborted(&runs, &id, &e.to_string());
                }
            }
            registry.write().await.remove(&id);
        });
        if let Some(entry) = active.get_mut(&run_id) {
            entry.handle = Some(handle);
        }
        drop(active);

        Ok(run_id)
    }

    /// Execute a run inline and return its final state. A run that fails in a
    /// stage is still returned; inspect `status` and `failure`.
    pub async fn run(
        &self,
        contract: Option<SourceDocument>,
        invoice: Option<SourceDocument>,
        options: RunOptions,
    ) -> Result<Run> {
        self.run_with_cancel(contract, invoice, options, CancelToken::new())
            .await
    }

    /// `run` with a caller-held cancellation token
    pub async fn run_with_cancel(
        &self,
        contract: Option<SourceDocument>,
        invoice: Option<SourceDocument>,
        options: RunOptions,
        cancel: CancelToken,
    ) -> Result<Run> {
        let mut run = self.prepare(contract, invoice, options).await?;
        self.active.write().await.insert(
            run.id.clone(),
            ActiveRun {
                cancel: cancel.clone(),
                handle: None,
            },
        );

        let outcome = self.engine.execute(&mut run, &cancel).await;
        self.active.write().await.remove(&run.id);

        if let Err(e) = outcome {
            log::warn!("run {} ended with error: {}", run.id, e);
        }
        Ok(run)
    }

    /// Current state of a run and its stage results so far
    pub async fn get_status(&self, run_id: &str) -> Result<Run> {
        self.runs.load(run_id)
    }

    /// Payload of one artefact
    pub fn get_artefact(&self, run_id: &str, role: ArtefactRole) -> Result<Vec<u8>> {
        self.store.get(run_id, role)
    }

    /// Every artefact of a run, in write order
    pub fn list_artefacts(&self, run_id: &str) -> Result<Vec<crate::domain::ArtefactRef>> {
        self.store.list(run_id)
    }

    /// Ask a running run to stop before its next stage
    pub async fn cancel_run(&self, run_id: &str) -> Result<()> {
        if let Some(entry) = self.active.read().await.get(run_id) {
            entry.cancel.cancel();
            log::info!("cancellation requested for run {}", run_id);
            return Ok(());
        }

        let run = self.runs.load(run_id)?;
        if run.status.is_terminal() {
            return Err(AgentError::InvalidState(format!("run {} is already {}", run_id, run.status)));
        }
        Err(AgentError::InvalidState(format!(
            "run {} is not executing in this process",
            run_id
        )))
    }

    /// Wait for a background run to finish and return its final state
    pub async fn wait(&self, run_id: &str) -> Result<Run> {
        let handle = {
            let mut active = self.active.write().await;
            active.get_mut(run_id).and_then(|entry| entry.handle.take())
        };
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| AgentError::InvalidState(format!("run task for {} failed: {}", run_id, e)))?;
        }
        self.runs.load(run_id)
    }

    /// All known runs, oldest first
    pub fn list_runs(&self) -> Result<Vec<Run>> {
        self.runs.list()
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}

/// Record a run whose task died without reaching a terminal state
fn mark_aborted(runs: &RunStore, run_id: &str, detail: &str) {
    let mut run = match runs.load(run_id) {
        Ok(run) => run,
        Err(e) => {
            log::error!("cannot load aborted run {}: {}", run_id, e);
            return;
        }
    };
    if run.status.is_terminal() {
        return;
    }
    let outcome = run
        .fail(FailureReason::Internal, None, format!("run task aborted: {}", detail))
        .and_then(|_| runs.save(&run));
    if let Err(e) = outcome {
        log::error!("cannot mark run {} failed: {}", run_id, e);
    }
}

fn upload_name(document: &SourceDocument, kind: DocumentKind) -> String {
    sanitize_file_name(&document.file_name).unwrap_or_else(|| format!("{}-upload", kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunStatus;
    use crate::llm::MockLlmClient;
    use crate::domain::ArtefactRef;
    use crate::storage::MemoryArtefactStore;
    use crate::workflow::{StageContext, StageDescriptor, StageHandler};
    use async_trait::async_trait;

    const CONTRACT: &str = "line_items:\n  - description: Support\n    quantity: 1\n    unit: month\n    unit_price: 500\n    currency: EUR\n";
    const INVOICE: &str = "line_items:\n  - description: Support\n    quantity: 1\n    unit: months\n    unit_price: 500\n    currency: EUR\n";

    fn manager(llm: MockLlmClient) -> (RunManager, Arc<MemoryArtefactStore>, Arc<MockLlmClient>) {
        let store = Arc::new(MemoryArtefactStore::new());
        let llm = Arc::new(llm);
        let manager = RunManager::new(
            &Config::default(),
            store.clone(),
            Arc::new(RunStore::in_memory()),
            llm.clone(),
            Arc::new(RecordFileExtractor::new()),
        );
        (manager, store, llm)
    }

    fn scripted() -> MockLlmClient {
        MockLlmClient::new()
            .with_reply("compare", r#"{"assessments": [{"key": "support", "status": "compliant"}]}"#)
            .with_reply("risk-brief", "## Compliance Overview\n- ok\n")
            .with_reply("translate", "## Übersicht\n- ok\n")
    }

    #[tokio::test]
    async fn test_run_inline_completes() {
        let (manager, store, llm) = manager(scripted());
        let run = manager
            .run(
                Some(SourceDocument::new("contract.yaml", CONTRACT)),
                Some(SourceDocument::new("invoice.yaml", INVOICE)),
                RunOptions::with_language("fr"),
            )
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.target_language, "fr");
        // no contract text, so clean makes no model call
        assert_eq!(llm.call_count("clean"), 0);
        assert_eq!(run.stages[0].attempts, 0);
        let roles: Vec<_> = store.list(&run.id).unwrap().into_iter().map(|r| r.role).collect();
        assert_eq!(roles.len(), 8);
        assert_eq!(roles[0], ArtefactRole::RawContract);
        assert_eq!(manager.get_status(&run.id).await.unwrap().status, RunStatus::Completed);
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_invoice_fails_before_any_write() {
        let (manager, store, llm) = manager(scripted());
        let err = manager
            .start_run(Some(SourceDocument::new("contract.yaml", CONTRACT)), None, RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Extraction(_)));
        assert!(store.is_empty());
        assert_eq!(llm.total_calls(), 0);
        assert!(manager.list_runs().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_invoice_marks_run_failed() {
        let (manager, store, llm) = manager(scripted());
        let err = manager
            .run(
                Some(SourceDocument::new("contract.yaml", CONTRACT)),
                Some(SourceDocument::new("invoice.xlsx", "PK\x03\x04")),
                RunOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Extraction(_)));
        assert_eq!(llm.total_calls(), 0);

        let runs = manager.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].failure.as_ref().unwrap().reason, FailureReason::Extraction);
        // raw uploads were kept for audit
        assert_eq!(store.list(&runs[0].id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_same_upload_names_disambiguated() {
        let (manager, store, _llm) = manager(scripted());
        let run = manager
            .run(
                Some(SourceDocument::new("a/record.yaml", CONTRACT)),
                Some(SourceDocument::new("b/record.yaml", INVOICE)),
                RunOptions::default(),
            )
            .await
            .unwrap();
        let refs = store.list(&run.id).unwrap();
        assert!(refs[0].path.ends_with("record.yaml"));
        assert!(refs[1].path.ends_with("invoice-record.yaml"));
    }

    #[tokio::test]
    async fn test_start_run_then_wait() {
        let (manager, _store, _llm) = manager(scripted());
        let run_id = manager
            .start_run(
                Some(SourceDocument::new("contract.yaml", CONTRACT)),
                Some(SourceDocument::new("invoice.yaml", INVOICE)),
                RunOptions::default(),
            )
            .await
            .unwrap();
        let run = manager.wait(&run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.target_language, "de");
        let brief = manager.get_artefact(&run_id, ArtefactRole::Translation).unwrap();
        assert_eq!(brief, b"## \xc3\x9cbersicht\n- ok\n");
    }

    #[tokio::test]
    async fn test_cancel_unknown_or_finished_run() {
        let (manager, _store, _llm) = manager(scripted());
        assert!(matches!(manager.cancel_run("nope").await, Err(AgentError::NotFound(_))));

        let run = manager
            .run(
                Some(SourceDocument::new("contract.yaml", CONTRACT)),
                Some(SourceDocument::new("invoice.yaml", INVOICE)),
                RunOptions::default(),
            )
            .await
            .unwrap();
        assert!(matches!(
            manager.cancel_run(&run.id).await,
            Err(AgentError::InvalidState(_))
        ));
    }

    /// Memory store that refuses one role
    struct RefusingStore {
        inner: MemoryArtefactStore,
        refuse: ArtefactRole,
    }

    impl ArtefactStore for RefusingStore {
        fn put_named(&self, run_id: &str, role: ArtefactRole, file_name: Option<&str>, payload: &[u8]) -> Result<ArtefactRef> {
            if role == self.refuse {
                return Err(AgentError::StorageWrite("disk full".to_string()));
            }
            self.inner.put_named(run_id, role, file_name, payload)
        }

        fn get(&self, run_id: &str, role: ArtefactRole) -> Result<Vec<u8>> {
            self.inner.get(run_id, role)
        }

        fn list(&self, run_id: &str) -> Result<Vec<ArtefactRef>> {
            self.inner.list(run_id)
        }

        fn list_runs(&self) -> Result<Vec<String>> {
            self.inner.list_runs()
        }
    }

    fn refusing_manager(refuse: ArtefactRole) -> (RunManager, Arc<MockLlmClient>) {
        let llm = Arc::new(scripted());
        let manager = RunManager::new(
            &Config::default(),
            Arc::new(RefusingStore {
                inner: MemoryArtefactStore::new(),
                refuse,
            }),
            Arc::new(RunStore::in_memory()),
            llm.clone(),
            Arc::new(RecordFileExtractor::new()),
        );
        (manager, llm)
    }

    #[tokio::test]
    async fn test_upload_write_failure_marks_run_failed() {
        let (manager, llm) = refusing_manager(ArtefactRole::RawInvoice);
        let err = manager
            .start_run(
                Some(SourceDocument::new("contract.yaml", CONTRACT)),
                Some(SourceDocument::new("invoice.yaml", INVOICE)),
                RunOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::StorageWrite(_)));
        assert_eq!(llm.total_calls(), 0);

        let runs = manager.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].failure.as_ref().unwrap().reason, FailureReason::Storage);
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn test_record_write_failure_marks_run_failed() {
        let (manager, _llm) = refusing_manager(ArtefactRole::InvoiceRecord);
        let result = manager
            .run(
                Some(SourceDocument::new("contract.yaml", CONTRACT)),
                Some(SourceDocument::new("invoice.yaml", INVOICE)),
                RunOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(AgentError::StorageWrite(_))));
        let runs = manager.list_runs().unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert!(runs[0].stages.is_empty());
    }

    struct PanickingStage;

    #[async_trait]
    impl StageHandler for PanickingStage {
        async fn execute(&self, _ctx: &StageContext<'_>) -> Result<Vec<u8>> {
            panic!("stage blew up");
        }
    }

    #[tokio::test]
    async fn test_panicking_run_is_released_and_failed() {
        let config = Config::default();
        let store = Arc::new(MemoryArtefactStore::new());
        let runs = Arc::new(RunStore::in_memory());
        let engine = WorkflowEngine::new(&config, store.clone(), runs.clone(), Arc::new(scripted())).with_stages(vec![
            StageDescriptor::new(
                "clean",
                vec![ArtefactRole::ContractRecord],
                ArtefactRole::CleanYaml,
                Arc::new(PanickingStage),
            ),
        ]);
        let manager = RunManager::with_engine(&config, engine, store, runs, Arc::new(RecordFileExtractor::new()));

        let run_id = manager
            .start_run(
                Some(SourceDocument::new("contract.yaml", CONTRACT)),
                Some(SourceDocument::new("invoice.yaml", INVOICE)),
                RunOptions::default(),
            )
            .await
            .unwrap();
        let run = manager.wait(&run_id).await.unwrap();

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure.as_ref().unwrap().reason, FailureReason::Internal);
        assert_eq!(manager.active_count().await, 0);
        assert!(matches!(
            manager.cancel_run(&run_id).await,
            Err(AgentError::InvalidState(_))
        ));
    }
}
