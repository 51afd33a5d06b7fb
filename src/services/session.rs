//! The session orchestrator: owns the loaded workbook, its derived
//! schemas, and the append-only conversation log, and sequences the
//! plan -> execute -> summarize pipeline for each question.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::AppError;
use crate::models::{Message, SheetSchema, Workbook};
use crate::services::ingest;
use crate::services::llm_agent::LanguageModel;
use crate::services::{executor, schema};

/// Uniform assistant reply whenever plan generation, execution, or
/// summarization fails. The user sees no distinction between the three.
const ANALYSIS_FAILURE_REPLY: &str = "I'm sorry, I encountered an error while analyzing the data. \
    Please try rephrasing your question or checking if the data supports this query.";

enum SessionState {
    Empty,
    Ready {
        workbook: Arc<Workbook>,
        schemas: Arc<Vec<SheetSchema>>,
    },
}

pub struct Session {
    agent: Arc<dyn LanguageModel>,
    max_file_size: usize,
    state: RwLock<SessionState>,
    /// Append-only; never mutated in place.
    messages: RwLock<Vec<Message>>,
    loading: AtomicBool,
    processing: AtomicBool,
}

impl Session {
    pub fn new(agent: Arc<dyn LanguageModel>, max_file_size: usize) -> Self {
        Self {
            agent,
            max_file_size,
            state: RwLock::new(SessionState::Empty),
            messages: RwLock::new(Vec::new()),
            loading: AtomicBool::new(false),
            processing: AtomicBool::new(false),
        }
    }

    /// Validate, fetch, parse, and commit a workbook. On any failure the
    /// prior state (loaded or empty) is left untouched.
    pub async fn load_from_url(
        &self,
        file_name: &str,
        content_type: Option<&str>,
        url: &str,
    ) -> Result<Message, AppError> {
        let _busy = BusyGuard::acquire(&self.loading, "a file load")?;

        let kind = ingest::validate_upload(file_name, content_type)?;

        let start = std::time::Instant::now();
        let bytes = ingest::fetch_file(url, self.max_file_size).await?;
        tracing::info!(
            size_kb = bytes.len() / 1024,
            elapsed = ?start.elapsed(),
            "file downloaded"
        );

        let workbook = ingest::parse_workbook(bytes, kind)?;
        Ok(self.install_workbook(file_name, workbook))
    }

    /// Commit a parsed workbook: derive schemas, replace the conversation
    /// with a welcome message naming each sheet and its row count. Only
    /// called once every fallible step has succeeded.
    pub fn install_workbook(&self, file_name: &str, workbook: Workbook) -> Message {
        let schemas = schema::extract_schemas(&workbook);
        let welcome = Message::assistant(welcome_text(file_name, &schemas));

        let mut state = self.state.write();
        let mut messages = self.messages.write();
        *state = SessionState::Ready {
            workbook: Arc::new(workbook),
            schemas: Arc::new(schemas),
        };
        messages.clear();
        messages.push(welcome.clone());

        welcome
    }

    /// Answer one question. The user message is always appended; the
    /// assistant reply is either the generated summary or, when any of
    /// the three pipeline steps fails, a single generic failure notice.
    /// Pipeline failures are logged, never retried, and never fatal.
    pub async fn ask(&self, question: &str) -> Result<Message, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }

        let _busy = BusyGuard::acquire(&self.processing, "a question")?;

        let (workbook, schemas) = {
            let state = self.state.read();
            match &*state {
                SessionState::Ready {
                    workbook, schemas, ..
                } => (Arc::clone(workbook), Arc::clone(schemas)),
                SessionState::Empty => {
                    return Err(AppError::InvalidInput(
                        "no workbook loaded yet".to_string(),
                    ))
                }
            }
        };

        self.push(Message::user(question));

        let content = match self.run_pipeline(question, &workbook, &schemas).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "analysis pipeline failed");
                ANALYSIS_FAILURE_REPLY.to_string()
            }
        };

        let reply = Message::assistant(content);
        self.push(reply.clone());
        Ok(reply)
    }

    async fn run_pipeline(
        &self,
        question: &str,
        workbook: &Workbook,
        schemas: &[SheetSchema],
    ) -> Result<String, AppError> {
        let plan = self.agent.propose_plan(question, schemas).await?;
        tracing::info!(
            sheet = %plan.sheet_name,
            filters = plan.filters.len(),
            "executing generated plan"
        );

        let result = executor::execute(workbook, &plan)?;
        self.agent.summarize(question, &result).await
    }

    pub fn reset(&self) {
        *self.state.write() = SessionState::Empty;
        self.messages.write().clear();
        tracing::info!("session reset");
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.read().clone()
    }

    pub fn schemas(&self) -> Option<Arc<Vec<SheetSchema>>> {
        match &*self.state.read() {
            SessionState::Ready { schemas, .. } => Some(Arc::clone(schemas)),
            SessionState::Empty => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.state.read(), SessionState::Ready { .. })
    }

    fn push(&self, message: Message) {
        self.messages.write().push(message);
    }
}

fn welcome_text(file_name: &str, schemas: &[SheetSchema]) -> String {
    let summary = schemas
        .iter()
        .map(|s| format!("**{}** ({} rows)", s.sheet_name, s.row_count))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "I've successfully loaded **{file_name}**.\n\nIt contains {} sheets: {summary}.\n\n\
         How can I help you analyze this data today?",
        schemas.len()
    )
}

/// One-at-a-time guard for same-kind in-flight operations. Acquisition
/// fails instead of queueing; the flag clears on drop.
struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool, what: &'static str) -> Result<Self, AppError> {
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(AppError::Busy(what));
        }
        Ok(Self { flag })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
