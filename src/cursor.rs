use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Result, SqlCursorError};
use crate::session::{ActiveExecution, SessionInner};
use crate::statement::BoundStatement;
use crate::types::{ColumnInfo, RawOutcome, Row};

/// What a sub-result produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultKind {
    /// A row sequence with this schema.
    Rows(Arc<[ColumnInfo]>),
    /// Number of rows changed by a data-modifying statement.
    Affected(u64),
}

/// Describes the sub-result a cursor is currently positioned on.
///
/// A single statement has one sub-result; a batch has one per statement,
/// delivered in the order the statements were written.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultInfo {
    index: usize,
    count: usize,
    kind: ResultKind,
}

impl ResultInfo {
    fn new(index: usize, count: usize, outcome: RawOutcome) -> Self {
        let kind = match outcome {
            RawOutcome::Rows { columns, .. } => ResultKind::Rows(columns.into()),
            RawOutcome::Affected(count) => ResultKind::Affected(count),
        };
        Self { index, count, kind }
    }

    /// Position of this sub-result within the batch, starting at 0.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of sub-results the execution produces.
    pub fn result_count(&self) -> usize {
        self.count
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.count
    }

    pub fn kind(&self) -> &ResultKind {
        &self.kind
    }

    pub fn has_rows(&self) -> bool {
        matches!(self.kind, ResultKind::Rows(_))
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self.kind {
            ResultKind::Affected(count) => Some(count),
            ResultKind::Rows(_) => None,
        }
    }

    /// Column schema; empty for data-modifying statements.
    pub fn columns(&self) -> &[ColumnInfo] {
        match &self.kind {
            ResultKind::Rows(columns) => &columns[..],
            ResultKind::Affected(_) => &[],
        }
    }
}

/// Executes statements on its session and reads their results.
///
/// Rows are read forward only: `fetch_one`, `fetch_many`, and `fetch_all`
/// share one position, and once the rows are exhausted they return nothing.
pub struct Cursor {
    session: Arc<Mutex<SessionInner>>,
    /// Dropped with the cursor, so the session can tell its results were orphaned.
    token: Arc<()>,
    execution: Option<u64>,
    current: Option<ResultInfo>,
    rows_fetched: u64,
}

impl Cursor {
    pub(crate) fn new(session: Arc<Mutex<SessionInner>>) -> Self {
        Self {
            session,
            token: Arc::new(()),
            execution: None,
            current: None,
            rows_fetched: 0,
        }
    }

    /// Execute a bound statement or batch and position on its first sub-result.
    ///
    /// Fails with `UnreadResults` while any execution on the same session
    /// still has unread rows or unvisited sub-results.
    pub async fn execute(&mut self, bound: &BoundStatement) -> Result<ResultInfo> {
        let mut inner = self.session.lock().await;
        inner.check_idle().await?;

        let style = inner.driver_placeholder_style()?;
        let mut pending: VecDeque<_> = bound
            .parts()
            .map(|(part, params)| (part.render(style).into_owned(), params.to_vec()))
            .collect();
        let count = pending.len();
        let Some((sql, params)) = pending.pop_front() else {
            return Err(SqlCursorError::Parse {
                position: 0,
                message: "empty statement".to_string(),
            });
        };

        self.execution = None;
        self.current = None;
        self.rows_fetched = 0;

        let outcome = inner.run(&sql, &params).await?;
        let id = inner.next_execution_id();
        let active = ActiveExecution {
            id,
            owner: Arc::downgrade(&self.token),
            index: 0,
            count,
            rows_open: matches!(outcome, RawOutcome::Rows { .. }),
            remaining: pending,
        };
        if !active.is_settled() {
            inner.active = Some(active);
        }

        let info = ResultInfo::new(0, count, outcome);
        self.execution = Some(id);
        self.current = Some(info.clone());
        Ok(info)
    }

    /// Fetch the next row, or `None` once the current sub-result is exhausted.
    pub async fn fetch_one(&mut self) -> Result<Option<Row>> {
        Ok(self.fetch_rows(1).await?.into_iter().next())
    }

    /// Fetch up to `n` rows; empty once the current sub-result is exhausted.
    pub async fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>> {
        self.fetch_rows(n).await
    }

    /// Fetch every remaining row of the current sub-result.
    pub async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        self.fetch_rows(usize::MAX).await
    }

    async fn fetch_rows(&mut self, max: usize) -> Result<Vec<Row>> {
        let mut inner = self.session.lock().await;
        inner.check_open()?;

        let batch_size = inner.options.fetch_batch_size.max(1);
        let mut rows = Vec::new();
        while rows.len() < max && self.owns_open_rows(&inner) {
            let want = (max - rows.len()).min(batch_size);
            let chunk = inner.fetch(want).await?;
            rows.extend(chunk.rows.into_iter().map(Row::new));

            if chunk.exhausted {
                if let Some(active) = inner.active.as_mut() {
                    active.rows_open = false;
                }
                if inner.active.as_ref().is_some_and(ActiveExecution::is_settled) {
                    inner.active = None;
                }
                inner.finish_rows().await?;
            }
        }

        self.rows_fetched += rows.len() as u64;
        Ok(rows)
    }

    /// Advance to the next sub-result of a batch, sending its statement.
    ///
    /// Returns `None` when the batch has no more sub-results. Fails with
    /// `UnreadResults` if the current sub-result still has unread rows,
    /// since sub-results must be consumed in order.
    pub async fn next_result(&mut self) -> Result<Option<ResultInfo>> {
        let mut inner = self.session.lock().await;
        inner.check_open()?;

        let Some(mut active) = self.take_owned_execution(&mut inner) else {
            return Ok(None);
        };
        if active.rows_open {
            inner.active = Some(active);
            return Err(SqlCursorError::UnreadResults);
        }
        let Some((sql, params)) = active.remaining.pop_front() else {
            return Ok(None);
        };

        // A failing sub-statement abandons the rest of the batch; earlier
        // effects stay in the open transaction for the caller to resolve.
        let outcome = inner.run(&sql, &params).await?;
        active.index += 1;
        active.rows_open = matches!(outcome, RawOutcome::Rows { .. });
        let info = ResultInfo::new(active.index, active.count, outcome);
        if !active.is_settled() {
            inner.active = Some(active);
        }

        self.current = Some(info.clone());
        self.rows_fetched = 0;
        Ok(Some(info))
    }

    /// Discard every unread row and sub-result of this cursor's execution.
    ///
    /// Remaining batch statements are still sent, in order, and their
    /// results thrown away.
    pub async fn drain(&mut self) -> Result<()> {
        let mut inner = self.session.lock().await;
        inner.check_open()?;

        let Some(mut active) = self.take_owned_execution(&mut inner) else {
            return Ok(());
        };
        debug!(
            execution = active.id,
            remaining = active.remaining.len(),
            "draining unread results"
        );
        if active.rows_open {
            inner.discard_rows().await?;
        }
        while let Some((sql, params)) = active.remaining.pop_front() {
            if let RawOutcome::Rows { .. } = inner.run(&sql, &params).await? {
                inner.discard_rows().await?;
            }
        }
        Ok(())
    }

    /// Drain this cursor's results and release it.
    pub async fn close(mut self) -> Result<()> {
        {
            let inner = self.session.lock().await;
            if inner.check_open().is_err() {
                return Ok(());
            }
        }
        self.drain().await
    }

    /// The sub-result the cursor is positioned on, if it has executed anything.
    pub fn current_result(&self) -> Option<&ResultInfo> {
        self.current.as_ref()
    }

    /// Column schema of the current sub-result.
    pub fn columns(&self) -> &[ColumnInfo] {
        match &self.current {
            Some(info) => info.columns(),
            None => &[],
        }
    }

    /// Position of the named column in the current sub-result.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns()
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SqlCursorError::ColumnNotFound(name.to_string()))
    }

    /// Rows fetched so far from the current sub-result, or its affected-row count.
    pub fn row_count(&self) -> u64 {
        match self.current.as_ref().and_then(ResultInfo::affected_rows) {
            Some(affected) => affected,
            None => self.rows_fetched,
        }
    }

    fn owns_open_rows(&self, inner: &SessionInner) -> bool {
        inner
            .active
            .as_ref()
            .is_some_and(|active| Some(active.id) == self.execution && active.rows_open)
    }

    fn take_owned_execution(&self, inner: &mut SessionInner) -> Option<ActiveExecution> {
        match inner.active.take() {
            Some(active) if Some(active.id) == self.execution => Some(active),
            other => {
                inner.active = other;
                None
            }
        }
    }
}
