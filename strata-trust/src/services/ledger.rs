//! Ledger store: posting, reversing and reading journal entries

use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::require_scheme;
use crate::error::{LedgerError, Result};
use crate::models::{DateRange, EntryPosition, LedgerEntry, NewEntry, PostEntry, Posting, ReferenceType};
use crate::repository::{OpeningBalanceGuard, TrustRepository};
use crate::validation::check_balanced;

/// Lazily paged sequence of entries in posting order
pub type EntryStream = BoxStream<'static, Result<LedgerEntry>>;

const DEFAULT_PAGE_SIZE: usize = 500;

/// Entry that exactly undoes `entry`
pub fn reversal_of(entry: &LedgerEntry, posting_date: NaiveDate, description: String) -> NewEntry {
    NewEntry {
        posting_date,
        reference_type: ReferenceType::Reversal,
        reference_id: entry.reference_id.clone(),
        description,
        reverses: Some(entry.id),
        postings: entry.postings.iter().map(Posting::reversed).collect(),
    }
}

#[derive(Clone)]
pub struct LedgerStore {
    repository: Arc<dyn TrustRepository>,
    page_size: usize,
}

impl LedgerStore {
    pub fn new(repository: Arc<dyn TrustRepository>) -> Self {
        Self {
            repository,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Append one balanced entry; returns its id
    pub async fn post_entry(&self, scheme_id: Uuid, entry: PostEntry) -> Result<Uuid> {
        let result = self.post(scheme_id, entry).await;
        match &result {
            Ok(id) => info!(%scheme_id, entry_id = %id, "Ledger entry posted"),
            Err(e) => warn!(%scheme_id, error = %e, "Ledger entry rejected"),
        }
        result
    }

    async fn post(&self, scheme_id: Uuid, entry: PostEntry) -> Result<Uuid> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        if entry.reference_type.is_reserved() {
            return Err(LedgerError::Validation(format!(
                "Reference type '{}' is reserved for ledger operations",
                entry.reference_type
            )));
        }
        check_balanced(&entry.postings)?;

        let appended = self
            .repository
            .append_entries(scheme_id, &[NewEntry::from(entry)], OpeningBalanceGuard::Unchecked)
            .await?;
        appended
            .first()
            .map(|entry| entry.id)
            .ok_or_else(|| LedgerError::Storage("Append returned no entry".to_string()))
    }

    /// Post the exact inverse of an entry; history is never modified
    pub async fn reverse_entry(
        &self,
        scheme_id: Uuid,
        entry_id: Uuid,
        posting_date: NaiveDate,
        reason: &str,
    ) -> Result<Uuid> {
        let original = self.get_entry(scheme_id, entry_id).await?;
        if original.reference_type == ReferenceType::OpeningBalance {
            return Err(LedgerError::Validation(
                "Opening balance entries are reversed by clearing opening balances".to_string(),
            ));
        }
        let reversal = reversal_of(&original, posting_date, format!("Reversal: {}", reason));
        let appended = self
            .repository
            .append_entries(scheme_id, &[reversal], OpeningBalanceGuard::Unchecked)
            .await;
        match appended {
            Ok(entries) => {
                let id = entries
                    .first()
                    .map(|entry| entry.id)
                    .ok_or_else(|| LedgerError::Storage("Append returned no entry".to_string()))?;
                info!(%scheme_id, %entry_id, reversal_id = %id, "Ledger entry reversed");
                Ok(id)
            }
            Err(e) => {
                warn!(%scheme_id, %entry_id, error = %e, "Reversal rejected");
                Err(e)
            }
        }
    }

    pub async fn get_entry(&self, scheme_id: Uuid, entry_id: Uuid) -> Result<LedgerEntry> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        self.repository
            .get_entry(scheme_id, entry_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("Ledger entry", entry_id))
    }

    /// Entries in `range` ordered by posting date then insertion order
    pub async fn entries(&self, scheme_id: Uuid, range: DateRange) -> Result<EntryStream> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        Ok(self.stream_from(scheme_id, range, None))
    }

    /// Resume a listing after a previously seen entry
    pub async fn entries_after(
        &self,
        scheme_id: Uuid,
        range: DateRange,
        position: EntryPosition,
    ) -> Result<EntryStream> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        Ok(self.stream_from(scheme_id, range, Some(position)))
    }

    fn stream_from(&self, scheme_id: Uuid, range: DateRange, after: Option<EntryPosition>) -> EntryStream {
        let repository = Arc::clone(&self.repository);
        let page_size = self.page_size;

        stream::try_unfold((after, false), move |state| {
            next_page(Arc::clone(&repository), scheme_id, range, page_size, state)
        })
        .map_ok(|page| stream::iter(page.into_iter().map(Ok::<LedgerEntry, LedgerError>)))
        .try_flatten()
        .boxed()
    }
}

/// Keyset cursor: last position seen, and whether the previous page was short
type PageState = (Option<EntryPosition>, bool);

async fn next_page(
    repository: Arc<dyn TrustRepository>,
    scheme_id: Uuid,
    range: DateRange,
    page_size: usize,
    (after, exhausted): PageState,
) -> Result<Option<(Vec<LedgerEntry>, PageState)>> {
    if exhausted {
        return Ok(None);
    }
    let page = repository.list_entries(scheme_id, range, after, page_size).await?;
    debug!(%scheme_id, fetched = page.len(), "Fetched ledger page");
    let next = match page.last() {
        Some(last) => last.position(),
        None => return Ok(None),
    };
    let exhausted = page.len() < page_size;
    Ok(Some((page, (Some(next), exhausted))))
}
