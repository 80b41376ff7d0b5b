//! Organisations, schemes, lots and ownership

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::require_scheme;
use crate::error::{LedgerError, Result};
use crate::models::{FinancialYearEnd, Lot, Organisation, Ownership, Scheme, SchemeMetadata};
use crate::repository::TrustRepository;

fn require_name(kind: &str, name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::Validation(format!("{} must not be empty", kind)));
    }
    Ok(name.to_string())
}

#[derive(Clone)]
pub struct SchemeDirectory {
    repository: Arc<dyn TrustRepository>,
}

impl SchemeDirectory {
    pub fn new(repository: Arc<dyn TrustRepository>) -> Self {
        Self { repository }
    }

    pub async fn create_organisation(&self, name: &str) -> Result<Organisation> {
        let organisation = Organisation::new(require_name("Organisation name", name)?);
        self.repository.create_organisation(&organisation).await?;
        info!(organisation_id = %organisation.id, "Organisation created");
        Ok(organisation)
    }

    pub async fn create_scheme(
        &self,
        organisation_id: Uuid,
        name: &str,
        financial_year_end: FinancialYearEnd,
    ) -> Result<Scheme> {
        if self.repository.get_organisation(organisation_id).await?.is_none() {
            return Err(LedgerError::not_found("Organisation", organisation_id));
        }
        let scheme = Scheme::new(organisation_id, require_name("Scheme name", name)?, financial_year_end);
        self.repository.create_scheme(&scheme).await?;
        info!(scheme_id = %scheme.id, %organisation_id, "Scheme created");
        Ok(scheme)
    }

    pub async fn get_scheme(&self, scheme_id: Uuid) -> Result<Scheme> {
        require_scheme(self.repository.as_ref(), scheme_id).await
    }

    /// Update name and/or financial year end; identity never changes
    pub async fn update_scheme_metadata(&self, scheme_id: Uuid, metadata: SchemeMetadata) -> Result<Scheme> {
        let mut scheme = require_scheme(self.repository.as_ref(), scheme_id).await?;
        if let Some(name) = metadata.name {
            scheme.name = require_name("Scheme name", &name)?;
        }
        if let Some(financial_year_end) = metadata.financial_year_end {
            scheme.financial_year_end = financial_year_end;
        }
        scheme.updated_at = Utc::now();
        self.repository.update_scheme(&scheme).await?;
        info!(%scheme_id, "Scheme metadata updated");
        Ok(scheme)
    }

    pub async fn create_lot(&self, scheme_id: Uuid, lot_number: &str) -> Result<Lot> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        let lot = Lot::new(scheme_id, require_name("Lot number", lot_number)?);
        self.repository.create_lot(&lot).await?;
        info!(%scheme_id, lot_id = %lot.id, lot_number = %lot.lot_number, "Lot created");
        Ok(lot)
    }

    pub async fn list_lots(&self, scheme_id: Uuid) -> Result<Vec<Lot>> {
        require_scheme(self.repository.as_ref(), scheme_id).await?;
        debug!(%scheme_id, "Listing lots");
        self.repository.list_lots(scheme_id).await
    }

    /// Lot of the given scheme, `NotFound` when it belongs elsewhere
    pub async fn get_lot(&self, scheme_id: Uuid, lot_id: Uuid) -> Result<Lot> {
        match self.repository.get_lot(lot_id).await? {
            Some(lot) if lot.scheme_id == scheme_id => Ok(lot),
            _ => Err(LedgerError::not_found("Lot", lot_id)),
        }
    }

    /// New current owner from `start`; the previous owner's record is closed on that date
    pub async fn record_ownership(&self, lot_id: Uuid, owner_name: &str, start: NaiveDate) -> Result<Ownership> {
        if self.repository.get_lot(lot_id).await?.is_none() {
            return Err(LedgerError::not_found("Lot", lot_id));
        }
        let ownership = Ownership::new(lot_id, require_name("Owner name", owner_name)?, start);
        self.repository.record_ownership(&ownership).await?;
        info!(%lot_id, ownership_id = %ownership.id, %start, "Ownership recorded");
        Ok(ownership)
    }

    pub async fn current_owner(&self, lot_id: Uuid) -> Result<Option<Ownership>> {
        self.repository.current_ownership(lot_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryTrustRepository;

    fn directory() -> SchemeDirectory {
        SchemeDirectory::new(Arc::new(InMemoryTrustRepository::new()))
    }

    #[tokio::test]
    async fn test_scheme_requires_existing_organisation() {
        let directory = directory();
        let result = directory
            .create_scheme(Uuid::new_v4(), "SP 1", FinancialYearEnd::default())
            .await;
        assert!(matches!(result, Err(LedgerError::NotFound { entity: "Organisation", .. })));
    }

    #[tokio::test]
    async fn test_metadata_update_keeps_identity() {
        let directory = directory();
        let org = directory.create_organisation("Acme Strata").await.unwrap();
        let scheme = directory
            .create_scheme(org.id, "SP 1", FinancialYearEnd::default())
            .await
            .unwrap();

        let updated = directory
            .update_scheme_metadata(
                scheme.id,
                SchemeMetadata {
                    name: Some("Harbour View".to_string()),
                    financial_year_end: Some(FinancialYearEnd::new(12, 31).unwrap()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.id, scheme.id);
        assert_eq!(updated.organisation_id, org.id);
        assert_eq!(updated.name, "Harbour View");
        assert_eq!(directory.get_scheme(scheme.id).await.unwrap().financial_year_end.month, 12);

        let blank = SchemeMetadata {
            name: Some("  ".to_string()),
            financial_year_end: None,
        };
        assert!(matches!(
            directory.update_scheme_metadata(scheme.id, blank).await,
            Err(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_single_current_owner_per_lot() {
        let directory = directory();
        let org = directory.create_organisation("Acme Strata").await.unwrap();
        let scheme = directory
            .create_scheme(org.id, "SP 1", FinancialYearEnd::default())
            .await
            .unwrap();
        let lot = directory.create_lot(scheme.id, "1").await.unwrap();
        assert!(matches!(directory.create_lot(scheme.id, "1").await, Err(LedgerError::Validation(_))));

        let date = |month, day| NaiveDate::from_ymd_opt(2024, month, day).unwrap();
        directory.record_ownership(lot.id, "A. Owner", date(1, 1)).await.unwrap();
        directory.record_ownership(lot.id, "B. Buyer", date(6, 1)).await.unwrap();
        assert!(directory.record_ownership(lot.id, "C. Early", date(3, 1)).await.is_err());

        let current = directory.current_owner(lot.id).await.unwrap().unwrap();
        assert_eq!(current.owner_name, "B. Buyer");
        assert!(current.is_current());
    }
}
