//! Account registry: chart of accounts with organisation defaults

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::require_scheme;
use crate::error::{LedgerError, Result};
use crate::models::{Account, AccountScope, UpsertAccount};
use crate::repository::TrustRepository;
use crate::validation::validate_account_code;

/// Active accounts visible to a scheme; scheme accounts hide defaults with the same code
pub fn merge_scopes(scheme_accounts: Vec<Account>, organisation_defaults: Vec<Account>) -> Vec<Account> {
    let mut by_code: BTreeMap<String, Account> = BTreeMap::new();
    for account in organisation_defaults.into_iter().filter(|a| a.is_active) {
        by_code.insert(account.code.clone(), account);
    }
    for account in scheme_accounts.into_iter().filter(|a| a.is_active) {
        by_code.insert(account.code.clone(), account);
    }
    by_code.into_values().collect()
}

#[derive(Clone)]
pub struct AccountRegistry {
    repository: Arc<dyn TrustRepository>,
}

impl AccountRegistry {
    pub fn new(repository: Arc<dyn TrustRepository>) -> Self {
        Self { repository }
    }

    /// Scheme accounts merged with organisation defaults, ordered by code
    pub async fn list_active_accounts(&self, scheme_id: Uuid) -> Result<Vec<Account>> {
        let scheme = require_scheme(self.repository.as_ref(), scheme_id).await?;
        let scheme_accounts = self.repository.list_accounts(AccountScope::Scheme(scheme.id)).await?;
        let defaults = self
            .repository
            .list_accounts(AccountScope::Organisation(scheme.organisation_id))
            .await?;
        let accounts = merge_scopes(scheme_accounts, defaults);
        debug!(%scheme_id, count = accounts.len(), "Listed active accounts");
        Ok(accounts)
    }

    /// Two-level lookup of an active account code: scheme first, then organisation
    pub async fn resolve_code(&self, scheme_id: Uuid, code: &str) -> Result<Option<Account>> {
        let scheme = require_scheme(self.repository.as_ref(), scheme_id).await?;
        for scope in [
            AccountScope::Scheme(scheme.id),
            AccountScope::Organisation(scheme.organisation_id),
        ] {
            let found = self
                .repository
                .list_accounts(scope)
                .await?
                .into_iter()
                .find(|account| account.is_active && account.code == code);
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Every default account of an organisation, active or not
    pub async fn list_organisation_defaults(&self, organisation_id: Uuid) -> Result<Vec<Account>> {
        if self.repository.get_organisation(organisation_id).await?.is_none() {
            return Err(LedgerError::not_found("Organisation", organisation_id));
        }
        self.repository
            .list_accounts(AccountScope::Organisation(organisation_id))
            .await
    }

    pub async fn upsert_account(&self, request: UpsertAccount) -> Result<Account> {
        let result = self.upsert(request).await;
        match &result {
            Ok(account) => info!(
                account_id = %account.id,
                scope = %account.scope,
                code = %account.code,
                is_active = account.is_active,
                "Account saved"
            ),
            Err(e) => warn!(error = %e, "Account upsert rejected"),
        }
        result
    }

    async fn upsert(&self, request: UpsertAccount) -> Result<Account> {
        validate_account_code(&request.code)?;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(LedgerError::Validation("Account name must not be empty".to_string()));
        }
        self.require_scope(request.scope).await?;

        let now = Utc::now();
        let account = match request.id {
            Some(id) => {
                let existing = self
                    .repository
                    .get_account(id)
                    .await?
                    .ok_or_else(|| LedgerError::not_found("Account", id))?;
                if existing.scope != request.scope {
                    return Err(LedgerError::Validation(format!(
                        "Account {} cannot move from {} to {}",
                        id, existing.scope, request.scope
                    )));
                }
                Account {
                    code: request.code,
                    name: name.to_string(),
                    account_type: request.account_type,
                    is_active: request.is_active,
                    updated_at: now,
                    ..existing
                }
            }
            None => Account {
                id: Uuid::new_v4(),
                scope: request.scope,
                code: request.code,
                name: name.to_string(),
                account_type: request.account_type,
                is_active: request.is_active,
                created_at: now,
                updated_at: now,
            },
        };

        self.repository.save_account(&account).await?;
        Ok(account)
    }

    async fn require_scope(&self, scope: AccountScope) -> Result<()> {
        match scope {
            AccountScope::Scheme(id) => {
                require_scheme(self.repository.as_ref(), id).await?;
            }
            AccountScope::Organisation(id) => {
                if self.repository.get_organisation(id).await?.is_none() {
                    return Err(LedgerError::not_found("Organisation", id));
                }
            }
        }
        Ok(())
    }
}
