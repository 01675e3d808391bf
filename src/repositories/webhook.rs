//! Webhook repository for database operations
//!
//! This module provides the WebhookRepository struct which encapsulates
//! SeaORM operations for the webhooks table and implements the
//! `RegistrationStore` contract used by the checker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::warn;
use uuid::Uuid;

use crate::identity::RepositoryIdentity;
use crate::models::webhook::{self, Entity as Webhook};
use crate::status::RecordedStatus;
use crate::stores::{RegistrationMutator, RegistrationStore, StoreError, WebhookRegistration};

/// Repository for webhook registration rows
#[derive(Debug, Clone)]
pub struct WebhookRepository {
    /// Database connection pool
    pub db: Arc<DatabaseConnection>,
}

impl WebhookRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Stores a newly installed webhook.
    pub async fn insert(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<webhook::Model, StoreError> {
        let now: DateTimeWithTimeZone = Utc::now().into();
        let identity = &registration.repository;

        let model = webhook::ActiveModel {
            id: Set(Uuid::new_v4()),
            repository_key: Set(identity.key()),
            server: Set(identity.server.clone()),
            owner: Set(identity.owner.clone()),
            name: Set(identity.name.clone()),
            remote_id: Set(registration.remote_id),
            url: Set(registration.url.clone()),
            callback_url: Set(registration.callback_url.clone()),
            status: Set(registration.status.as_str().to_string()),
            last_delivery_at: Set(registration.last_delivery_at.map(Into::into)),
            correct: Set(registration.correct),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(self.db.as_ref()).await?)
    }

    async fn find_where_correct(
        &self,
        correct: Option<bool>,
    ) -> Result<Vec<(RepositoryIdentity, WebhookRegistration)>, StoreError> {
        let mut query = Webhook::find();
        if let Some(correct) = correct {
            query = query.filter(webhook::Column::Correct.eq(correct));
        }

        let rows = query
            .order_by_asc(webhook::Column::CreatedAt)
            .order_by_asc(webhook::Column::Id)
            .all(self.db.as_ref())
            .await?;

        // An unreadable row is left out so the rest can still be reconciled.
        let registrations = rows
            .iter()
            .filter_map(|model| match to_registration(model) {
                Ok(registration) => Some((registration.repository.clone(), registration)),
                Err(err) => {
                    warn!(row = %model.id, error = %err, "Skipping unreadable webhook registration");
                    counter!("webhook_store_unreadable_rows_total").increment(1);
                    None
                }
            })
            .collect();
        Ok(registrations)
    }
}

fn to_registration(model: &webhook::Model) -> Result<WebhookRegistration, StoreError> {
    let status = model
        .status
        .parse::<RecordedStatus>()
        .map_err(|e| StoreError::Corrupt {
            table: "webhooks",
            details: format!("row {}: {}", model.id, e),
        })?;

    Ok(WebhookRegistration {
        repository: RepositoryIdentity::new(&model.server, &model.owner, &model.name),
        remote_id: model.remote_id,
        url: model.url.clone(),
        callback_url: model.callback_url.clone(),
        status,
        last_delivery_at: model.last_delivery_at.map(|at| at.with_timezone(&Utc)),
        correct: model.correct,
    })
}

#[async_trait]
impl RegistrationStore for WebhookRepository {
    async fn get_all(&self) -> Result<Vec<(RepositoryIdentity, WebhookRegistration)>, StoreError> {
        self.find_where_correct(None).await
    }

    async fn update(
        &self,
        identity: &RepositoryIdentity,
        mutator: RegistrationMutator,
    ) -> Result<(), StoreError> {
        let txn = self.db.begin().await?;

        let rows = Webhook::find()
            .filter(webhook::Column::RepositoryKey.eq(identity.key()))
            .lock_exclusive()
            .all(&txn)
            .await?;

        for model in rows {
            let mut registration = to_registration(&model)?;
            mutator(&mut registration);

            let mut active: webhook::ActiveModel = model.into();
            active.url = Set(registration.url);
            active.callback_url = Set(registration.callback_url);
            active.status = Set(registration.status.as_str().to_string());
            active.last_delivery_at = Set(registration.last_delivery_at.map(Into::into));
            active.correct = Set(registration.correct);
            active.updated_at = Set(Utc::now().into());
            active.update(&txn).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn delete(&self, identity: &RepositoryIdentity) -> Result<u64, StoreError> {
        let result = Webhook::delete_many()
            .filter(webhook::Column::RepositoryKey.eq(identity.key()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected)
    }

    async fn get_incorrect(
        &self,
    ) -> Result<Vec<(RepositoryIdentity, WebhookRegistration)>, StoreError> {
        self.find_where_correct(Some(false)).await
    }

    async fn get_hooks(
        &self,
        identity: &RepositoryIdentity,
    ) -> Result<Vec<WebhookRegistration>, StoreError> {
        Webhook::find()
            .filter(webhook::Column::RepositoryKey.eq(identity.key()))
            .order_by_asc(webhook::Column::CreatedAt)
            .order_by_asc(webhook::Column::Id)
            .all(self.db.as_ref())
            .await?
            .iter()
            .map(to_registration)
            .collect()
    }

    async fn has_incorrect(&self) -> Result<bool, StoreError> {
        let count = Webhook::find()
            .filter(webhook::Column::Correct.eq(false))
            .count(self.db.as_ref())
            .await?;
        Ok(count > 0)
    }
}
