//! Poll Store: creation, lookup, listing, update and deletion of polls and their options.

use crate::app_config::LimitsConfig;
use crate::error::PollError;
use crate::identity::Identity;
use crate::orm::{poll_options, polls, votes};
use crate::rate_limit::{RateAction, RateGuard};
use crate::visibility;
use chrono::Utc;
use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{
    entity::*, query::*, Condition, DatabaseBackend, DatabaseConnection, DbErr, Paginator,
    Select, SelectModel, SqlErr, Statement,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Input for [`PollStore::create`]
#[derive(Clone, Debug, Default)]
pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub options: Vec<String>,
}

/// Owner-editable fields. `None` leaves a field unchanged; an empty description clears it.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PollPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
    pub is_active: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollWithOptions {
    pub poll: polls::Model,
    pub options: Vec<poll_options::Model>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollSort {
    #[default]
    Newest,
    Oldest,
    Title,
}

/// Listing filter. Visibility is always applied on top of these.
#[derive(Clone, Debug, Default)]
pub struct PollFilter {
    pub is_active: Option<bool>,
    pub owner_id: Option<i32>,
    /// Only the caller's own polls
    pub mine: bool,
    /// Case-insensitive match on title or description
    pub search: Option<String>,
    pub sort: PollSort,
}

/// One page of a listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPage {
    pub items: Vec<polls::Model>,
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

/// First key of the per-owner advisory lock taken while creating polls on PostgreSQL.
const OWNER_LOCK_NAMESPACE: i32 = 0x706f_6c6c;

/// Lowercases and collapses whitespace. Two options collide when these match.
pub fn normalize_option_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Clone)]
pub struct PollStore {
    db: DatabaseConnection,
    guard: Arc<RateGuard>,
    limits: LimitsConfig,
}

impl PollStore {
    pub fn new(db: DatabaseConnection, guard: Arc<RateGuard>, limits: LimitsConfig) -> Self {
        Self { db, guard, limits }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Create a poll owned by the caller, with its initial options.
    pub async fn create(&self, caller: &Identity, new: NewPoll) -> Result<PollWithOptions, PollError> {
        let owner_id = caller.require_login(None)?;

        let title = self.validate_title(&new.title)?;
        let description = self.validate_description(new.description.as_deref())?;
        let options = self.validate_new_options(&new.options)?;

        let owned = self.count_owned(owner_id).await?;
        self.guard.check_ownership(owner_id, owned)?;
        let reservation = self.guard.reserve(owner_id, RateAction::PollCreation)?;

        let created = self
            .insert_poll(owner_id, title, description, new.is_public, options)
            .await?;
        reservation.commit();

        log::info!(
            "Poll {} created by user {} with {} options",
            created.poll.id,
            owner_id,
            created.options.len()
        );
        Ok(created)
    }

    async fn insert_poll(
        &self,
        owner_id: i32,
        title: String,
        description: Option<String>,
        is_public: bool,
        options: Vec<(String, String)>,
    ) -> Result<PollWithOptions, PollError> {
        let txn = self.db.begin().await?;

        // Serialize creations by the same owner so the recount below sees every committed
        // poll. SQLite already serializes writers.
        if txn.get_database_backend() == DatabaseBackend::Postgres {
            txn.execute(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                "SELECT pg_advisory_xact_lock($1, $2)",
                [OWNER_LOCK_NAMESPACE.into(), owner_id.into()],
            ))
            .await?;
        }

        let poll = polls::ActiveModel {
            owner_id: Set(owner_id),
            title: Set(title),
            description: Set(description),
            is_public: Set(is_public),
            is_active: Set(true),
            created_at: Set(Utc::now().naive_utc()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut inserted = Vec::with_capacity(options.len());
        for (text, normalized_text) in options {
            let option = poll_options::ActiveModel {
                poll_id: Set(poll.id),
                text: Set(text),
                normalized_text: Set(normalized_text),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            inserted.push(option);
        }

        // Recount under the owner lock: a concurrent creation may have slipped past the
        // pre-check.
        let owned = polls::Entity::find()
            .filter(polls::Column::OwnerId.eq(owner_id))
            .count(&txn)
            .await?;
        if owned > self.guard.config().max_polls_owned {
            txn.rollback().await?;
            return Err(PollError::QuotaExceeded {
                action: RateAction::PollsOwned,
                retry_after_seconds: None,
            });
        }

        txn.commit().await?;

        Ok(PollWithOptions {
            poll,
            options: inserted,
        })
    }

    /// Poll with its options, without any visibility check.
    pub async fn get(&self, poll_id: i32) -> Result<PollWithOptions, PollError> {
        let poll = self.find_poll(poll_id).await?;
        let options = self.options_for(poll_id).await?;
        Ok(PollWithOptions { poll, options })
    }

    /// Poll with its options, if the caller may see it.
    pub async fn get_for(&self, poll_id: i32, caller: &Identity) -> Result<PollWithOptions, PollError> {
        let poll = self.find_poll(poll_id).await?;
        visibility::enforce(&poll, caller)?;
        let options = self.options_for(poll_id).await?;
        Ok(PollWithOptions { poll, options })
    }

    pub(crate) async fn find_poll(&self, poll_id: i32) -> Result<polls::Model, PollError> {
        polls::Entity::find_by_id(poll_id)
            .one(&self.db)
            .await?
            .ok_or(PollError::NotFound(poll_id))
    }

    pub(crate) async fn options_for(&self, poll_id: i32) -> Result<Vec<poll_options::Model>, PollError> {
        Ok(poll_options::Entity::find()
            .filter(poll_options::Column::PollId.eq(poll_id))
            .order_by_asc(poll_options::Column::Id)
            .all(&self.db)
            .await?)
    }

    /// Lazily paged listing of the polls the caller may see.
    ///
    /// Visibility is part of the query, so private polls of other users never reach the
    /// candidate set.
    pub fn list(
        &self,
        caller: &Identity,
        filter: &PollFilter,
        page_size: u64,
    ) -> Result<Paginator<'_, DatabaseConnection, SelectModel<polls::Model>>, PollError> {
        Ok(self.list_query(caller, filter)?.paginate(&self.db, page_size))
    }

    /// Fetch one page (1-based) of [`PollStore::list`] with its metadata.
    pub async fn list_page(
        &self,
        caller: &Identity,
        filter: &PollFilter,
        page: u64,
        size: u64,
    ) -> Result<PollPage, PollError> {
        if page < 1 {
            return Err(PollError::Validation("Page must be at least 1".to_string()));
        }
        if size < 1 || size > self.limits.max_page_size {
            return Err(PollError::Validation(format!(
                "Page size must be between 1 and {}",
                self.limits.max_page_size
            )));
        }

        // The offset must fit the store's signed 64-bit OFFSET.
        let in_range = (page - 1)
            .checked_mul(size)
            .map_or(false, |offset| offset <= i64::MAX as u64);
        if !in_range {
            return Err(PollError::Validation(format!("Page {} is out of range", page)));
        }

        let paginator = self.list(caller, filter, size)?;
        let total = paginator.num_items().await?;
        let pages = if total == 0 {
            1
        } else {
            (total + size - 1) / size
        };

        let items = if page > pages {
            Vec::new()
        } else {
            paginator.fetch_page(page - 1).await?
        };

        Ok(PollPage {
            items,
            total,
            page,
            size,
            pages,
            has_next: page < pages,
            has_prev: page > 1,
        })
    }

    fn list_query(&self, caller: &Identity, filter: &PollFilter) -> Result<Select<polls::Entity>, PollError> {
        let mut query = polls::Entity::find().filter(visibility::visible_to(caller));

        if filter.mine {
            let user_id = caller.require_login(None)?;
            query = query.filter(polls::Column::OwnerId.eq(user_id));
        }
        if let Some(owner_id) = filter.owner_id {
            query = query.filter(polls::Column::OwnerId.eq(owner_id));
        }
        if let Some(is_active) = filter.is_active {
            query = query.filter(polls::Column::IsActive.eq(is_active));
        }
        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let escaped = term
                .to_lowercase()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            let pattern = format!("%{}%", escaped);
            query = query.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col(polls::Column::Title)))
                            .like(LikeExpr::new(pattern.clone()).escape('\\')),
                    )
                    .add(
                        Expr::expr(Func::lower(Expr::col(polls::Column::Description)))
                            .like(LikeExpr::new(pattern).escape('\\')),
                    ),
            );
        }

        query = match filter.sort {
            PollSort::Newest => query
                .order_by_desc(polls::Column::CreatedAt)
                .order_by_desc(polls::Column::Id),
            PollSort::Oldest => query
                .order_by_asc(polls::Column::CreatedAt)
                .order_by_asc(polls::Column::Id),
            PollSort::Title => query
                .order_by_asc(polls::Column::Title)
                .order_by_asc(polls::Column::Id),
        };

        Ok(query)
    }

    /// Apply an owner's patch. A patch that changes nothing performs no write.
    pub async fn update(
        &self,
        poll_id: i32,
        caller: &Identity,
        patch: PollPatch,
    ) -> Result<polls::Model, PollError> {
        let poll = self.find_poll(poll_id).await?;
        let user_id = self.require_owner(&poll, caller)?;

        let mut model: polls::ActiveModel = poll.clone().into();
        let mut changed = false;

        if let Some(title) = patch.title.as_deref() {
            let title = self.validate_title(title)?;
            if title != poll.title {
                model.title = Set(title);
                changed = true;
            }
        }
        if let Some(description) = patch.description.as_deref() {
            let description = self.validate_description(Some(description))?;
            if description != poll.description {
                model.description = Set(description);
                changed = true;
            }
        }
        if let Some(is_public) = patch.is_public {
            if is_public != poll.is_public {
                model.is_public = Set(is_public);
                changed = true;
            }
        }
        if let Some(is_active) = patch.is_active {
            if is_active != poll.is_active {
                model.is_active = Set(is_active);
                changed = true;
            }
        }

        if !changed {
            log::debug!("No changes for poll {}", poll_id);
            return Ok(poll);
        }

        let reservation = self.guard.reserve(user_id, RateAction::PollUpdate)?;

        let updated = model.update(&self.db).await?;
        reservation.commit();
        log::info!("Poll {} updated by user {}", poll_id, user_id);
        Ok(updated)
    }

    /// Delete a poll with all of its options and votes in one transaction.
    pub async fn delete(&self, poll_id: i32, caller: &Identity) -> Result<(), PollError> {
        let poll = self.find_poll(poll_id).await?;
        let user_id = self.require_owner(&poll, caller)?;

        let txn = self.db.begin().await?;

        // Children before parent.
        let removed_votes = votes::Entity::delete_many()
            .filter(votes::Column::PollId.eq(poll_id))
            .exec(&txn)
            .await?
            .rows_affected;
        poll_options::Entity::delete_many()
            .filter(poll_options::Column::PollId.eq(poll_id))
            .exec(&txn)
            .await?;
        let removed = polls::Entity::delete_by_id(poll_id).exec(&txn).await?;

        if removed.rows_affected == 0 {
            // Deleted concurrently.
            txn.rollback().await?;
            return Err(PollError::NotFound(poll_id));
        }

        txn.commit().await?;

        log::info!(
            "Poll {} deleted by user {} ({} votes removed)",
            poll_id,
            user_id,
            removed_votes
        );
        Ok(())
    }

    /// Add an option to an existing poll.
    pub async fn add_option(
        &self,
        poll_id: i32,
        caller: &Identity,
        text: &str,
    ) -> Result<poll_options::Model, PollError> {
        let poll = self.find_poll(poll_id).await?;
        let user_id = self.require_owner(&poll, caller)?;
        let (text, normalized_text) = self.validate_option(text)?;

        let max = self.limits.max_options;
        if self.count_options(&self.db, poll_id).await? >= max as u64 {
            return Err(PollError::CapacityExceeded { poll_id, max });
        }

        let reservation = self.guard.reserve(user_id, RateAction::PollUpdate)?;

        let option = self.insert_option(poll_id, text, normalized_text).await?;
        reservation.commit();

        log::info!("Option {} added to poll {}", option.id, poll_id);
        Ok(option)
    }

    async fn insert_option(
        &self,
        poll_id: i32,
        text: String,
        normalized_text: String,
    ) -> Result<poll_options::Model, PollError> {
        let max = self.limits.max_options;
        let txn = self.db.begin().await?;

        // Serialize option writers on the parent row where the backend supports it.
        if txn.get_database_backend() == DatabaseBackend::Postgres {
            polls::Entity::find_by_id(poll_id)
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or(PollError::NotFound(poll_id))?;
        }

        let option = poll_options::ActiveModel {
            poll_id: Set(poll_id),
            text: Set(text),
            normalized_text: Set(normalized_text),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| map_unique_violation(e, PollError::DuplicateOption(poll_id)))?;

        if self.count_options(&txn, poll_id).await? > max as u64 {
            txn.rollback().await?;
            return Err(PollError::CapacityExceeded { poll_id, max });
        }

        txn.commit().await?;
        Ok(option)
    }

    async fn count_options<C: ConnectionTrait>(&self, db: &C, poll_id: i32) -> Result<u64, PollError> {
        Ok(poll_options::Entity::find()
            .filter(poll_options::Column::PollId.eq(poll_id))
            .count(db)
            .await?)
    }

    async fn count_owned(&self, owner_id: i32) -> Result<u64, PollError> {
        Ok(polls::Entity::find()
            .filter(polls::Column::OwnerId.eq(owner_id))
            .count(&self.db)
            .await?)
    }

    fn require_owner(&self, poll: &polls::Model, caller: &Identity) -> Result<i32, PollError> {
        let user_id = caller.require_login(Some(poll.id))?;
        if user_id != poll.owner_id {
            log::debug!("User {} is not the owner of poll {}", user_id, poll.id);
            return Err(PollError::Forbidden(poll.id));
        }
        Ok(user_id)
    }

    fn validate_title(&self, title: &str) -> Result<String, PollError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(PollError::Validation("Title is required".to_string()));
        }
        if title.chars().count() > self.limits.max_title_length {
            return Err(PollError::Validation(format!(
                "Title must be at most {} characters",
                self.limits.max_title_length
            )));
        }
        Ok(title.to_string())
    }

    fn validate_description(&self, description: Option<&str>) -> Result<Option<String>, PollError> {
        let Some(description) = description.map(str::trim).filter(|d| !d.is_empty()) else {
            return Ok(None);
        };
        if description.chars().count() > self.limits.max_description_length {
            return Err(PollError::Validation(format!(
                "Description must be at most {} characters",
                self.limits.max_description_length
            )));
        }
        Ok(Some(description.to_string()))
    }

    fn validate_option(&self, text: &str) -> Result<(String, String), PollError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PollError::Validation(
                "Option text must not be empty".to_string(),
            ));
        }
        if text.chars().count() > self.limits.max_option_length {
            return Err(PollError::Validation(format!(
                "Option text must be at most {} characters",
                self.limits.max_option_length
            )));
        }
        Ok((text.to_string(), normalize_option_text(text)))
    }

    fn validate_new_options(&self, options: &[String]) -> Result<Vec<(String, String)>, PollError> {
        if options.len() > self.limits.max_options {
            return Err(PollError::Validation(format!(
                "A poll may have at most {} options",
                self.limits.max_options
            )));
        }

        let mut seen = HashSet::with_capacity(options.len());
        let mut validated = Vec::with_capacity(options.len());
        for text in options {
            let (text, normalized) = self.validate_option(text)?;
            if !seen.insert(normalized.clone()) {
                return Err(PollError::Validation(format!(
                    "Duplicate option: {}",
                    text
                )));
            }
            validated.push((text, normalized));
        }
        Ok(validated)
    }
}

/// Maps a unique-constraint violation to `on_conflict`; other errors stay internal.
pub(crate) fn map_unique_violation(err: DbErr, on_conflict: PollError) -> PollError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => on_conflict,
        _ => PollError::Database(err),
    }
}
