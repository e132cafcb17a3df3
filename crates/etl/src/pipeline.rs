//! Pipeline run controller.
//!
//! A run is a linear batch job:
//!
//! 1. Ensure the schema exists
//! 2. Extract every user and cart page from the source
//! 3. Transform users, then carts (each cart's owner must be a user that
//!    passed validation in this run)
//! 4. Load users, then each cart followed by its lines
//!
//! Invalid records are skipped and counted. Any other failure moves the run
//! to [`PipelineState::Failed`]; either way the caller gets a [`RunReport`].

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use cart_insights_core::{Cart, CartItem, PipelineState, Resource, User, UserId};

use crate::load::{LoadError, Loader};
use crate::source::{FetchError, RawRecord, SourceClient};
use crate::transform::{ensure_known_owner, normalize_cart, normalize_user};

/// Per-run tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Records requested per page.
    pub page_size: u32,
    /// Stop each collection after this many records.
    pub max_records: Option<usize>,
}

impl RunOptions {
    pub const DEFAULT_PAGE_SIZE: u32 = 100;
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            page_size: Self::DEFAULT_PAGE_SIZE,
            max_records: None,
        }
    }
}

/// Errors that end a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("invalid pipeline transition from {from} to {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },
}

/// Record counts for one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceCounters {
    pub fetched: u64,
    pub transformed: u64,
    pub skipped: u64,
    pub loaded: u64,
}

/// Record counts for a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub users: ResourceCounters,
    pub carts: ResourceCounters,
    pub cart_items_loaded: u64,
}

impl RunCounters {
    fn resource_mut(&mut self, resource: Resource) -> &mut ResourceCounters {
        match resource {
            Resource::Users => &mut self.users,
            Resource::Carts => &mut self.carts,
        }
    }
}

/// State of one run in progress, passed explicitly through every phase.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    state: PipelineState,
    counters: RunCounters,
    started_at: DateTime<Utc>,
    error: Option<String>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// A fresh context in `NotStarted`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: PipelineState::NotStarted,
            counters: RunCounters::default(),
            started_at: Utc::now(),
            error: None,
        }
    }

    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[must_use]
    pub const fn state(&self) -> PipelineState {
        self.state
    }

    #[must_use]
    pub const fn counters(&self) -> &RunCounters {
        &self.counters
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::InvalidTransition` if `next` is not reachable
    /// from the current state.
    pub fn advance(&mut self, next: PipelineState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        info!(run_id = %self.run_id, from = %self.state, to = %next, "Pipeline state change");
        self.state = next;
        Ok(())
    }

    /// Record a terminal error and move to `Failed`. No-op once terminal.
    pub fn fail(&mut self, err: &impl std::fmt::Display) {
        if self.state.is_terminal() {
            return;
        }
        self.state = PipelineState::Failed;
        self.error = Some(err.to_string());
    }

    /// Close the run and produce its report.
    #[must_use]
    pub fn finish(self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            state: self.state,
            counters: self.counters,
            started_at: self.started_at,
            finished_at: Utc::now(),
            error: self.error,
        }
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub state: PipelineState,
    pub counters: RunCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl RunReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == PipelineState::Completed
    }

    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Drives one source through one loader.
#[derive(Debug, Clone)]
pub struct Pipeline {
    source: SourceClient,
    loader: Loader,
}

impl Pipeline {
    #[must_use]
    pub const fn new(source: SourceClient, loader: Loader) -> Self {
        Self { source, loader }
    }

    /// Execute one full run. Never fails; the outcome is in the report.
    pub async fn run(&self, options: &RunOptions) -> RunReport {
        let mut ctx = RunContext::new();

        match self.execute(&mut ctx, options).await {
            Ok(()) => info!(
                run_id = %ctx.run_id(),
                users_loaded = ctx.counters().users.loaded,
                carts_loaded = ctx.counters().carts.loaded,
                cart_items_loaded = ctx.counters().cart_items_loaded,
                skipped = ctx.counters().users.skipped + ctx.counters().carts.skipped,
                "Pipeline run completed"
            ),
            Err(err) => {
                error!(run_id = %ctx.run_id(), state = %ctx.state(), error = %err, "Pipeline run failed");
                ctx.fail(&err);
            }
        }

        ctx.finish()
    }

    #[instrument(skip_all, fields(run_id = %ctx.run_id()))]
    async fn execute(&self, ctx: &mut RunContext, options: &RunOptions) -> Result<(), PipelineError> {
        self.loader.ensure_schema().await?;

        ctx.advance(PipelineState::Extracting)?;
        let raw_users = self.extract(ctx, Resource::Users, options).await?;
        let raw_carts = self.extract(ctx, Resource::Carts, options).await?;

        ctx.advance(PipelineState::Transforming)?;
        let users = latest_by(transform_users(ctx, &raw_users), |user| user.id);
        let known: HashSet<UserId> = users.iter().map(|u| u.id).collect();
        let carts = latest_by(transform_carts(ctx, &raw_carts, &known), |(cart, _)| cart.id);

        ctx.advance(PipelineState::Loading)?;
        self.loader.upsert_users(&users).await?;
        ctx.counters.users.loaded = users.len() as u64;

        for (cart, items) in &carts {
            self.loader.upsert_cart(cart).await?;
            self.loader.replace_cart_items(cart.id, items).await?;
            ctx.counters.carts.loaded += 1;
            ctx.counters.cart_items_loaded += items.len() as u64;
        }

        ctx.advance(PipelineState::Completed)
    }

    async fn extract(
        &self,
        ctx: &mut RunContext,
        resource: Resource,
        options: &RunOptions,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let mut pages = std::pin::pin!(self.source.pages(
            resource,
            options.page_size,
            options.max_records
        ));

        let mut records = Vec::new();
        while let Some(page) = pages.try_next().await? {
            ctx.counters.resource_mut(resource).fetched += page.records.len() as u64;
            records.extend(page.records);
        }

        info!(%resource, fetched = records.len(), "Extracted collection");
        Ok(records)
    }
}

/// Keep the last record per key, in order of first appearance. A source
/// that repeats an id yields one row, so `loaded` counts rows.
fn latest_by<T, K: Eq + Hash>(records: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    let mut slots: HashMap<K, usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<T> = Vec::with_capacity(records.len());
    for record in records {
        match slots.entry(key(&record)) {
            Entry::Occupied(slot) => {
                if let Some(existing) = kept.get_mut(*slot.get()) {
                    *existing = record;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(record);
            }
        }
    }
    kept
}

fn transform_users(ctx: &mut RunContext, raw: &[RawRecord]) -> Vec<User> {
    let mut users = Vec::with_capacity(raw.len());
    for record in raw {
        match normalize_user(record) {
            Ok(user) => {
                ctx.counters.users.transformed += 1;
                users.push(user);
            }
            Err(err) => {
                warn!(error = %err, "Skipping user record");
                ctx.counters.users.skipped += 1;
            }
        }
    }
    users
}

fn transform_carts(
    ctx: &mut RunContext,
    raw: &[RawRecord],
    known_users: &HashSet<UserId>,
) -> Vec<(Cart, Vec<CartItem>)> {
    let mut carts = Vec::with_capacity(raw.len());
    for record in raw {
        let normalized = normalize_cart(record)
            .and_then(|(cart, items)| ensure_known_owner(&cart, known_users).map(|()| (cart, items)));
        match normalized {
            Ok(cart) => {
                ctx.counters.carts.transformed += 1;
                carts.push(cart);
            }
            Err(err) => {
                warn!(error = %err, "Skipping cart record");
                ctx.counters.carts.skipped += 1;
            }
        }
    }
    carts
}
