//! The resumable collection loop.
//!
//! One search per alphabet token, strictly in order. New members are held in
//! an accumulator that is merged into the store every `batch_size` tokens and
//! whenever the loop stops; the checkpoint is written after every token so a
//! restarted process continues with the next unprocessed token.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use chrono::Local;
use log::{info, warn, error};

use crate::alphabet;
use crate::config::CollectorConfig;
use crate::delay_manager::DelayManager;
use crate::directory::{DirectorySearch, SearchError};
use crate::member::{Member, Record};
use crate::resume_manager::Checkpoint;
use crate::store::DurableStore;

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSettings {
    pub delay: Duration,
    pub batch_size: u32,
    pub batch_pause: Duration,
    pub daily_limit: u32,
}

impl From<&CollectorConfig> for CollectionSettings {
    fn from(config: &CollectorConfig) -> Self {
        CollectionSettings {
            delay: config.delay(),
            batch_size: config.batch_size.max(1),
            batch_pause: config.pause(),
            daily_limit: config.daily_limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub total_before: usize,
    pub new_found: usize,
    pub total_after: usize,
    pub requests_this_window: u32,
    pub tokens_processed: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every alphabet token was processed by earlier runs.
    AlreadyComplete,
    Completed(Summary),
    /// The window's request budget is spent; resume after it rolls over.
    DailyLimitReached(Summary),
    Interrupted(Summary),
}

impl RunOutcome {
    pub fn summary(&self) -> Option<&Summary> {
        match self {
            RunOutcome::AlreadyComplete => None,
            RunOutcome::Completed(s)
            | RunOutcome::DailyLimitReached(s)
            | RunOutcome::Interrupted(s) => Some(s),
        }
    }
}

/// Everything a run mutates, loaded once by [`Collector::prepare`].
#[derive(Debug)]
pub struct CollectionState {
    known: HashSet<i64>,
    accumulator: BTreeMap<i64, Record>,
    checkpoint: Checkpoint,
    remaining: Vec<String>,
    total_before: usize,
    new_found: usize,
    processed_in_session: usize,
}

impl CollectionState {
    pub fn remaining(&self) -> &[String] {
        &self.remaining
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn total_before(&self) -> usize {
        self.total_before
    }

    /// Records found but not yet merged into the store.
    pub fn pending(&self) -> usize {
        self.accumulator.len()
    }

    fn summary(&self) -> Summary {
        Summary {
            total_before: self.total_before,
            new_found: self.new_found,
            total_after: self.total_before + self.new_found,
            requests_this_window: self.checkpoint.requests_today,
            tokens_processed: self.processed_in_session,
        }
    }
}

pub struct Collector<D, S> {
    directory: D,
    store: S,
    settings: CollectionSettings,
    alphabet: Vec<String>,
    delay: DelayManager,
}

impl<D: DirectorySearch, S: DurableStore> Collector<D, S> {
    pub fn new(directory: D, store: S, settings: CollectionSettings, delay: DelayManager) -> Self {
        Collector {
            directory,
            store,
            settings,
            alphabet: alphabet::default_alphabet(),
            delay,
        }
    }

    pub fn with_alphabet(mut self, alphabet: Vec<String>) -> Self {
        self.alphabet = alphabet;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads known records and the checkpoint, rolling the request window
    /// over if a day has passed.
    pub fn prepare(&self) -> CollectionState {
        let known = match self.store.load_ids() {
            Ok(ids) => ids,
            Err(e) => {
                error!("Failed to load existing records: {}", e);
                HashSet::new()
            }
        };
        info!("Existing records: {}", known.len());

        let mut checkpoint = self.store.load_checkpoint();
        if checkpoint.roll_window(Local::now()) {
            info!("New day, request counter reset.");
        }
        info!(
            "Letters processed: {}, requests in window: {}/{}",
            checkpoint.processed_letters.len(),
            checkpoint.requests_today,
            self.settings.daily_limit
        );

        let remaining = alphabet::remaining(&self.alphabet, &checkpoint.processed_letters);
        CollectionState {
            total_before: known.len(),
            known,
            accumulator: BTreeMap::new(),
            checkpoint,
            remaining,
            new_found: 0,
            processed_in_session: 0,
        }
    }

    pub fn run(&mut self) -> RunOutcome {
        let state = self.prepare();
        self.collect(state)
    }

    /// Walks the remaining tokens of a prepared state.
    pub fn collect(&mut self, mut state: CollectionState) -> RunOutcome {
        if state.remaining.is_empty() {
            info!("All letters already processed.");
            return RunOutcome::AlreadyComplete;
        }

        let tokens = state.remaining.clone();
        let batch_size = self.settings.batch_size.max(1) as usize;

        for (i, token) in tokens.iter().enumerate() {
            if self.delay.stop_requested() {
                return self.suspend(state, RunOutcome::Interrupted);
            }
            if state.checkpoint.requests_today >= self.settings.daily_limit {
                warn!("Daily limit reached ({} requests).", self.settings.daily_limit);
                info!("Continuing tomorrow. Processed this session: {} letters", state.processed_in_session);
                return self.suspend(state, RunOutcome::DailyLimitReached);
            }

            if !self.process_token(&mut state, token) {
                return self.suspend(state, RunOutcome::Interrupted);
            }
            state.processed_in_session += 1;
            self.save_checkpoint(&mut state);

            if i + 1 < tokens.len() {
                let rested = if state.processed_in_session % batch_size == 0 {
                    self.flush(&mut state);
                    self.delay.pause(self.delay.jittered(self.settings.batch_pause), "batch pause")
                } else {
                    self.delay.pause(self.delay.jittered(self.settings.delay), "request delay")
                };
                if !rested {
                    return self.suspend(state, RunOutcome::Interrupted);
                }
            }
        }

        self.flush(&mut state);
        let summary = state.summary();
        info!("Session complete.");
        info!("Before: {}", summary.total_before);
        info!("New found: {}", summary.new_found);
        info!("After: {}", summary.total_after);
        info!("Requests in window: {}", summary.requests_this_window);
        RunOutcome::Completed(summary)
    }

    /// Searches `token` and accumulates unseen members. Returns false when a
    /// stop was requested while waiting out a rate limit; the token is then
    /// left unprocessed.
    fn process_token(&self, state: &mut CollectionState, token: &str) -> bool {
        info!(
            "Searching '{}' (request {}/{})",
            token,
            state.checkpoint.requests_today + 1,
            self.settings.daily_limit
        );

        let members = match self.search_with_retry(token) {
            Some(members) => members,
            None => return false,
        };

        for member in members {
            if !state.known.insert(member.id) {
                continue;
            }
            let record = self.materialize(&member);
            state.accumulator.insert(member.id, record);
            state.new_found += 1;
            if state.new_found % 10 == 0 {
                info!("New records found: {}", state.new_found);
            }
        }

        state.checkpoint.mark_processed(token);
        true
    }

    fn materialize(&self, member: &Member) -> Record {
        let photo = self.directory.fetch_avatar(member);
        Record::from_member(member, photo)
    }

    /// Retries the same token for as long as the provider keeps rate
    /// limiting. Other failures count as an empty result.
    fn search_with_retry(&self, token: &str) -> Option<Vec<Member>> {
        loop {
            match self.directory.search(token) {
                Ok(members) => return Some(members),
                Err(SearchError::RateLimited { retry_after }) => {
                    warn!("Flood wait on '{}': {} seconds", token, retry_after.as_secs());
                    if !self.delay.pause(retry_after, "flood wait") {
                        return None;
                    }
                }
                Err(e) => {
                    error!("Search '{}' failed: {}", token, e);
                    return Some(Vec::new());
                }
            }
        }
    }

    /// Merges the accumulator into the store. On failure the records stay in
    /// the accumulator for the next flush.
    pub fn flush(&mut self, state: &mut CollectionState) -> bool {
        let batch: Vec<Record> = state.accumulator.values().cloned().collect();
        match self.store.merge(&batch) {
            Ok(()) => {
                if !batch.is_empty() {
                    info!(
                        "Autosave: +{} new (total {})",
                        batch.len(),
                        state.total_before + state.new_found
                    );
                }
                state.accumulator.clear();
                true
            }
            Err(e) => {
                error!("Failed to save {} records: {}", batch.len(), e);
                false
            }
        }
    }

    fn save_checkpoint(&mut self, state: &mut CollectionState) {
        state.checkpoint.last_run = Some(Local::now());
        if let Err(e) = self.store.save_checkpoint(&state.checkpoint) {
            error!("Failed to save progress: {}", e);
        }
    }

    fn suspend(&mut self, mut state: CollectionState, outcome: fn(Summary) -> RunOutcome) -> RunOutcome {
        self.flush(&mut state);
        self.save_checkpoint(&mut state);
        outcome(state.summary())
    }
}
