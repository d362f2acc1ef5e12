//! Shared fixtures for the command pipeline integration tests: a small bank
//! account domain, a repository that loads accounts into the unit of work,
//! and store/dispatcher wrappers that record every call and inject faults.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use command_bus::{
    AggregateRoot, BoxError, Command, CommandContext, CommandHandler, CommandNotifications,
    CommandProcessor, DispatchError, EventDispatcher, HandlerRegistry, NoopNotifications,
    PendingEvents, UnitOfWorkError,
};
use event_store::{
    AggregateId, EventEnvelope, EventReader, EventStore, EventStoreError, EventStoreTransaction,
    InMemoryEventStore, TransactionScope, TransactionStatus, Version,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub type Ctx = CommandContext<AggregateId, EventEnvelope>;
pub type Processor = CommandProcessor<AggregateId, EventEnvelope>;
pub type Registry = HandlerRegistry<AggregateId, EventEnvelope>;

// ============================================================================
// Domain
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    Opened { owner: String },
    Deposited { amount: i64 },
    Withdrawn { amount: i64 },
}

impl AccountEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::Opened { .. } => "AccountOpened",
            AccountEvent::Deposited { .. } => "MoneyDeposited",
            AccountEvent::Withdrawn { .. } => "MoneyWithdrawn",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Account {0} does not exist")]
    NotFound(AggregateId),

    #[error("Account {0} is already open")]
    AlreadyOpen(AggregateId),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error(transparent)]
    UnitOfWork(#[from] UnitOfWorkError),
}

#[derive(Debug)]
pub struct Account {
    id: AggregateId,
    owner: Option<String>,
    balance: i64,
    version: Version,
    pending: PendingEvents<EventEnvelope>,
}

impl Account {
    pub fn new(id: AggregateId) -> Self {
        Self {
            id,
            owner: None,
            balance: 0,
            version: Version::initial(),
            pending: PendingEvents::new(),
        }
    }

    /// Rebuilds an account from its committed stream.
    pub fn from_history(id: AggregateId, history: &[EventEnvelope]) -> Result<Self, AccountError> {
        let mut account = Self::new(id);
        for envelope in history {
            account.apply(&envelope.decode()?);
        }
        account.version = Version::initial().advance(history.len());
        Ok(account)
    }

    pub fn is_open(&self) -> bool {
        self.owner.is_some()
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn open(&mut self, owner: &str) -> Result<(), AccountError> {
        if self.is_open() {
            return Err(AccountError::AlreadyOpen(self.id));
        }
        self.record(AccountEvent::Opened {
            owner: owner.to_string(),
        })
    }

    pub fn deposit(&mut self, amount: i64) -> Result<(), AccountError> {
        self.ensure_open()?;
        self.record(AccountEvent::Deposited { amount })
    }

    pub fn withdraw(&mut self, amount: i64) -> Result<(), AccountError> {
        self.ensure_open()?;
        if self.balance < amount {
            return Err(AccountError::InsufficientFunds {
                balance: self.balance,
                requested: amount,
            });
        }
        self.record(AccountEvent::Withdrawn { amount })
    }

    fn ensure_open(&self) -> Result<(), AccountError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(AccountError::NotFound(self.id))
        }
    }

    fn record(&mut self, event: AccountEvent) -> Result<(), AccountError> {
        let envelope = EventEnvelope::wrap(self.id, "Account", event.event_type(), &event)?;
        self.apply(&event);
        self.pending.record(envelope);
        Ok(())
    }

    fn apply(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::Opened { owner } => self.owner = Some(owner.clone()),
            AccountEvent::Deposited { amount } => self.balance += amount,
            AccountEvent::Withdrawn { amount } => self.balance -= amount,
        }
    }
}

impl AggregateRoot for Account {
    type Id = AggregateId;
    type Event = EventEnvelope;

    fn aggregate_type(&self) -> &'static str {
        "Account"
    }

    fn id(&self) -> &AggregateId {
        &self.id
    }

    fn expected_version(&self) -> Version {
        self.version
    }

    fn pending_events(&self) -> &[EventEnvelope] {
        self.pending.as_slice()
    }

    fn take_pending_events(&mut self) -> Vec<EventEnvelope> {
        self.pending.take()
    }
}

/// Loads accounts from committed streams and tracks them in the unit of work.
#[derive(Clone)]
pub struct AccountRepository {
    reader: Arc<dyn EventReader<AggregateId, EventEnvelope>>,
}

impl AccountRepository {
    pub fn new(reader: impl EventReader<AggregateId, EventEnvelope> + 'static) -> Self {
        Self {
            reader: Arc::new(reader),
        }
    }

    pub async fn load<'c>(
        &self,
        id: AggregateId,
        context: &'c mut Ctx,
    ) -> Result<&'c mut Account, AccountError> {
        if !context.unit_of_work().contains(&id) {
            let history = self.reader.read_stream(&id).await?;
            context
                .unit_of_work_mut()
                .attach(Account::from_history(id, &history)?)?;
        }
        context
            .unit_of_work_mut()
            .get_mut::<Account>(&id)
            .ok_or(AccountError::NotFound(id))
    }
}

// ============================================================================
// Commands and handlers
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAccount {
    pub account_id: AggregateId,
    pub owner: String,
}

impl Command for OpenAccount {
    fn command_name(&self) -> &'static str {
        "OpenAccount"
    }

    fn validate(&self) -> Result<(), String> {
        if self.owner.trim().is_empty() {
            Err("owner must not be empty".to_string())
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Deposit {
    pub account_id: AggregateId,
    pub amount: i64,
}

impl Command for Deposit {
    fn command_name(&self) -> &'static str {
        "Deposit"
    }

    fn validate(&self) -> Result<(), String> {
        if self.amount > 0 {
            Ok(())
        } else {
            Err("amount must be positive".to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub from: AggregateId,
    pub to: AggregateId,
    pub amount: i64,
}

impl Command for Transfer {
    fn command_name(&self) -> &'static str {
        "Transfer"
    }

    fn validate(&self) -> Result<(), String> {
        if self.from == self.to {
            return Err("cannot transfer to the same account".to_string());
        }
        if self.amount <= 0 {
            return Err("amount must be positive".to_string());
        }
        Ok(())
    }
}

/// Loads an account without changing it.
#[derive(Debug, Clone)]
pub struct AuditAccount {
    pub account_id: AggregateId,
}

impl Command for AuditAccount {}

/// A command nobody handles.
#[derive(Debug, Clone)]
pub struct CloseBooks;

impl Command for CloseBooks {}

pub struct OpenAccountHandler(pub AccountRepository);

#[async_trait]
impl CommandHandler<OpenAccount, AggregateId, EventEnvelope> for OpenAccountHandler {
    async fn handle(
        &self,
        command: &OpenAccount,
        context: &mut Ctx,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        let account = self.0.load(command.account_id, context).await?;
        account.open(&command.owner)?;
        Ok(())
    }
}

pub struct DepositHandler(pub AccountRepository);

#[async_trait]
impl CommandHandler<Deposit, AggregateId, EventEnvelope> for DepositHandler {
    async fn handle(
        &self,
        command: &Deposit,
        context: &mut Ctx,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        let account = self.0.load(command.account_id, context).await?;
        account.deposit(command.amount)?;
        Ok(())
    }
}

pub struct TransferHandler(pub AccountRepository);

#[async_trait]
impl CommandHandler<Transfer, AggregateId, EventEnvelope> for TransferHandler {
    async fn handle(
        &self,
        command: &Transfer,
        context: &mut Ctx,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        self.0
            .load(command.from, context)
            .await?
            .withdraw(command.amount)?;
        self.0
            .load(command.to, context)
            .await?
            .deposit(command.amount)?;
        Ok(())
    }
}

pub struct AuditHandler(pub AccountRepository);

#[async_trait]
impl CommandHandler<AuditAccount, AggregateId, EventEnvelope> for AuditHandler {
    async fn handle(
        &self,
        command: &AuditAccount,
        context: &mut Ctx,
        _cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        self.0.load(command.account_id, context).await?;
        Ok(())
    }
}

/// Registers the standard account handlers.
pub fn account_handlers(registry: &mut Registry, repository: &AccountRepository) {
    registry
        .register::<OpenAccount, _>(OpenAccountHandler(repository.clone()))
        .register::<Deposit, _>(DepositHandler(repository.clone()))
        .register::<Transfer, _>(TransferHandler(repository.clone()))
        .register::<AuditAccount, _>(AuditHandler(repository.clone()));
}

// ============================================================================
// Hooks
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationId(pub String);

/// Seeds a correlation id per invocation and stamps it on every event.
#[derive(Clone, Default)]
pub struct CorrelationHooks {
    pub prepared: Arc<AtomicUsize>,
    pub enriched: Arc<AtomicUsize>,
}

impl CorrelationHooks {
    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn enriched(&self) -> usize {
        self.enriched.load(Ordering::SeqCst)
    }
}

impl CommandNotifications<AggregateId, EventEnvelope> for CorrelationHooks {
    fn on_prepare_context(&self, _command: &dyn Command, context: &mut Ctx) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        let correlation = CorrelationId(format!("corr-{}", context.invocation_id()));
        context.insert(correlation);
    }

    fn on_enrich_event(
        &self,
        event: EventEnvelope,
        command: &dyn Command,
        context: &Ctx,
    ) -> EventEnvelope {
        self.enriched.fetch_add(1, Ordering::SeqCst);
        let correlation = context
            .get::<CorrelationId>()
            .map(|id| id.0.clone())
            .unwrap_or_default();
        event
            .with_metadata("correlation_id", serde_json::json!(correlation))
            .with_metadata("command", serde_json::json!(command.command_name()))
    }
}

// ============================================================================
// Recording collaborators
// ============================================================================

/// One interaction with the store or dispatcher, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Begin,
    StoreEvents {
        aggregate_id: AggregateId,
        expected: Version,
        event_types: Vec<String>,
    },
    Dispatch {
        event_types: Vec<String>,
    },
    Commit,
    Rollback,
}

pub type CallLog = Arc<Mutex<Vec<Call>>>;

/// Failures injected into the recording collaborators.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub begin: bool,
    pub store_events_for: Option<AggregateId>,
    pub commit: bool,
    pub rollback: bool,
    pub dispatch: bool,
    /// Cancelled right after the first successful `store_events`.
    pub cancel_after_store: Option<CancellationToken>,
    /// Cancelled right after the dispatcher accepted the batch.
    pub cancel_after_dispatch: Option<CancellationToken>,
    /// Cancelled by the dispatcher itself, which then gives up on the batch.
    pub cancel_during_dispatch: Option<CancellationToken>,
}

pub fn event_types(events: &[EventEnvelope]) -> Vec<String> {
    events.iter().map(|event| event.event_type.clone()).collect()
}

#[derive(Clone)]
pub struct RecordingStore {
    inner: InMemoryEventStore,
    calls: CallLog,
    faults: Faults,
}

#[async_trait]
impl EventStore<AggregateId, EventEnvelope> for RecordingStore {
    async fn begin_transaction(
        &self,
        scope: &TransactionScope,
    ) -> event_store::Result<Box<dyn EventStoreTransaction<AggregateId, EventEnvelope>>> {
        self.calls.lock().unwrap().push(Call::Begin);
        if self.faults.begin {
            return Err(EventStoreError::Unavailable("store offline".into()));
        }
        Ok(Box::new(RecordingTransaction {
            inner: self.inner.begin_transaction(scope).await?,
            calls: self.calls.clone(),
            faults: self.faults.clone(),
        }))
    }
}

struct RecordingTransaction {
    inner: Box<dyn EventStoreTransaction<AggregateId, EventEnvelope>>,
    calls: CallLog,
    faults: Faults,
}

#[async_trait]
impl EventStoreTransaction<AggregateId, EventEnvelope> for RecordingTransaction {
    async fn store_events(
        &mut self,
        aggregate_id: &AggregateId,
        expected_version: Version,
        events: &[EventEnvelope],
        cancel: &CancellationToken,
    ) -> event_store::Result<Version> {
        self.calls.lock().unwrap().push(Call::StoreEvents {
            aggregate_id: *aggregate_id,
            expected: expected_version,
            event_types: event_types(events),
        });
        if self.faults.store_events_for == Some(*aggregate_id) {
            return Err(EventStoreError::Unavailable("disk full".into()));
        }
        let version = self
            .inner
            .store_events(aggregate_id, expected_version, events, cancel)
            .await?;
        if let Some(token) = &self.faults.cancel_after_store {
            token.cancel();
        }
        Ok(version)
    }

    async fn commit(&mut self) -> event_store::Result<()> {
        self.calls.lock().unwrap().push(Call::Commit);
        if self.faults.commit {
            return Err(EventStoreError::Unavailable("commit lost".into()));
        }
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> event_store::Result<()> {
        self.calls.lock().unwrap().push(Call::Rollback);
        if self.faults.rollback {
            return Err(EventStoreError::Unavailable("rollback lost".into()));
        }
        self.inner.rollback().await
    }

    fn status(&self) -> TransactionStatus {
        self.inner.status()
    }
}

pub type Batches = Arc<Mutex<Vec<Vec<EventEnvelope>>>>;

#[derive(Clone)]
pub struct RecordingDispatcher {
    calls: CallLog,
    batches: Batches,
    faults: Faults,
}

#[async_trait]
impl EventDispatcher<EventEnvelope> for RecordingDispatcher {
    async fn dispatch(
        &self,
        events: &[EventEnvelope],
        _cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push(Call::Dispatch {
            event_types: event_types(events),
        });
        if self.faults.dispatch {
            return Err(DispatchError::Rejected("subscriber offline".into()));
        }
        if let Some(token) = &self.faults.cancel_during_dispatch {
            token.cancel();
            return Err(DispatchError::Cancelled);
        }
        self.batches.lock().unwrap().push(events.to_vec());
        if let Some(token) = &self.faults.cancel_after_dispatch {
            token.cancel();
        }
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub processor: Processor,
    pub store: InMemoryEventStore,
    pub repository: AccountRepository,
    calls: CallLog,
    batches: Batches,
}

impl Harness {
    pub fn new() -> Self {
        Self::configure(Faults::default(), NoopNotifications, |_, _, _| {})
    }

    pub fn with_faults(faults: Faults) -> Self {
        Self::configure(faults, NoopNotifications, |_, _, _| {})
    }

    pub fn configure<N, F>(faults: Faults, notifications: N, extra_handlers: F) -> Self
    where
        N: CommandNotifications<AggregateId, EventEnvelope> + 'static,
        F: FnOnce(&mut Registry, &AccountRepository, &InMemoryEventStore),
    {
        command_bus::telemetry::init_test_tracing();

        let store = InMemoryEventStore::new();
        let repository = AccountRepository::new(store.clone());
        let calls = CallLog::default();
        let batches = Batches::default();

        let mut registry = Registry::new();
        account_handlers(&mut registry, &repository);
        extra_handlers(&mut registry, &repository, &store);

        let processor = CommandProcessor::builder()
            .handlers(registry)
            .store(RecordingStore {
                inner: store.clone(),
                calls: calls.clone(),
                faults: faults.clone(),
            })
            .dispatcher(RecordingDispatcher {
                calls: calls.clone(),
                batches: batches.clone(),
                faults,
            })
            .notifications(notifications)
            .build()
            .unwrap();

        Self {
            processor,
            store,
            repository,
            calls,
            batches,
        }
    }

    /// Opens an account with an initial balance, then forgets the calls it
    /// took.
    pub async fn seed_account(&self, owner: &str, balance: i64) -> AggregateId {
        let account_id = AggregateId::new();
        let cancel = CancellationToken::new();
        self.processor
            .process(
                OpenAccount {
                    account_id,
                    owner: owner.to_string(),
                },
                &cancel,
            )
            .await
            .unwrap();
        if balance > 0 {
            self.processor
                .process(
                    Deposit {
                        account_id,
                        amount: balance,
                    },
                    &cancel,
                )
                .await
                .unwrap();
        }
        self.reset();
        account_id
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<Vec<EventEnvelope>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
        self.batches.lock().unwrap().clear();
    }

    pub async fn balance(&self, account_id: AggregateId) -> i64 {
        let history = self.store.read_stream(&account_id).await.unwrap();
        Account::from_history(account_id, &history)
            .unwrap()
            .balance()
    }

    pub async fn stream_types(&self, account_id: AggregateId) -> Vec<String> {
        event_types(&self.store.read_stream(&account_id).await.unwrap())
    }
}
