use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures::future::BoxFuture;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::binding::{BlurHandler, ChangeHandler};
use super::path::{FieldPath, empty_tree, get_in, set_in_place};
use super::submit::{ResetHandlerFn, SubmitHandlerFn};
use super::task::CancelHandle;
use super::validation::{FieldRegistration, FormValidatorFn, SchemaValidator, has_errors};

static FORM_ID_ALLOCATOR: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FormId(pub u64);

impl FormId {
    pub fn next() -> Self {
        Self(FORM_ID_ALLOCATOR.fetch_add(1, Ordering::SeqCst))
    }
}

impl Display for FormId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ValidationTicket(pub u64);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SubscriptionId(u64);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormOptions {
    pub validate_on_change: bool,
    pub validate_on_blur: bool,
    pub enable_reinitialize: bool,
    pub initial_status: Option<Value>,
    pub schema_context: Value,
}

impl Default for FormOptions {
    fn default() -> Self {
        Self {
            validate_on_change: true,
            validate_on_blur: true,
            enable_reinitialize: false,
            initial_status: None,
            schema_context: empty_tree(),
        }
    }
}

/// Validity reported while the form is still pristine.
#[derive(Clone)]
pub enum InitialValidity {
    Flag(bool),
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl InitialValidity {
    pub fn predicate(predicate: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Arc::new(predicate))
    }

    fn evaluate(&self, initial_values: &Value) -> bool {
        match self {
            InitialValidity::Flag(flag) => *flag,
            InitialValidity::Predicate(predicate) => predicate(initial_values),
        }
    }
}

impl Default for InitialValidity {
    fn default() -> Self {
        Self::Flag(false)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormSnapshot {
    pub initial_values: Value,
    pub values: Value,
    pub errors: Value,
    pub touched: Value,
    pub status: Option<Value>,
    pub is_submitting: bool,
    pub is_validating: bool,
    pub submit_count: u32,
    pub dirty: bool,
    pub is_valid: bool,
}

#[derive(Debug, Error)]
pub enum FormError {
    #[error("form state lock poisoned while {0}")]
    StatePoisoned(&'static str),
    #[error("submit handler rejected: {0}")]
    SubmitRejected(Value),
    #[error("form values do not match the model: {0}")]
    Model(#[from] serde_json::Error),
}

pub type FormResult<T> = Result<T, FormError>;

/// Hands fire-and-forget validation work to the host executor.
pub trait FormSpawner: Send + Sync + 'static {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

impl<F> FormSpawner for F
where
    F: Fn(BoxFuture<'static, ()>) + Send + Sync + 'static,
{
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        (self)(task)
    }
}

pub(super) type Listener = Arc<dyn Fn(&FormSnapshot) + Send + Sync>;

pub(super) struct ActiveRun {
    pub(super) ticket: ValidationTicket,
    pub(super) handle: CancelHandle,
}

pub(super) struct FormState {
    pub(super) id: FormId,
    pub(super) initial_values: Value,
    pub(super) values: Value,
    pub(super) errors: Value,
    pub(super) touched: Value,
    pub(super) status: Option<Value>,
    pub(super) is_submitting: bool,
    pub(super) is_validating: bool,
    pub(super) submit_count: u32,
    pub(super) active_run: Option<ActiveRun>,
    pub(super) disposed: bool,
    ticket_counter: u64,
}

impl FormState {
    pub(super) fn new(initial_values: Value, options: &FormOptions) -> Self {
        Self {
            id: FormId::next(),
            values: initial_values.clone(),
            initial_values,
            errors: empty_tree(),
            touched: empty_tree(),
            status: options.initial_status.clone(),
            is_submitting: false,
            is_validating: false,
            submit_count: 0,
            active_run: None,
            disposed: false,
            ticket_counter: 0,
        }
    }

    pub(super) fn next_ticket(&mut self) -> ValidationTicket {
        self.ticket_counter += 1;
        ValidationTicket(self.ticket_counter)
    }

    pub(super) fn cancel_active_run(&mut self) {
        let Some(run) = self.active_run.take() else {
            return;
        };
        if run.handle.cancel() {
            debug!("form {}: validation run {:?} canceled", self.id, run.ticket);
        }
    }
}

pub(super) struct ControllerInner {
    pub(super) options: FormOptions,
    pub(super) spawner: Arc<dyn FormSpawner>,
    pub(super) state: RwLock<FormState>,
    pub(super) fields: RwLock<BTreeMap<FieldPath, FieldRegistration>>,
    pub(super) schema: RwLock<Option<Arc<dyn SchemaValidator>>>,
    pub(super) form_validator: RwLock<Option<FormValidatorFn>>,
    pub(super) submit_handler: RwLock<Option<SubmitHandlerFn>>,
    pub(super) reset_handler: RwLock<Option<ResetHandlerFn>>,
    pub(super) initial_validity: RwLock<InitialValidity>,
    pub(super) change_handlers: RwLock<BTreeMap<FieldPath, ChangeHandler>>,
    pub(super) blur_handlers: RwLock<BTreeMap<FieldPath, BlurHandler>>,
    pub(super) listeners: RwLock<BTreeMap<SubscriptionId, Listener>>,
    next_subscription: AtomicU64,
}

#[derive(Clone)]
pub struct FormController {
    pub(super) inner: Arc<ControllerInner>,
}

impl FormController {
    pub fn new(initial_values: Value, options: FormOptions, spawner: impl FormSpawner) -> Self {
        let state = FormState::new(initial_values, &options);
        Self {
            inner: Arc::new(ControllerInner {
                options,
                spawner: Arc::new(spawner),
                state: RwLock::new(state),
                fields: RwLock::new(BTreeMap::new()),
                schema: RwLock::new(None),
                form_validator: RwLock::new(None),
                submit_handler: RwLock::new(None),
                reset_handler: RwLock::new(None),
                initial_validity: RwLock::new(InitialValidity::default()),
                change_handlers: RwLock::new(BTreeMap::new()),
                blur_handlers: RwLock::new(BTreeMap::new()),
                listeners: RwLock::new(BTreeMap::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    pub fn form_id(&self) -> FormResult<FormId> {
        Ok(read_lock(&self.inner.state, "reading form id")?.id)
    }

    pub fn options(&self) -> &FormOptions {
        &self.inner.options
    }

    pub fn set_initial_validity(&self, validity: InitialValidity) -> FormResult<()> {
        *write_lock(&self.inner.initial_validity, "setting initial validity")? = validity;
        self.notify()
    }

    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        let initial_validity =
            read_lock(&self.inner.initial_validity, "reading initial validity")?.clone();
        let state = read_lock(&self.inner.state, "creating form snapshot")?;
        let dirty = state.values != state.initial_values;
        let is_valid = if dirty {
            !has_errors(&state.errors)
        } else {
            initial_validity.evaluate(&state.initial_values)
        };
        Ok(FormSnapshot {
            initial_values: state.initial_values.clone(),
            values: state.values.clone(),
            errors: state.errors.clone(),
            touched: state.touched.clone(),
            status: state.status.clone(),
            is_submitting: state.is_submitting,
            is_validating: state.is_validating,
            submit_count: state.submit_count,
            dirty,
            is_valid,
        })
    }

    pub fn values(&self) -> FormResult<Value> {
        Ok(read_lock(&self.inner.state, "reading form values")?
            .values
            .clone())
    }

    pub fn errors(&self) -> FormResult<Value> {
        Ok(read_lock(&self.inner.state, "reading form errors")?
            .errors
            .clone())
    }

    pub fn dirty(&self) -> FormResult<bool> {
        let state = read_lock(&self.inner.state, "reading dirty flag")?;
        Ok(state.values != state.initial_values)
    }

    pub fn is_valid(&self) -> FormResult<bool> {
        Ok(self.snapshot()?.is_valid)
    }

    pub fn is_disposed(&self) -> FormResult<bool> {
        Ok(read_lock(&self.inner.state, "reading teardown flag")?.disposed)
    }

    pub fn set_values(&self, values: Value) -> FormResult<()> {
        self.update("writing form values", |state| {
            if state.values == values {
                return false;
            }
            state.values = values;
            true
        })?;
        if self.inner.options.validate_on_change {
            self.spawn_form_validation()?;
        }
        Ok(())
    }

    pub fn set_field_value(
        &self,
        path: impl Into<FieldPath>,
        value: Value,
        should_validate: bool,
    ) -> FormResult<()> {
        let path = path.into();
        if !addressable(&path) {
            return Ok(());
        }
        let mut rejected = false;
        self.update("writing field value", |state| {
            if get_in(&state.values, path.as_str()) == Some(&value) {
                return false;
            }
            rejected = !set_in_place(&mut state.values, path.as_str(), Some(value));
            if !rejected {
                trace!("form {}: value at `{path}` changed", state.id);
            }
            !rejected
        })?;
        if rejected {
            return Ok(());
        }
        if self.inner.options.validate_on_change && should_validate {
            self.spawn_form_validation()?;
        }
        Ok(())
    }

    pub fn set_field_touched(
        &self,
        path: impl Into<FieldPath>,
        touched: bool,
        should_validate: bool,
    ) -> FormResult<()> {
        let path = path.into();
        if !addressable(&path) {
            return Ok(());
        }
        let flag = Value::Bool(touched);
        let mut rejected = false;
        self.update("writing touched flag", |state| {
            if get_in(&state.touched, path.as_str()) == Some(&flag) {
                return false;
            }
            rejected = !set_in_place(&mut state.touched, path.as_str(), Some(flag));
            if !rejected {
                trace!("form {}: `{path}` touched = {touched}", state.id);
            }
            !rejected
        })?;
        if rejected {
            return Ok(());
        }
        if self.inner.options.validate_on_blur && should_validate {
            self.spawn_form_validation()?;
        }
        Ok(())
    }

    pub fn set_touched(&self, touched: Value) -> FormResult<()> {
        self.update("writing touched tree", |state| {
            if state.touched == touched {
                return false;
            }
            state.touched = touched;
            true
        })?;
        if self.inner.options.validate_on_blur {
            self.spawn_form_validation()?;
        }
        Ok(())
    }

    /// Writes or, with `None`, removes the error at `path`.
    pub fn set_field_error(&self, path: impl Into<FieldPath>, error: Option<Value>) -> FormResult<()> {
        let path = path.into();
        if !addressable(&path) {
            return Ok(());
        }
        self.update("writing field error", |state| {
            if get_in(&state.errors, path.as_str()) == error.as_ref() {
                return false;
            }
            set_in_place(&mut state.errors, path.as_str(), error)
        })?;
        Ok(())
    }

    pub fn set_errors(&self, errors: Value) -> FormResult<()> {
        self.update("writing error tree", |state| {
            if state.errors == errors {
                return false;
            }
            state.errors = errors;
            true
        })?;
        Ok(())
    }

    pub fn set_status(&self, status: Option<Value>) -> FormResult<()> {
        self.update("writing status", |state| {
            if state.status == status {
                return false;
            }
            state.status = status;
            true
        })?;
        Ok(())
    }

    pub fn set_submitting(&self, submitting: bool) -> FormResult<()> {
        self.update("writing submitting flag", |state| {
            if state.is_submitting == submitting {
                return false;
            }
            state.is_submitting = submitting;
            true
        })?;
        Ok(())
    }

    /// Returns the form to a pristine state. `next_values` also becomes the new
    /// baseline for `dirty`.
    pub fn reset_form(&self, next_values: Option<Value>) -> FormResult<()> {
        let initial_status = self.inner.options.initial_status.clone();
        self.update("resetting form", |state| {
            state.cancel_active_run();
            if let Some(values) = next_values {
                state.initial_values = values;
            }
            state.values = state.initial_values.clone();
            state.errors = empty_tree();
            state.touched = empty_tree();
            state.status = initial_status;
            state.is_submitting = false;
            state.is_validating = false;
            state.submit_count = 0;
            debug!("form {} reset", state.id);
            true
        })?;
        Ok(())
    }

    /// Adopts new initial values when reinitialization is enabled and they differ
    /// from the current baseline.
    pub fn reinitialize(&self, initial_values: Value) -> FormResult<bool> {
        if !self.inner.options.enable_reinitialize {
            debug!("reinitialize ignored: enable_reinitialize is off");
            return Ok(false);
        }
        let unchanged = read_lock(&self.inner.state, "comparing initial values")?.initial_values
            == initial_values;
        if unchanged {
            return Ok(false);
        }
        self.reset_form(Some(initial_values))?;
        Ok(true)
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&FormSnapshot) + Send + Sync + 'static,
    ) -> FormResult<SubscriptionId> {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::SeqCst));
        write_lock(&self.inner.listeners, "registering listener")?.insert(id, Arc::new(listener));
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> FormResult<bool> {
        Ok(write_lock(&self.inner.listeners, "removing listener")?
            .remove(&id)
            .is_some())
    }

    /// Tears the controller down. Later writes and late validation results are ignored.
    pub fn dispose(&self) -> FormResult<()> {
        {
            let mut state = write_lock(&self.inner.state, "disposing form")?;
            if state.disposed {
                return Ok(());
            }
            state.disposed = true;
            state.cancel_active_run();
            state.is_validating = false;
            debug!("form {} disposed", state.id);
        }
        write_lock(&self.inner.change_handlers, "clearing change handlers")?.clear();
        write_lock(&self.inner.blur_handlers, "clearing blur handlers")?.clear();
        write_lock(&self.inner.listeners, "clearing listeners")?.clear();
        Ok(())
    }

    /// Applies `apply` to the committed state and notifies listeners when it
    /// reports a change. Does nothing once disposed.
    pub(super) fn update(
        &self,
        context: &'static str,
        apply: impl FnOnce(&mut FormState) -> bool,
    ) -> FormResult<bool> {
        let changed = {
            let mut state = write_lock(&self.inner.state, context)?;
            if state.disposed {
                return Ok(false);
            }
            apply(&mut state)
        };
        if changed {
            self.notify()?;
        }
        Ok(changed)
    }

    pub(super) fn notify(&self) -> FormResult<()> {
        let listeners = read_lock(&self.inner.listeners, "collecting listeners")?
            .values()
            .cloned()
            .collect::<Vec<_>>();
        if listeners.is_empty() {
            return Ok(());
        }
        let snapshot = self.snapshot()?;
        for listener in listeners {
            listener(&snapshot);
        }
        Ok(())
    }

    pub(super) fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.inner.spawner.spawn(task);
    }

    pub(super) fn downgrade(&self) -> Weak<ControllerInner> {
        Arc::downgrade(&self.inner)
    }

    pub(super) fn upgrade(inner: &Weak<ControllerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }
}

fn addressable(path: &FieldPath) -> bool {
    if path.segments().is_empty() {
        warn!("ignoring write to an empty field path");
        return false;
    }
    true
}

pub(super) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| FormError::StatePoisoned(context))
}

pub(super) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    context: &'static str,
) -> FormResult<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| FormError::StatePoisoned(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_fill_missing_keys_with_defaults() {
        let options: FormOptions =
            serde_json::from_value(json!({"validate_on_blur": false, "initial_status": "new"}))
                .expect("options deserialize");
        assert_eq!(
            options,
            FormOptions {
                validate_on_blur: false,
                initial_status: Some(json!("new")),
                ..FormOptions::default()
            }
        );
    }

    #[test]
    fn form_ids_are_unique() {
        assert_ne!(FormId::next(), FormId::next());
    }

    #[test]
    fn poisoned_lock_reports_its_context() {
        let lock = RwLock::new(0);
        let poisoned: std::thread::Result<()> = std::panic::catch_unwind(|| {
            let _guard = lock.write().expect("first writer");
            panic!("poison the lock");
        });
        assert!(poisoned.is_err());
        let error = read_lock(&lock, "reading poisoned value").expect_err("lock is poisoned");
        assert!(matches!(error, FormError::StatePoisoned("reading poisoned value")));
    }
}
