use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt, join_all};
use log::{debug, warn};
use serde_json::Value;

use super::controller::{
    ActiveRun, FormController, FormResult, FormState, ValidationTicket, read_lock, write_lock,
};
use super::merge::deep_merge_all;
use super::path::{FieldPath, empty_tree, get_in, is_truthy, set_in, set_in_place};
use super::task::{CancelHandle, CancelableTask};

/// Result of a validator or handler that may finish now, later, or fail outright.
pub enum MaybeAsync<T, E> {
    Sync(T),
    Async(BoxFuture<'static, Result<T, E>>),
    Failed(E),
}

impl<T, E> MaybeAsync<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::Async(future.boxed())
    }

    pub fn settle(self) -> BoxFuture<'static, Result<T, E>> {
        match self {
            MaybeAsync::Sync(value) => future::ready(Ok(value)).boxed(),
            MaybeAsync::Async(pending) => pending,
            MaybeAsync::Failed(error) => future::ready(Err(error)).boxed(),
        }
    }
}

impl<T, E> From<Result<T, E>> for MaybeAsync<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => MaybeAsync::Sync(value),
            Err(error) => MaybeAsync::Failed(error),
        }
    }
}

pub type FieldValidatorFn = Arc<dyn Fn(&Value) -> MaybeAsync<Option<Value>, Value> + Send + Sync>;
pub type FormValidatorFn = Arc<dyn Fn(&Value) -> MaybeAsync<Value, Value> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FieldRegistration {
    pub validate: Option<FieldValidatorFn>,
}

impl FieldRegistration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_validator<F>(validator: F) -> Self
    where
        F: Fn(&Value) -> MaybeAsync<Option<Value>, Value> + Send + Sync + 'static,
    {
        Self {
            validate: Some(Arc::new(validator)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchemaOptions {
    pub abort_early: bool,
    pub context: Value,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchemaIssue {
    pub path: String,
    pub message: String,
}

/// Failure reported by a schema validator. With no `inner` issues the root
/// `path`/`message` pair is the only error.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SchemaRejection {
    pub path: String,
    pub message: String,
    pub inner: Vec<SchemaIssue>,
}

impl SchemaRejection {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            inner: Vec::new(),
        }
    }

    pub fn with_issue(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.inner.push(SchemaIssue {
            path: path.into(),
            message: message.into(),
        });
        self
    }
}

pub trait SchemaValidator: Send + Sync + 'static {
    fn validate(&self, data: &Value, options: &SchemaOptions) -> MaybeAsync<(), SchemaRejection>;
}

impl<F> SchemaValidator for F
where
    F: Fn(&Value, &SchemaOptions) -> MaybeAsync<(), SchemaRejection> + Send + Sync + 'static,
{
    fn validate(&self, data: &Value, options: &SchemaOptions) -> MaybeAsync<(), SchemaRejection> {
        (self)(data, options)
    }
}

pub fn has_errors(errors: &Value) -> bool {
    errors.as_object().is_some_and(|map| !map.is_empty())
}

/// Converts a schema rejection into an error tree; the first message per path wins.
pub fn schema_errors(rejection: &SchemaRejection) -> Value {
    let mut errors = empty_tree();
    if rejection.inner.is_empty() {
        if rejection.path.is_empty() {
            warn!(
                "schema rejection `{}` has no field path; dropping it",
                rejection.message
            );
        } else {
            set_in_place(
                &mut errors,
                &rejection.path,
                Some(Value::String(rejection.message.clone())),
            );
        }
        return errors;
    }

    for issue in &rejection.inner {
        if get_in(&errors, &issue.path).is_some_and(is_truthy) {
            continue;
        }
        set_in_place(
            &mut errors,
            &issue.path,
            Some(Value::String(issue.message.clone())),
        );
    }
    errors
}

/// Copy of `values` where blank strings read as unset.
pub(super) fn strip_empty_strings(values: &Value) -> Value {
    let is_blank = |value: &Value| value.as_str().is_some_and(str::is_empty);
    match values {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, value)| !is_blank(value))
                .map(|(key, value)| (key.clone(), strip_empty_strings(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| {
                    if is_blank(item) {
                        Value::Null
                    } else {
                        strip_empty_strings(item)
                    }
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

#[derive(Clone)]
pub(super) struct ValidationPipeline {
    fields: Vec<(FieldPath, FieldValidatorFn)>,
    schema: Option<Arc<dyn SchemaValidator>>,
    schema_options: SchemaOptions,
    form_validator: Option<FormValidatorFn>,
}

impl ValidationPipeline {
    /// Runs field, schema and form-validator sources concurrently and merges them
    /// in that order. Never fails: every failure becomes error content.
    pub(super) fn run(self, values: Value) -> BoxFuture<'static, Value> {
        let field_level = run_field_level(self.fields, &values);
        let schema_level = match self.schema {
            Some(schema) => run_schema_level(schema.as_ref(), &self.schema_options, &values),
            None => future::ready(empty_tree()).boxed(),
        };
        let handler_level = match self.form_validator {
            Some(validator) => run_handler_level(&validator, &values),
            None => future::ready(empty_tree()).boxed(),
        };

        async move {
            let (field_errors, schema_errors, handler_errors) =
                future::join3(field_level, schema_level, handler_level).await;
            deep_merge_all(&[field_errors, schema_errors, handler_errors])
        }
        .boxed()
    }
}

fn run_single_field(validator: &FieldValidatorFn, value: &Value) -> BoxFuture<'static, Option<Value>> {
    let outcome = validator(value);
    async move {
        let error = match outcome.settle().await {
            Ok(result) => result,
            Err(failure) => Some(failure),
        };
        error.filter(is_truthy)
    }
    .boxed()
}

fn run_field_level(
    fields: Vec<(FieldPath, FieldValidatorFn)>,
    values: &Value,
) -> BoxFuture<'static, Value> {
    if fields.is_empty() {
        return future::ready(empty_tree()).boxed();
    }

    let pending = fields
        .into_iter()
        .map(|(path, validator)| {
            let value = get_in(values, path.as_str())
                .cloned()
                .unwrap_or(Value::Null);
            run_single_field(&validator, &value).map(move |error| (path, error))
        })
        .collect::<Vec<_>>();

    async move {
        join_all(pending)
            .await
            .into_iter()
            .fold(empty_tree(), |mut errors, (path, error)| {
                if error.is_some() {
                    set_in_place(&mut errors, path.as_str(), error);
                }
                errors
            })
    }
    .boxed()
}

fn run_schema_level(
    schema: &dyn SchemaValidator,
    options: &SchemaOptions,
    values: &Value,
) -> BoxFuture<'static, Value> {
    let data = strip_empty_strings(values);
    let outcome = schema.validate(&data, options);
    outcome
        .settle()
        .map(|result| match result {
            Ok(()) => empty_tree(),
            Err(rejection) => schema_errors(&rejection),
        })
        .boxed()
}

fn run_handler_level(validator: &FormValidatorFn, values: &Value) -> BoxFuture<'static, Value> {
    match validator(values) {
        // Only rejections carry errors; a synchronous return is not merged.
        MaybeAsync::Sync(_) => future::ready(empty_tree()).boxed(),
        MaybeAsync::Async(pending) => pending
            .map(|result| result.err().map(handler_tree).unwrap_or_else(empty_tree))
            .boxed(),
        MaybeAsync::Failed(errors) => future::ready(handler_tree(errors)).boxed(),
    }
}

fn handler_tree(errors: Value) -> Value {
    if errors.is_object() {
        errors
    } else {
        warn!("form validator rejected with a non-object value; ignoring it");
        empty_tree()
    }
}

pub(super) struct WholeFormRun {
    pub(super) ticket: ValidationTicket,
    pub(super) submit_attempt: u32,
    task: CancelableTask<BoxFuture<'static, Value>>,
    handle: CancelHandle,
}

impl FormController {
    pub fn register_field(
        &self,
        path: impl Into<FieldPath>,
        registration: FieldRegistration,
    ) -> FormResult<()> {
        let mut fields = write_lock(&self.inner.fields, "registering field")?;
        fields.insert(path.into(), registration);
        Ok(())
    }

    pub fn unregister_field(&self, path: impl Into<FieldPath>) -> FormResult<()> {
        let mut fields = write_lock(&self.inner.fields, "unregistering field")?;
        fields.remove(&path.into());
        Ok(())
    }

    pub fn register_field_validator<F>(
        &self,
        path: impl Into<FieldPath>,
        validator: F,
    ) -> FormResult<()>
    where
        F: Fn(&Value) -> MaybeAsync<Option<Value>, Value> + Send + Sync + 'static,
    {
        self.register_field(path, FieldRegistration::with_validator(validator))
    }

    pub fn set_validation_schema<S>(&self, schema: S) -> FormResult<()>
    where
        S: SchemaValidator,
    {
        *write_lock(&self.inner.schema, "setting validation schema")? = Some(Arc::new(schema));
        Ok(())
    }

    pub fn set_form_validator<F>(&self, validator: F) -> FormResult<()>
    where
        F: Fn(&Value) -> MaybeAsync<Value, Value> + Send + Sync + 'static,
    {
        *write_lock(&self.inner.form_validator, "setting form validator")? =
            Some(Arc::new(validator));
        Ok(())
    }

    /// Runs every validation source as a whole-form run. Resolves to `None` when a
    /// newer run, a reset or teardown superseded this one.
    pub async fn validate_form(&self, values: Option<Value>) -> FormResult<Option<Value>> {
        let Some(run) = self.start_whole_form_run(values, |_| {})? else {
            return Ok(None);
        };
        self.settle_whole_form_run(run).await
    }

    /// Validates a single field and writes only `errors[path]`. Independent of
    /// whole-form runs.
    pub async fn validate_field(&self, path: impl Into<FieldPath>) -> FormResult<Option<Value>> {
        let path = path.into();
        let validator = read_lock(&self.inner.fields, "reading field registry")?
            .get(&path)
            .and_then(|registration| registration.validate.clone());
        let values = read_lock(&self.inner.state, "reading values for field validation")?
            .values
            .clone();

        let error = match validator {
            Some(validator) => {
                let value = get_in(&values, path.as_str())
                    .cloned()
                    .unwrap_or(Value::Null);
                run_single_field(&validator, &value).await
            }
            None => {
                let schema = read_lock(&self.inner.schema, "reading validation schema")?.clone();
                let Some(schema) = schema else {
                    warn!("validate_field called for `{path}` but nothing validates it");
                    return Ok(None);
                };
                let errors =
                    run_schema_level(schema.as_ref(), &self.schema_options(), &values).await;
                get_in(&errors, path.as_str())
                    .filter(|error| is_truthy(error))
                    .cloned()
            }
        };

        self.update("writing field validation result", |state| {
            let next = set_in(&state.errors, path.as_str(), error.clone());
            if next == state.errors {
                return false;
            }
            state.errors = next;
            true
        })?;
        Ok(error)
    }

    pub(super) fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            abort_early: false,
            context: self.inner.options.schema_context.clone(),
        }
    }

    pub(super) fn pipeline(&self) -> FormResult<ValidationPipeline> {
        let fields = read_lock(&self.inner.fields, "collecting field validators")?
            .iter()
            .filter_map(|(path, registration)| {
                registration
                    .validate
                    .clone()
                    .map(|validator| (path.clone(), validator))
            })
            .collect();
        Ok(ValidationPipeline {
            fields,
            schema: read_lock(&self.inner.schema, "collecting validation schema")?.clone(),
            schema_options: self.schema_options(),
            form_validator: read_lock(&self.inner.form_validator, "collecting form validator")?
                .clone(),
        })
    }

    /// Installs a new whole-form run, canceling the previous one. `prepare` runs
    /// under the same lock so submit bookkeeping and the run start are atomic.
    pub(super) fn start_whole_form_run(
        &self,
        values: Option<Value>,
        prepare: impl FnOnce(&mut FormState),
    ) -> FormResult<Option<WholeFormRun>> {
        let pipeline = self.pipeline()?;
        let run = {
            let mut state = write_lock(&self.inner.state, "starting form validation")?;
            if state.disposed {
                return Ok(None);
            }
            prepare(&mut state);
            let values = values.unwrap_or_else(|| state.values.clone());
            state.cancel_active_run();
            let ticket = state.next_ticket();
            let (task, handle) =
                CancelableTask::start(move || async move { pipeline.run(values).await }.boxed());
            state.active_run = Some(ActiveRun {
                ticket,
                handle: handle.clone(),
            });
            state.is_validating = true;
            debug!("form {}: validation run {ticket:?} started", state.id);
            WholeFormRun {
                ticket,
                submit_attempt: state.submit_count,
                task,
                handle,
            }
        };
        self.notify()?;
        Ok(Some(run))
    }

    pub(super) async fn settle_whole_form_run(&self, run: WholeFormRun) -> FormResult<Option<Value>> {
        let WholeFormRun {
            ticket,
            task,
            handle,
            ..
        } = run;
        let Some(errors) = task.await else {
            debug!("validation run {ticket:?} was superseded; dropping its result");
            return Ok(None);
        };

        let mut committed = false;
        self.update("committing form validation", |state| {
            let is_current = state
                .active_run
                .as_ref()
                .is_some_and(|active| active.handle.same_task(&handle));
            if !is_current {
                return false;
            }
            state.active_run = None;
            state.is_validating = false;
            if state.errors != errors {
                state.errors = errors.clone();
            }
            committed = true;
            debug!("form {}: validation run {ticket:?} committed", state.id);
            true
        })?;
        Ok(committed.then_some(errors))
    }

    /// Starts a whole-form run now and hands its completion to the spawner.
    pub(super) fn spawn_form_validation(&self) -> FormResult<()> {
        let Some(run) = self.start_whole_form_run(None, |_| {})? else {
            return Ok(());
        };
        let controller = self.clone();
        self.spawn(
            async move {
                if let Err(error) = controller.settle_whole_form_run(run).await {
                    warn!("form validation could not be committed: {error}");
                }
            }
            .boxed(),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use serde_json::json;

    #[test]
    fn first_schema_message_per_path_wins() {
        let rejection = SchemaRejection::new("", "3 errors")
            .with_issue("email", "first")
            .with_issue("email", "second")
            .with_issue("friends[1].name", "required");
        assert_eq!(
            schema_errors(&rejection),
            json!({"email": "first", "friends": [null, {"name": "required"}]})
        );
    }

    #[test]
    fn root_rejection_uses_its_own_path() {
        assert_eq!(
            schema_errors(&SchemaRejection::new("email", "invalid")),
            json!({"email": "invalid"})
        );
        assert_eq!(schema_errors(&SchemaRejection::new("", "invalid")), json!({}));
    }

    #[test]
    fn blank_strings_are_stripped_recursively() {
        let values = json!({"a": "", "b": {"c": "", "d": "x"}, "e": ["", 0, "y"]});
        assert_eq!(
            strip_empty_strings(&values),
            json!({"b": {"d": "x"}, "e": [null, 0, "y"]})
        );
    }

    #[test]
    fn error_tree_emptiness() {
        assert!(!has_errors(&json!({})));
        assert!(has_errors(&json!({"a": "x"})));
        assert!(!has_errors(&Value::Null));
    }

    #[test]
    fn falsy_field_results_contribute_nothing() {
        let empty: FieldValidatorFn =
            Arc::new(|_value: &Value| MaybeAsync::<Option<Value>, Value>::Sync(Some(json!(""))));
        let failing: FieldValidatorFn =
            Arc::new(|_value: &Value| MaybeAsync::<Option<Value>, Value>::Failed(json!("boom")));
        let pipeline = ValidationPipeline {
            fields: vec![
                (FieldPath::from_static("a"), empty),
                (FieldPath::from_static("b.c"), failing),
            ],
            schema: None,
            schema_options: SchemaOptions {
                abort_early: false,
                context: json!({}),
            },
            form_validator: None,
        };
        assert_eq!(block_on(pipeline.run(json!({}))), json!({"b": {"c": "boom"}}));
    }

    #[test]
    fn non_object_handler_rejection_is_discarded() {
        let validator: FormValidatorFn =
            Arc::new(|_values: &Value| MaybeAsync::<Value, Value>::Failed(json!("oops")));
        assert_eq!(block_on(run_handler_level(&validator, &json!({}))), json!({}));
    }
}
