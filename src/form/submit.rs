use std::sync::Arc;

use log::{debug, warn};
use serde_json::Value;

use super::controller::{
    FormController, FormError, FormResult, FormSnapshot, FormState, read_lock, write_lock,
};
use super::path::{FieldPath, empty_tree, set_nested_all_true};
use super::validation::{MaybeAsync, has_errors};

pub type SubmitHandlerFn = Arc<dyn Fn(Value, FormActions) -> MaybeAsync<Value, Value> + Send + Sync>;
pub type ResetHandlerFn =
    Arc<dyn Fn(Value, FormActions) -> MaybeAsync<Option<Value>, Value> + Send + Sync>;

/// Submission phase derived from the committed flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmitPhase {
    Idle,
    Validating,
    Invoking,
}

impl SubmitPhase {
    pub fn of(snapshot: &FormSnapshot) -> Self {
        match (snapshot.is_submitting, snapshot.is_validating) {
            (false, _) => SubmitPhase::Idle,
            (true, true) => SubmitPhase::Validating,
            (true, false) => SubmitPhase::Invoking,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum SubmitStep {
    Begin,
    Invalid,
    Superseded { attempt: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    Submitted(Value),
    Invalid(Value),
    Superseded,
}

/// Applies a submit step to `state`, returning whether anything changed.
pub(super) fn transition_submit_state(state: &mut FormState, step: SubmitStep) -> bool {
    match step {
        SubmitStep::Begin => {
            let touched = set_nested_all_true(&state.values);
            state.touched = if touched.is_object() {
                touched
            } else {
                empty_tree()
            };
            state.is_submitting = true;
            state.submit_count = state.submit_count.saturating_add(1);
            true
        }
        SubmitStep::Invalid => std::mem::replace(&mut state.is_submitting, false),
        SubmitStep::Superseded { attempt } => {
            // A newer attempt owns the flag.
            if state.submit_count != attempt || !state.is_submitting {
                return false;
            }
            state.is_submitting = false;
            true
        }
    }
}

/// Mutators handed to submit and reset handlers.
#[derive(Clone)]
pub struct FormActions {
    controller: FormController,
}

impl FormActions {
    pub fn snapshot(&self) -> FormResult<FormSnapshot> {
        self.controller.snapshot()
    }

    pub fn set_submitting(&self, submitting: bool) -> FormResult<()> {
        self.controller.set_submitting(submitting)
    }

    pub fn set_status(&self, status: Option<Value>) -> FormResult<()> {
        self.controller.set_status(status)
    }

    pub fn set_errors(&self, errors: Value) -> FormResult<()> {
        self.controller.set_errors(errors)
    }

    pub fn set_field_error(&self, path: impl Into<FieldPath>, error: Option<Value>) -> FormResult<()> {
        self.controller.set_field_error(path, error)
    }

    pub fn set_touched(&self, touched: Value) -> FormResult<()> {
        self.controller.set_touched(touched)
    }

    pub fn set_field_touched(
        &self,
        path: impl Into<FieldPath>,
        touched: bool,
        should_validate: bool,
    ) -> FormResult<()> {
        self.controller
            .set_field_touched(path, touched, should_validate)
    }

    pub fn set_values(&self, values: Value) -> FormResult<()> {
        self.controller.set_values(values)
    }

    pub fn set_field_value(
        &self,
        path: impl Into<FieldPath>,
        value: Value,
        should_validate: bool,
    ) -> FormResult<()> {
        self.controller.set_field_value(path, value, should_validate)
    }

    pub fn reset_form(&self, next_values: Option<Value>) -> FormResult<()> {
        self.controller.reset_form(next_values)
    }

    pub async fn validate_form(&self, values: Option<Value>) -> FormResult<Option<Value>> {
        self.controller.validate_form(values).await
    }

    pub async fn validate_field(&self, path: impl Into<FieldPath>) -> FormResult<Option<Value>> {
        self.controller.validate_field(path).await
    }

    pub async fn submit_form(&self) -> FormResult<SubmitOutcome> {
        self.controller.submit_form().await
    }
}

impl FormController {
    pub fn on_submit<F>(&self, handler: F) -> FormResult<()>
    where
        F: Fn(Value, FormActions) -> MaybeAsync<Value, Value> + Send + Sync + 'static,
    {
        *write_lock(&self.inner.submit_handler, "setting submit handler")? = Some(Arc::new(handler));
        Ok(())
    }

    pub fn on_reset<F>(&self, handler: F) -> FormResult<()>
    where
        F: Fn(Value, FormActions) -> MaybeAsync<Option<Value>, Value> + Send + Sync + 'static,
    {
        *write_lock(&self.inner.reset_handler, "setting reset handler")? = Some(Arc::new(handler));
        Ok(())
    }

    pub fn actions(&self) -> FormActions {
        FormActions {
            controller: self.clone(),
        }
    }

    pub fn submit_phase(&self) -> FormResult<SubmitPhase> {
        Ok(SubmitPhase::of(&self.snapshot()?))
    }

    /// Touches every field, validates the whole form and invokes the submit handler
    /// when nothing failed. Only a submit handler failure is returned as `Err`.
    pub async fn submit_form(&self) -> FormResult<SubmitOutcome> {
        let begin = |state: &mut FormState| {
            transition_submit_state(state, SubmitStep::Begin);
        };
        let Some(run) = self.start_whole_form_run(None, begin)? else {
            debug!("submit ignored: form is disposed");
            return Ok(SubmitOutcome::Superseded);
        };
        let attempt = run.submit_attempt;
        let ticket = run.ticket;

        let Some(errors) = self.settle_whole_form_run(run).await? else {
            self.update("releasing superseded submit", |state| {
                transition_submit_state(state, SubmitStep::Superseded { attempt })
            })?;
            debug!("submit attempt {attempt} superseded by a newer run");
            return Ok(SubmitOutcome::Superseded);
        };

        if has_errors(&errors) {
            self.update("rejecting invalid submit", |state| {
                transition_submit_state(state, SubmitStep::Invalid)
            })?;
            debug!("submit attempt {attempt} blocked by validation run {ticket:?}");
            return Ok(SubmitOutcome::Invalid(errors));
        }

        let handler = read_lock(&self.inner.submit_handler, "reading submit handler")?.clone();
        let Some(handler) = handler else {
            warn!("submit_form called with no submit handler configured");
            return Ok(SubmitOutcome::Submitted(Value::Null));
        };
        let values = self.values()?;
        handler(values, self.actions())
            .settle()
            .await
            .map(SubmitOutcome::Submitted)
            .map_err(FormError::SubmitRejected)
    }

    /// Runs the reset handler, then resets to the values it returned or the
    /// remembered initial values. A failing handler leaves the form untouched.
    pub async fn handle_reset(&self) -> FormResult<()> {
        let handler = read_lock(&self.inner.reset_handler, "reading reset handler")?.clone();
        let Some(handler) = handler else {
            return self.reset_form(None);
        };
        let outcome = handler(self.values()?, self.actions());
        match outcome.settle().await {
            Ok(next_values) => self.reset_form(next_values),
            Err(reason) => {
                warn!("reset handler failed, form left unchanged: {reason}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormOptions;
    use futures::future::BoxFuture;
    use serde_json::json;

    fn state_with(values: Value) -> FormState {
        FormState::new(values, &FormOptions::default())
    }

    #[test]
    fn begin_touches_every_leaf_and_counts_the_attempt() {
        let mut state = state_with(json!({"email": "", "tags": ["a", "b"]}));
        assert!(transition_submit_state(&mut state, SubmitStep::Begin));
        assert_eq!(state.touched, json!({"email": true, "tags": [true, true]}));
        assert!(state.is_submitting);
        assert_eq!(state.submit_count, 1);
    }

    #[test]
    fn superseded_only_releases_the_latest_attempt() {
        let mut state = state_with(json!({}));
        transition_submit_state(&mut state, SubmitStep::Begin);
        transition_submit_state(&mut state, SubmitStep::Begin);
        assert!(!transition_submit_state(
            &mut state,
            SubmitStep::Superseded { attempt: 1 }
        ));
        assert!(state.is_submitting);
        assert!(transition_submit_state(
            &mut state,
            SubmitStep::Superseded { attempt: 2 }
        ));
        assert!(!state.is_submitting);
    }

    #[test]
    fn invalid_clears_submitting_once() {
        let mut state = state_with(json!({}));
        transition_submit_state(&mut state, SubmitStep::Begin);
        assert!(transition_submit_state(&mut state, SubmitStep::Invalid));
        assert!(!transition_submit_state(&mut state, SubmitStep::Invalid));
    }

    #[test]
    fn phase_follows_flags() {
        let controller = FormController::new(
            json!({}),
            FormOptions::default(),
            |_task: BoxFuture<'static, ()>| {},
        );
        let mut snapshot = controller.snapshot().expect("snapshot");
        assert_eq!(SubmitPhase::of(&snapshot), SubmitPhase::Idle);
        snapshot.is_submitting = true;
        snapshot.is_validating = true;
        assert_eq!(SubmitPhase::of(&snapshot), SubmitPhase::Validating);
        snapshot.is_validating = false;
        assert_eq!(SubmitPhase::of(&snapshot), SubmitPhase::Invoking);
    }
}
