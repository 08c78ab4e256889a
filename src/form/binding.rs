use std::str::FromStr;
use std::sync::Arc;

use log::warn;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde_json::{Number, Value};

use super::controller::{FormController, FormResult, read_lock, write_lock};
use super::path::{FieldPath, get_in, is_truthy};

pub type ChangeHandler = Arc<dyn Fn(FieldInput) + Send + Sync>;
pub type BlurHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum InputType {
    #[default]
    Text,
    Number,
    Range,
    Checkbox,
}

impl InputType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "number" => InputType::Number,
            "range" => InputType::Range,
            "checkbox" => InputType::Checkbox,
            _ => InputType::Text,
        }
    }
}

/// Input event already extracted from the host toolkit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputEvent {
    pub name: Option<String>,
    pub id: Option<String>,
    pub value: String,
    pub checked: bool,
    pub input_type: InputType,
}

impl InputEvent {
    pub fn named(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: value.into(),
            ..Self::default()
        }
    }

    pub fn checkbox(name: impl Into<String>, checked: bool) -> Self {
        Self {
            name: Some(name.into()),
            checked,
            input_type: InputType::Checkbox,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_type(mut self, input_type: InputType) -> Self {
        self.input_type = input_type;
        self
    }

    /// `name` first, then `id`; blank identifiers do not count.
    pub fn field_path(&self) -> Option<FieldPath> {
        [&self.name, &self.id]
            .into_iter()
            .flatten()
            .find(|identity| !identity.trim().is_empty())
            .map(|identity| FieldPath::new(identity.as_str()))
    }

    pub fn coerced_value(&self) -> Value {
        match self.input_type {
            InputType::Number | InputType::Range => parse_number(&self.value),
            InputType::Checkbox => Value::Bool(self.checked),
            InputType::Text => Value::String(self.value.clone()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldInput {
    Event(InputEvent),
    Value(Value),
}

impl FieldInput {
    fn into_value(self) -> Value {
        match self {
            FieldInput::Event(event) => event.coerced_value(),
            FieldInput::Value(value) => value,
        }
    }
}

impl From<InputEvent> for FieldInput {
    fn from(event: InputEvent) -> Self {
        FieldInput::Event(event)
    }
}

impl From<Value> for FieldInput {
    fn from(value: Value) -> Self {
        FieldInput::Value(value)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldMeta {
    pub value: Option<Value>,
    pub initial_value: Option<Value>,
    pub error: Option<Value>,
    pub touched: bool,
}

impl FormController {
    pub fn handle_change(&self, event: &InputEvent) -> FormResult<()> {
        let Some(path) = event.field_path() else {
            warn!("change event carries neither `name` nor `id`; ignoring it");
            return Ok(());
        };
        self.set_field_value(path, event.coerced_value(), true)
    }

    /// Returns the change handler for `path`, creating it on first use. Repeated
    /// calls for the same path return the same handler.
    pub fn change_handler(&self, path: impl Into<FieldPath>) -> FormResult<ChangeHandler> {
        let path = path.into();
        let disposed = self.is_disposed()?;
        let cached = read_lock(&self.inner.change_handlers, "reading change handlers")?
            .get(&path)
            .cloned();
        if let Some(handler) = cached {
            return Ok(handler);
        }

        let controller = self.downgrade();
        let key = path.clone();
        let handler: ChangeHandler = Arc::new(move |input: FieldInput| {
            let Some(controller) = FormController::upgrade(&controller) else {
                return;
            };
            if let Err(error) = controller.set_field_value(&key, input.into_value(), true) {
                warn!("change for `{key}` was not applied: {error}");
            }
        });
        if disposed {
            return Ok(handler);
        }
        Ok(
            write_lock(&self.inner.change_handlers, "caching change handler")?
                .entry(path)
                .or_insert(handler)
                .clone(),
        )
    }

    pub fn handle_blur(&self, event: &InputEvent) -> FormResult<()> {
        let Some(path) = event.field_path() else {
            warn!("blur event carries neither `name` nor `id`; ignoring it");
            return Ok(());
        };
        self.set_field_touched(path, true, true)
    }

    pub fn blur_handler(&self, path: impl Into<FieldPath>) -> FormResult<BlurHandler> {
        let path = path.into();
        let disposed = self.is_disposed()?;
        let cached = read_lock(&self.inner.blur_handlers, "reading blur handlers")?
            .get(&path)
            .cloned();
        if let Some(handler) = cached {
            return Ok(handler);
        }

        let controller = self.downgrade();
        let key = path.clone();
        let handler: BlurHandler = Arc::new(move || {
            let Some(controller) = FormController::upgrade(&controller) else {
                return;
            };
            if let Err(error) = controller.set_field_touched(&key, true, true) {
                warn!("blur for `{key}` was not applied: {error}");
            }
        });
        if disposed {
            return Ok(handler);
        }
        Ok(write_lock(&self.inner.blur_handlers, "caching blur handler")?
            .entry(path)
            .or_insert(handler)
            .clone())
    }

    pub fn field_meta(&self, path: impl Into<FieldPath>) -> FormResult<FieldMeta> {
        let path = path.into();
        let state = read_lock(&self.inner.state, "reading field meta")?;
        Ok(FieldMeta {
            value: get_in(&state.values, path.as_str()).cloned(),
            initial_value: get_in(&state.initial_values, path.as_str()).cloned(),
            error: get_in(&state.errors, path.as_str()).cloned(),
            touched: get_in(&state.touched, path.as_str()).is_some_and(is_truthy),
        })
    }

    /// The error at `path`, hidden until the field was touched or a submit was attempted.
    pub fn field_error_for_display(&self, path: impl Into<FieldPath>) -> FormResult<Option<Value>> {
        let path = path.into();
        let state = read_lock(&self.inner.state, "reading display error")?;
        let touched = get_in(&state.touched, path.as_str()).is_some_and(is_truthy);
        if !touched && state.submit_count == 0 {
            return Ok(None);
        }
        Ok(get_in(&state.errors, path.as_str())
            .filter(|error| is_truthy(error))
            .cloned())
    }
}

/// Parses numeric input text; integers stay integers, unparsable text becomes `""`.
fn parse_number(text: &str) -> Value {
    let trimmed = text.trim();
    let Ok(decimal) = Decimal::from_str(trimmed).or_else(|_| Decimal::from_scientific(trimmed))
    else {
        return Value::String(String::new());
    };
    let decimal = decimal.normalize();
    if let (0, Some(integer)) = (decimal.scale(), decimal.to_i64()) {
        return Value::from(integer);
    }
    decimal
        .to_f64()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(String::new()))
}
