mod binding;
mod controller;
mod merge;
mod model;
mod path;
mod submit;
mod task;
mod validation;


pub use binding::{BlurHandler, ChangeHandler, FieldInput, FieldMeta, InputEvent, InputType};
pub use calmform_derive::FormModel;
pub use controller::{
    FormController, FormError, FormId, FormOptions, FormResult, FormSnapshot, FormSpawner,
    InitialValidity, SubscriptionId, ValidationTicket,
};
pub use merge::{deep_merge, deep_merge_all};
pub use model::FormModel;
pub use path::{
    FieldPath, PathSegment, get_in, is_truthy, parse_path, set_in, set_in_place,
    set_nested_all_true,
};
pub use submit::{FormActions, ResetHandlerFn, SubmitHandlerFn, SubmitOutcome, SubmitPhase};
pub use task::{CancelHandle, CancelableTask};
pub use validation::{
    FieldRegistration, FieldValidatorFn, FormValidatorFn, MaybeAsync, SchemaIssue,
    SchemaOptions, SchemaRejection, SchemaValidator, has_errors, schema_errors,
};
