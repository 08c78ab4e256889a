pub use crate::form::{
    FieldInput, FieldPath, FieldRegistration, FormActions, FormController, FormError, FormModel,
    FormOptions, FormResult, FormSnapshot, InitialValidity, InputEvent, InputType, MaybeAsync,
    SchemaOptions, SchemaRejection, SchemaValidator, SubmitOutcome, SubmitPhase,
};
