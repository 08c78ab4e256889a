use serde::Serialize;
use serde::de::DeserializeOwned;

use super::controller::{FormController, FormOptions, FormResult, FormSpawner};

/// A typed form model. `Fields` exposes one [`FieldPath`](super::FieldPath)
/// accessor per serialized field; `#[derive(FormModel)]` generates it.
pub trait FormModel: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;
}

impl FormController {
    pub fn from_model<M>(model: &M, options: FormOptions, spawner: impl FormSpawner) -> FormResult<Self>
    where
        M: FormModel,
    {
        Ok(Self::new(serde_json::to_value(model)?, options, spawner))
    }

    pub fn values_as<M>(&self) -> FormResult<M>
    where
        M: DeserializeOwned,
    {
        Ok(serde_json::from_value(self.values()?)?)
    }

    pub fn set_model<M>(&self, model: &M) -> FormResult<()>
    where
        M: Serialize,
    {
        self.set_values(serde_json::to_value(model)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{FieldPath, FormError};
    use futures::future::BoxFuture;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize, crate::form::FormModel)]
    struct Signup {
        email: String,
        #[serde(rename = "displayName")]
        display_name: String,
        age: u32,
    }

    fn controller_for(model: &Signup) -> FormController {
        let options = FormOptions {
            validate_on_change: false,
            ..FormOptions::default()
        };
        FormController::from_model(model, options, |_task: BoxFuture<'static, ()>| {})
            .expect("model serializes")
    }

    #[test]
    fn derived_paths_follow_serialized_names() {
        let fields = Signup::fields();
        assert_eq!(fields.email(), FieldPath::from_static("email"));
        assert_eq!(fields.display_name().as_str(), "displayName");
    }

    #[test]
    fn values_round_trip_through_the_model() {
        let model = Signup {
            email: "a@calm.form".into(),
            display_name: "A".into(),
            age: 30,
        };
        let controller = controller_for(&model);
        assert_eq!(
            controller.values().expect("values"),
            json!({"email": "a@calm.form", "displayName": "A", "age": 30})
        );

        controller
            .set_field_value(Signup::fields().display_name(), json!("B"), false)
            .expect("write");
        let typed: Signup = controller.values_as().expect("typed values");
        assert_eq!(typed.display_name, "B");
    }

    #[test]
    fn mismatched_values_surface_as_model_errors() {
        let model = Signup {
            email: String::new(),
            display_name: String::new(),
            age: 1,
        };
        let controller = controller_for(&model);
        controller
            .set_field_value(Signup::fields().age(), json!("not a number"), false)
            .expect("write");
        let error = controller.values_as::<Signup>().expect_err("age is a string");
        assert!(matches!(error, FormError::Model(_)));
    }
}
