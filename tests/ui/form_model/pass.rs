use calmform::form::{FieldPath, FormModel};
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, calmform::form::FormModel)]
struct DemoForm {
    email: String,
    #[serde(rename = "zipCode", default)]
    zip_code: String,
    #[serde(skip)]
    internal_note: String,
}

fn main() {
    let fields = DemoForm::fields();
    assert_eq!(fields.email(), FieldPath::from_static("email"));
    assert_eq!(fields.zip_code().as_str(), "zipCode");

    let model = DemoForm {
        email: "a@calm.form".to_string(),
        zip_code: "10115".to_string(),
        internal_note: String::new(),
    };
    let value = serde_json::to_value(&model).expect("model serializes");
    assert_eq!(value.get(fields.zip_code().as_str()), Some(&"10115".into()));
}
