pub mod value;

pub use value::{properties_from_json, properties_size, properties_to_json, Properties, Value};
